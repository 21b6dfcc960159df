//! Key-directed descent from the root to a leaf.
//!
//! Descent records the root-to-parent path as `(child_slot, page_no)`
//! pairs so that split propagation can later re-pin ancestors by id.
//! At most one page is pinned at a time while walking down: the
//! current node is unpinned before its child is read.

use crate::btree::index::BTreeCore;
use crate::btree::key::IndexKey;
use crate::btree::node::{InternalNode, LeafNode};
use meridian_common::page::{PageNo, INVALID_PAGE_NO};
use meridian_common::{MeridianError, Result};
use std::cmp::Ordering;

/// Where a key belongs at the leaf level.
#[derive(Debug, Clone)]
pub(crate) struct LeafPosition {
    /// Leaf page that should receive (or contains) the key.
    pub leaf_page_no: PageNo,
    /// Slot within the leaf where the key belongs.
    pub insert_slot: usize,
    /// Number of occupied slots in that leaf.
    pub end_of_records: usize,
    /// The leaf descent originally arrived at. Differs from
    /// `leaf_page_no` only when an insert-mode split redirected the
    /// key to the new right sibling.
    pub prev_leaf_page_no: PageNo,
}

/// Returns the child slot to descend into for `key`.
///
/// The smallest `i` with `key < key_array[i]`; equal keys descend
/// into the right subtree, and a key at or beyond every present key
/// takes the last occupied child.
pub(crate) fn child_index<K: IndexKey>(node: &InternalNode<K>, key: K) -> usize {
    let key_count = node.key_count();
    for i in 0..key_count {
        if key.key_cmp(&node.key_at(i)) == Ordering::Less {
            return i;
        }
    }
    key_count
}

/// Returns `(insert_slot, end_of_records)` for placing `key` in a leaf.
///
/// `insert_slot` is the first slot that is unoccupied or holds a
/// strictly greater key, so a run of duplicates keeps insertion order.
pub(crate) fn leaf_insert_slots<K: IndexKey>(leaf: &LeafNode<K>, key: K) -> (usize, usize) {
    let capacity = LeafNode::<K>::CAPACITY;
    let mut insert_slot = capacity;
    let mut end_of_records = capacity;

    for slot in 0..capacity {
        if !leaf.is_occupied(slot) {
            end_of_records = slot;
            if insert_slot == capacity {
                insert_slot = slot;
            }
            break;
        }
        if insert_slot == capacity && leaf.key_at(slot).key_cmp(&key) == Ordering::Greater {
            insert_slot = slot;
        }
    }

    (insert_slot, end_of_records)
}

/// Returns `(first_slot, end_of_records)` for positioning a scan.
///
/// `first_slot` is the first slot whose key is greater than or equal
/// to `key`, so a scan starting at a duplicated bound sees the whole
/// run.
pub(crate) fn leaf_scan_slots<K: IndexKey>(leaf: &LeafNode<K>, key: K) -> (usize, usize) {
    let capacity = LeafNode::<K>::CAPACITY;
    let mut first_slot = capacity;
    let mut end_of_records = capacity;

    for slot in 0..capacity {
        if !leaf.is_occupied(slot) {
            end_of_records = slot;
            if first_slot == capacity {
                first_slot = slot;
            }
            break;
        }
        if first_slot == capacity && leaf.key_at(slot).key_cmp(&key) != Ordering::Less {
            first_slot = slot;
        }
    }

    (first_slot, end_of_records)
}

impl<K: IndexKey> BTreeCore<K> {
    /// Walks from the root to the leaf that would contain `key`.
    ///
    /// Returns the leaf's page number and the root-to-parent path.
    /// Every internal page visited is unpinned before its child is
    /// read; nothing remains pinned on return.
    pub(crate) fn descend_to_leaf(&self, key: K) -> Result<(PageNo, Vec<(usize, PageNo)>)> {
        let mut path = Vec::new();
        let mut current = self.root_page_no;

        loop {
            let node = InternalNode::<K>::from_bytes(self.pager.read_page(current)?);
            let slot = child_index(&node, key);
            let child = node.child_at(slot);
            let level = node.level();
            self.pager.unpin(current, false);

            path.push((slot, current));

            if child == INVALID_PAGE_NO {
                return Err(MeridianError::TreeCorrupted(format!(
                    "internal page {} has no child in slot {}",
                    current, slot
                )));
            }
            if level == 1 {
                return Ok((child, path));
            }
            current = child;
        }
    }

    /// Read-only positioning for a scan.
    ///
    /// Fails with `NoSuchKey` on an empty tree. Nothing remains
    /// pinned on return; the scan re-pins the leaf it settles on.
    pub(crate) fn locate_for_scan(&self, key: K) -> Result<LeafPosition> {
        let root = InternalNode::<K>::from_bytes(self.pager.read_page(self.root_page_no)?);
        let empty = root.child_at(0) == INVALID_PAGE_NO;
        self.pager.unpin(self.root_page_no, false);
        if empty {
            return Err(MeridianError::NoSuchKey);
        }

        let (leaf_page_no, _path) = self.descend_to_leaf(key)?;
        let leaf = LeafNode::<K>::from_bytes(self.pager.read_page(leaf_page_no)?);
        let (first_slot, end_of_records) = leaf_scan_slots(&leaf, key);
        self.pager.unpin(leaf_page_no, false);

        Ok(LeafPosition {
            leaf_page_no,
            insert_slot: first_slot,
            end_of_records,
            prev_leaf_page_no: leaf_page_no,
        })
    }

    /// Positioning for an insert.
    ///
    /// If the target leaf is full it is split here, and the returned
    /// position names the post-split leaf that should receive the key
    /// (guaranteed to have room). Nothing remains pinned on return.
    pub(crate) fn locate_for_insert(&mut self, key: K) -> Result<LeafPosition> {
        let (leaf_page_no, path) = self.descend_to_leaf(key)?;

        let mut leaf = LeafNode::<K>::from_bytes(self.pager.read_page(leaf_page_no)?);
        let (insert_slot, end_of_records) = leaf_insert_slots(&leaf, key);

        if end_of_records < LeafNode::<K>::CAPACITY {
            self.pager.unpin(leaf_page_no, false);
            return Ok(LeafPosition {
                leaf_page_no,
                insert_slot,
                end_of_records,
                prev_leaf_page_no: leaf_page_no,
            });
        }

        // Leaf is full: split it, consuming the pin we hold on it.
        self.split_leaf(leaf_page_no, &mut leaf, insert_slot, key, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordId;

    fn leaf_with_keys(keys: &[i32]) -> LeafNode<i32> {
        let mut leaf = LeafNode::<i32>::new();
        for (slot, &key) in keys.iter().enumerate() {
            leaf.set_key(slot, key);
            leaf.set_rid(slot, RecordId::new(slot as u32 + 1, 1));
        }
        leaf
    }

    #[test]
    fn test_child_index_basic_routing() {
        let mut node = InternalNode::<i32>::new(1);
        node.set_child(0, 10);
        node.set_key(0, 100);
        node.set_child(1, 11);
        node.set_key(1, 200);
        node.set_child(2, 12);

        assert_eq!(child_index(&node, 50), 0);
        assert_eq!(child_index(&node, 150), 1);
        assert_eq!(child_index(&node, 250), 2);
    }

    #[test]
    fn test_child_index_equal_key_goes_right() {
        let mut node = InternalNode::<i32>::new(1);
        node.set_child(0, 10);
        node.set_key(0, 100);
        node.set_child(1, 11);

        assert_eq!(child_index(&node, 100), 1);
        assert_eq!(child_index(&node, 99), 0);
    }

    #[test]
    fn test_child_index_degenerate_smaller_than_all() {
        let mut node = InternalNode::<i32>::new(1);
        node.set_child(0, 10);
        node.set_key(0, 100);
        node.set_child(1, 11);

        assert_eq!(child_index(&node, i32::MIN), 0);
    }

    #[test]
    fn test_leaf_insert_slots_empty_leaf() {
        let leaf = leaf_with_keys(&[]);
        assert_eq!(leaf_insert_slots(&leaf, 5), (0, 0));
    }

    #[test]
    fn test_leaf_insert_slots_interior() {
        let leaf = leaf_with_keys(&[10, 20, 30]);

        assert_eq!(leaf_insert_slots(&leaf, 5), (0, 3));
        assert_eq!(leaf_insert_slots(&leaf, 15), (1, 3));
        assert_eq!(leaf_insert_slots(&leaf, 25), (2, 3));
        assert_eq!(leaf_insert_slots(&leaf, 35), (3, 3));
    }

    #[test]
    fn test_leaf_insert_slots_duplicates_keep_insertion_order() {
        let leaf = leaf_with_keys(&[10, 20, 20, 30]);

        // A new 20 lands after the existing run of 20s
        assert_eq!(leaf_insert_slots(&leaf, 20), (3, 4));
    }

    #[test]
    fn test_leaf_insert_slots_full_leaf() {
        let keys: Vec<i32> = (0..LeafNode::<i32>::CAPACITY as i32).collect();
        let leaf = leaf_with_keys(&keys);

        let capacity = LeafNode::<i32>::CAPACITY;
        let (slot, end) = leaf_insert_slots(&leaf, i32::MAX);
        assert_eq!(slot, capacity);
        assert_eq!(end, capacity);

        let (slot, _) = leaf_insert_slots(&leaf, 1);
        assert_eq!(slot, 2);
    }

    #[test]
    fn test_leaf_scan_slots_lower_bound() {
        let leaf = leaf_with_keys(&[10, 20, 20, 30]);

        // Scan positioning lands on the first entry of a duplicate run
        assert_eq!(leaf_scan_slots(&leaf, 20), (1, 4));
        assert_eq!(leaf_scan_slots(&leaf, 15), (1, 4));
        assert_eq!(leaf_scan_slots(&leaf, 31), (4, 4));
        assert_eq!(leaf_scan_slots(&leaf, 0), (0, 4));
    }
}
