//! Leaf and internal node splitting with upward propagation.
//!
//! Splits happen bottom-up along the path recorded during descent.
//! New sibling pages are allocated and populated before any parent is
//! rewritten to reference them, and when the root itself splits, the
//! meta page's root pointer is updated last. After each individual
//! split the tree is a valid B+Tree.

use crate::btree::descent::LeafPosition;
use crate::btree::index::{BTreeCore, META_PAGE_NO};
use crate::btree::key::IndexKey;
use crate::btree::node::{InternalNode, LeafNode, MetaNode};
use meridian_common::page::{PageNo, INVALID_PAGE_NO};
use meridian_common::Result;
use std::cmp::Ordering;

/// Shift-inserts `(key, child)` into a non-full internal node.
///
/// With fill `k`, children `offset+1..=k` move right by one, keys
/// `offset..k` move right by one, then the key lands at `offset` and
/// the child pointer at `offset + 1`. The child already present at
/// `offset` is untouched: it points at the subtree that was split.
pub(crate) fn shift_insert<K: IndexKey>(
    node: &mut InternalNode<K>,
    offset: usize,
    key: K,
    child: PageNo,
) {
    let fill = node.key_count();
    debug_assert!(fill < InternalNode::<K>::CAPACITY);
    debug_assert!(offset <= fill);

    for slot in ((offset + 1)..=fill).rev() {
        let moved = node.child_at(slot);
        node.set_child(slot + 1, moved);
    }
    for slot in (offset..fill).rev() {
        let moved = node.key_at(slot);
        node.set_key(slot + 1, moved);
    }

    node.set_key(offset, key);
    node.set_child(offset + 1, child);
}

/// Chooses the slot where a full leaf splits.
///
/// Starts at the median and retreats to the start of any duplicate
/// run crossing it, so the promoted key strictly bounds every key
/// left of the split. When one run fills the whole left half, the
/// split moves to the run's right end instead. A leaf holding a
/// single key value has no such boundary and falls back to the
/// median.
pub(crate) fn leaf_split_point<K: IndexKey>(leaf: &LeafNode<K>) -> usize {
    let capacity = LeafNode::<K>::CAPACITY;
    let median = capacity / 2;

    let mut split_at = median;
    while split_at > 0
        && leaf.key_at(split_at - 1).key_cmp(&leaf.key_at(split_at)) == Ordering::Equal
    {
        split_at -= 1;
    }
    if split_at > 0 {
        return split_at;
    }

    let run_key = leaf.key_at(median);
    let mut run_end = median + 1;
    while run_end < capacity && leaf.key_at(run_end).key_cmp(&run_key) == Ordering::Equal {
        run_end += 1;
    }
    if run_end < capacity {
        run_end
    } else {
        median
    }
}

impl<K: IndexKey> BTreeCore<K> {
    /// Splits a full leaf at a run-aligned point near its median.
    ///
    /// The caller holds the pin on `leaf_page_no` and passes the leaf
    /// bytes; the pin is consumed here. Returns the position where
    /// the pending key should now be written, on whichever side of
    /// the split covers it.
    pub(crate) fn split_leaf(
        &mut self,
        leaf_page_no: PageNo,
        leaf: &mut LeafNode<K>,
        insert_slot: usize,
        key: K,
        path: Vec<(usize, PageNo)>,
    ) -> Result<LeafPosition> {
        let capacity = LeafNode::<K>::CAPACITY;
        let split_at = leaf_split_point(leaf);
        let split_key = leaf.key_at(split_at);

        // Allocate and populate the right sibling before touching any parent
        let right_page_no = self.pager.alloc_page()?;
        let mut right = LeafNode::<K>::new();
        for (to, from) in (split_at..capacity).enumerate() {
            right.set_key(to, leaf.key_at(from));
            right.set_rid(to, leaf.rid_at(from));
            leaf.clear_slot(from);
        }
        right.set_right_sibling(leaf.right_sibling_raw());
        leaf.set_right_sibling(right_page_no);

        self.pager.write_page(right_page_no, right.as_bytes())?;
        self.pager.unpin(right_page_no, true);
        self.pager.write_page(leaf_page_no, leaf.as_bytes())?;
        self.pager.unpin(leaf_page_no, true);

        // Promote the split key into the parent chain
        self.insert_into_parent(&path, split_key, right_page_no)?;

        if key.key_cmp(&split_key) != Ordering::Less {
            // A key equal to the promoted key follows its duplicate
            // run into the right sibling, keeping ties in insertion
            // order.
            Ok(LeafPosition {
                leaf_page_no: right_page_no,
                insert_slot: insert_slot - split_at,
                end_of_records: capacity - split_at,
                prev_leaf_page_no: leaf_page_no,
            })
        } else {
            Ok(LeafPosition {
                leaf_page_no,
                insert_slot,
                end_of_records: split_at,
                prev_leaf_page_no: leaf_page_no,
            })
        }
    }

    /// Inserts a promoted `(key, child)` pair into the parent chain,
    /// splitting full internal nodes on the way up.
    fn insert_into_parent(
        &mut self,
        path: &[(usize, PageNo)],
        key: K,
        child_page_no: PageNo,
    ) -> Result<()> {
        let node_capacity = InternalNode::<K>::CAPACITY;
        let mut promoted_key = key;
        let mut promoted_child = child_page_no;
        let mut depth = path.len();

        loop {
            if depth == 0 {
                // Propagation walked off the old root
                return self.grow_root(promoted_key, promoted_child);
            }
            depth -= 1;
            let (child_slot, parent_page_no) = path[depth];

            let mut parent = InternalNode::<K>::from_bytes(self.pager.read_page(parent_page_no)?);

            if !parent.is_full() {
                shift_insert(&mut parent, child_slot, promoted_key, promoted_child);
                self.pager.write_page(parent_page_no, parent.as_bytes())?;
                self.pager.unpin(parent_page_no, true);
                return Ok(());
            }

            // Split this internal node at its median
            let median = node_capacity / 2;
            let parent_promoted = parent.key_at(median);

            let right_page_no = self.pager.alloc_page()?;
            let mut right = InternalNode::<K>::new(parent.level());
            for (to, from) in ((median + 1)..node_capacity).enumerate() {
                right.set_key(to, parent.key_at(from));
                parent.clear_key(from);
            }
            for (to, from) in ((median + 1)..=node_capacity).enumerate() {
                right.set_child(to, parent.child_at(from));
                parent.set_child(from, INVALID_PAGE_NO);
            }
            parent.clear_key(median);

            // The pending pair goes to whichever sibling covers it,
            // pivoting on the key promoted from this split.
            if promoted_key.key_cmp(&parent_promoted) == Ordering::Less {
                shift_insert(&mut parent, child_slot, promoted_key, promoted_child);
            } else {
                shift_insert(
                    &mut right,
                    child_slot - (median + 1),
                    promoted_key,
                    promoted_child,
                );
            }

            self.pager.write_page(right_page_no, right.as_bytes())?;
            self.pager.unpin(right_page_no, true);
            self.pager.write_page(parent_page_no, parent.as_bytes())?;
            self.pager.unpin(parent_page_no, true);

            promoted_key = parent_promoted;
            promoted_child = right_page_no;
        }
    }

    /// Allocates a new root above the old one after a root split.
    fn grow_root(&mut self, key: K, right_child: PageNo) -> Result<()> {
        let old_root_no = self.root_page_no;
        let old_root = InternalNode::<K>::from_bytes(self.pager.read_page(old_root_no)?);
        let old_level = old_root.level();
        self.pager.unpin(old_root_no, false);

        let new_root_no = self.pager.alloc_page()?;
        let mut new_root = InternalNode::<K>::new(old_level + 1);
        new_root.set_child(0, old_root_no);
        new_root.set_key(0, key);
        new_root.set_child(1, right_child);
        self.pager.write_page(new_root_no, new_root.as_bytes())?;
        self.pager.unpin(new_root_no, true);

        // The meta page's root pointer moves last
        let mut meta = MetaNode::from_bytes(self.pager.read_page(META_PAGE_NO)?);
        meta.set_root_page_no(new_root_no);
        self.pager.write_page(META_PAGE_NO, meta.as_bytes())?;
        self.pager.unpin(META_PAGE_NO, true);

        self.root_page_no = new_root_no;
        log::debug!(
            "root split: new root page {} at level {}",
            new_root_no,
            old_level + 1
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordId;

    fn full_leaf(keys: &[i32]) -> LeafNode<i32> {
        assert_eq!(keys.len(), LeafNode::<i32>::CAPACITY);
        let mut leaf = LeafNode::<i32>::new();
        for (slot, &key) in keys.iter().enumerate() {
            leaf.set_key(slot, key);
            leaf.set_rid(slot, RecordId::new(slot as u32 + 1, 1));
        }
        leaf
    }

    #[test]
    fn test_leaf_split_point_distinct_keys_uses_median() {
        let keys: Vec<i32> = (0..LeafNode::<i32>::CAPACITY as i32).collect();
        let leaf = full_leaf(&keys);

        assert_eq!(leaf_split_point(&leaf), LeafNode::<i32>::CAPACITY / 2);
    }

    #[test]
    fn test_leaf_split_point_run_starting_at_median() {
        let capacity = LeafNode::<i32>::CAPACITY;
        let median = capacity / 2;
        let keys: Vec<i32> = (0..capacity)
            .map(|slot| if slot < median { slot as i32 } else { 7000 })
            .collect();
        let leaf = full_leaf(&keys);

        assert_eq!(leaf_split_point(&leaf), median);
    }

    #[test]
    fn test_leaf_split_point_retreats_to_run_start() {
        let capacity = LeafNode::<i32>::CAPACITY;
        let run_start = 300;
        let keys: Vec<i32> = (0..capacity)
            .map(|slot| if slot < run_start { slot as i32 } else { 7000 })
            .collect();
        let leaf = full_leaf(&keys);

        assert_eq!(leaf_split_point(&leaf), run_start);
    }

    #[test]
    fn test_leaf_split_point_run_filling_left_half_splits_at_run_end() {
        let capacity = LeafNode::<i32>::CAPACITY;
        let run_end = capacity / 2 + 60;
        let keys: Vec<i32> = (0..capacity)
            .map(|slot| if slot < run_end { 5 } else { 100 + slot as i32 })
            .collect();
        let leaf = full_leaf(&keys);

        assert_eq!(leaf_split_point(&leaf), run_end);
    }

    #[test]
    fn test_leaf_split_point_single_valued_leaf_falls_back_to_median() {
        let keys = vec![7; LeafNode::<i32>::CAPACITY];
        let leaf = full_leaf(&keys);

        assert_eq!(leaf_split_point(&leaf), LeafNode::<i32>::CAPACITY / 2);
    }

    fn internal_with(keys: &[i32], children: &[PageNo]) -> InternalNode<i32> {
        assert_eq!(children.len(), keys.len() + 1);
        let mut node = InternalNode::<i32>::new(1);
        for (slot, &child) in children.iter().enumerate() {
            node.set_child(slot, child);
        }
        for (slot, &key) in keys.iter().enumerate() {
            node.set_key(slot, key);
        }
        node
    }

    #[test]
    fn test_shift_insert_into_empty_slot_zero() {
        let mut node = internal_with(&[], &[10]);
        shift_insert(&mut node, 0, 100, 11);

        assert_eq!(node.key_count(), 1);
        assert_eq!(node.key_at(0), 100);
        assert_eq!(node.child_at(0), 10);
        assert_eq!(node.child_at(1), 11);
    }

    #[test]
    fn test_shift_insert_at_front() {
        let mut node = internal_with(&[200, 300], &[10, 11, 12]);
        shift_insert(&mut node, 0, 100, 99);

        assert_eq!(node.key_count(), 3);
        assert_eq!(node.key_at(0), 100);
        assert_eq!(node.key_at(1), 200);
        assert_eq!(node.key_at(2), 300);
        // Left child of the insert offset is preserved
        assert_eq!(node.child_at(0), 10);
        assert_eq!(node.child_at(1), 99);
        assert_eq!(node.child_at(2), 11);
        assert_eq!(node.child_at(3), 12);
    }

    #[test]
    fn test_shift_insert_in_middle() {
        let mut node = internal_with(&[100, 300], &[10, 11, 12]);
        shift_insert(&mut node, 1, 200, 99);

        assert_eq!(node.key_count(), 3);
        assert_eq!(node.key_at(0), 100);
        assert_eq!(node.key_at(1), 200);
        assert_eq!(node.key_at(2), 300);
        assert_eq!(node.child_at(0), 10);
        assert_eq!(node.child_at(1), 11);
        assert_eq!(node.child_at(2), 99);
        assert_eq!(node.child_at(3), 12);
    }

    #[test]
    fn test_shift_insert_at_end() {
        let mut node = internal_with(&[100, 200], &[10, 11, 12]);
        shift_insert(&mut node, 2, 300, 99);

        assert_eq!(node.key_count(), 3);
        assert_eq!(node.key_at(2), 300);
        assert_eq!(node.child_at(2), 12);
        assert_eq!(node.child_at(3), 99);
    }
}
