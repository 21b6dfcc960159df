//! Bounded range scans over the leaf sibling chain.
//!
//! One scan may be live per index instance. The cursor keeps the
//! current leaf pinned (and a copy of its bytes) between calls;
//! crossing to the right sibling unpins the old page and pins the
//! new one, and ending or exhausting the scan releases the pin.

use crate::btree::index::BTreeCore;
use crate::btree::key::IndexKey;
use crate::btree::node::LeafNode;
use crate::record::RecordId;
use meridian_common::page::PageNo;
use meridian_common::{MeridianError, Result};
use std::cmp::Ordering;

/// Comparison operator for scan bounds.
///
/// The lower bound takes GT or GTE; the upper bound takes LT or LTE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// Less than.
    LT,
    /// Less than or equal.
    LTE,
    /// Greater than or equal.
    GTE,
    /// Greater than.
    GT,
}

/// Cursor state for a live scan.
pub(crate) struct ScanState<K: IndexKey> {
    /// Current leaf page and a copy of its bytes, or None once the
    /// cursor has walked off the right end of the chain.
    pub(crate) current: Option<(PageNo, LeafNode<K>)>,
    /// Slot of the next entry to emit.
    pub(crate) next_entry: usize,
    /// Lower bound.
    pub(crate) low: K,
    /// Upper bound.
    pub(crate) high: K,
    /// Lower bound operator (GT or GTE).
    pub(crate) low_op: RangeOp,
    /// Upper bound operator (LT or LTE).
    pub(crate) high_op: RangeOp,
}

impl<K: IndexKey> BTreeCore<K> {
    /// Positions a fresh cursor on the first entry satisfying the
    /// lower bound, leaving that leaf pinned.
    pub(crate) fn start_scan(
        &mut self,
        low: K,
        low_op: RangeOp,
        high: K,
        high_op: RangeOp,
    ) -> Result<()> {
        if self.scan.is_some() {
            self.end_scan()?;
        }

        if !matches!(low_op, RangeOp::GT | RangeOp::GTE)
            || !matches!(high_op, RangeOp::LT | RangeOp::LTE)
        {
            return Err(MeridianError::BadOperator);
        }
        if low.key_cmp(&high) == Ordering::Greater {
            return Err(MeridianError::BadRange);
        }

        let pos = self.locate_for_scan(low)?;
        debug_assert_eq!(pos.prev_leaf_page_no, pos.leaf_page_no);

        let mut page_no = pos.leaf_page_no;
        let mut leaf = LeafNode::<K>::from_bytes(self.pager.read_page(page_no)?);
        let mut next_entry = pos.insert_slot;

        // Positioned past the occupied prefix: move to the sibling
        if next_entry >= LeafNode::<K>::CAPACITY || !leaf.is_occupied(next_entry) {
            let sibling = leaf.right_sibling();
            self.pager.unpin(page_no, false);
            match sibling {
                Some(sib) => {
                    page_no = sib;
                    leaf = LeafNode::<K>::from_bytes(self.pager.read_page(page_no)?);
                    next_entry = 0;
                    if !leaf.is_occupied(0) {
                        self.pager.unpin(page_no, false);
                        return Err(MeridianError::NoSuchKey);
                    }
                }
                None => return Err(MeridianError::NoSuchKey),
            }
        }

        // A strict lower bound skips the run of entries equal to it
        if low_op == RangeOp::GT {
            while leaf.key_at(next_entry).key_cmp(&low) == Ordering::Equal {
                if next_entry + 1 >= LeafNode::<K>::CAPACITY || !leaf.is_occupied(next_entry + 1) {
                    let sibling = leaf.right_sibling();
                    self.pager.unpin(page_no, false);
                    match sibling {
                        Some(sib) => {
                            page_no = sib;
                            leaf = LeafNode::<K>::from_bytes(self.pager.read_page(page_no)?);
                            next_entry = 0;
                        }
                        None => return Err(MeridianError::NoSuchKey),
                    }
                } else {
                    next_entry += 1;
                }
            }
        }

        // The first candidate must satisfy the upper bound
        let first_key = leaf.key_at(next_entry);
        let out_of_range = match high_op {
            RangeOp::LT => first_key.key_cmp(&high) != Ordering::Less,
            _ => first_key.key_cmp(&high) == Ordering::Greater,
        };
        if out_of_range {
            self.pager.unpin(page_no, false);
            return Err(MeridianError::NoSuchKey);
        }

        self.scan = Some(ScanState {
            current: Some((page_no, leaf)),
            next_entry,
            low,
            high,
            low_op,
            high_op,
        });
        Ok(())
    }

    /// Emits the record id under the cursor and advances it.
    pub(crate) fn scan_next(&mut self) -> Result<RecordId> {
        let state = self
            .scan
            .as_mut()
            .ok_or(MeridianError::ScanNotInitialized)?;

        let (page_no, key, rid, page_exhausted, sibling) = match &state.current {
            Some((page_no, leaf)) => {
                let slot = state.next_entry;
                let exhausted =
                    slot + 1 >= LeafNode::<K>::CAPACITY || !leaf.is_occupied(slot + 1);
                (
                    *page_no,
                    leaf.key_at(slot),
                    leaf.rid_at(slot),
                    exhausted,
                    leaf.right_sibling(),
                )
            }
            None => return Err(MeridianError::IndexScanCompleted),
        };

        let past_high = match state.high_op {
            RangeOp::LT => key.key_cmp(&state.high) != Ordering::Less,
            _ => key.key_cmp(&state.high) == Ordering::Greater,
        };
        if past_high {
            self.pager.unpin(page_no, false);
            state.current = None;
            return Err(MeridianError::IndexScanCompleted);
        }

        debug_assert!(match state.low_op {
            RangeOp::GT => key.key_cmp(&state.low) == Ordering::Greater,
            RangeOp::GTE => key.key_cmp(&state.low) != Ordering::Less,
            _ => true,
        });
        debug_assert!(rid.is_valid());

        // Advance, crossing the sibling chain when this page is done
        if page_exhausted {
            self.pager.unpin(page_no, false);
            match sibling {
                Some(sib) => {
                    let next_leaf = LeafNode::<K>::from_bytes(self.pager.read_page(sib)?);
                    state.current = Some((sib, next_leaf));
                    state.next_entry = 0;
                }
                None => state.current = None,
            }
        } else {
            state.next_entry += 1;
        }

        Ok(rid)
    }

    /// Ends the live scan, unpinning its page and clearing state.
    pub(crate) fn end_scan(&mut self) -> Result<()> {
        let state = self.scan.take().ok_or(MeridianError::ScanNotInitialized)?;
        if let Some((page_no, _)) = state.current {
            self.pager.unpin(page_no, false);
        }
        Ok(())
    }
}
