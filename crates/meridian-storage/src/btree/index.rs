//! B+Tree index lifecycle and entry insertion.
//!
//! [`BTreeIndex`] is the public face: it owns one of three
//! monomorphized cores (int, double, or fixed string keys) selected
//! by the attribute type persisted in the meta page, and dispatches
//! dynamically typed [`KeyValue`] arguments to it.

use crate::btree::key::{IndexKey, KeyValue, StrKey};
use crate::btree::node::{InternalNode, LeafNode, MetaNode};
use crate::btree::pager::IndexPager;
use crate::btree::scan::{RangeOp, ScanState};
use crate::disk::FileManager;
use crate::record::{Record, RecordId};
use crate::relation::RelationFile;
use log::{debug, info, warn};
use meridian_buffer::BufferPool;
use meridian_common::page::{PageNo, INVALID_PAGE_NO};
use meridian_common::types::KeyType;
use meridian_common::{MeridianError, Result};
use std::cmp::Ordering;
use std::sync::Arc;

/// Page number of the meta page in every index file.
pub(crate) const META_PAGE_NO: PageNo = 1;

/// Page number of the root page as first allocated.
pub(crate) const INITIAL_ROOT_PAGE_NO: PageNo = 2;

/// Computes the index file name for a relation and attribute offset.
pub fn index_file_name(relation_name: &str, attr_byte_offset: u32) -> String {
    format!("{}.{}", relation_name, attr_byte_offset)
}

/// Statistics gathered by a full tree traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of node levels including the leaf level.
    pub height: u32,
    /// Number of internal nodes.
    pub internal_nodes: u64,
    /// Number of leaf nodes.
    pub leaf_nodes: u64,
    /// Number of entries across all leaves.
    pub entries: u64,
}

/// The monomorphized index core for one key type.
pub(crate) struct BTreeCore<K: IndexKey> {
    /// Buffer bridge for the index file.
    pub(crate) pager: IndexPager,
    /// Cached root page number; the meta page holds the same value.
    pub(crate) root_page_no: PageNo,
    /// Live scan cursor, if any. One scan per index at a time.
    pub(crate) scan: Option<ScanState<K>>,
}

impl<K: IndexKey> BTreeCore<K> {
    /// Opens an existing index file or creates and seeds a new one.
    fn open_or_create(
        relation: &RelationFile,
        files: Arc<FileManager>,
        pool: Arc<BufferPool>,
        attr_byte_offset: u32,
    ) -> Result<Self> {
        let relation_name = relation.name();
        let index_name = index_file_name(relation_name, attr_byte_offset);

        if attr_byte_offset as usize + K::WIDTH > Record::SIZE {
            return Err(MeridianError::BadIndexInfo(format!(
                "attribute at offset {} does not fit a {} byte record",
                attr_byte_offset,
                Record::SIZE
            )));
        }

        let existed = files.exists(&index_name);
        let file_id = files.open(&index_name)?;
        let pager = IndexPager::new(files, pool, file_id);

        if existed {
            let meta = MetaNode::from_bytes(pager.read_page(META_PAGE_NO)?);
            pager.unpin(META_PAGE_NO, false);

            if meta.relation_name() != relation_name {
                return Err(MeridianError::BadIndexInfo(format!(
                    "relation name: expected {}, found {}",
                    relation_name,
                    meta.relation_name()
                )));
            }
            if meta.attr_byte_offset() != attr_byte_offset {
                return Err(MeridianError::BadIndexInfo(format!(
                    "attribute offset: expected {}, found {}",
                    attr_byte_offset,
                    meta.attr_byte_offset()
                )));
            }
            if meta.attr_type() != Some(K::KEY_TYPE) {
                return Err(MeridianError::BadIndexInfo(format!(
                    "attribute type: expected {}, found {}",
                    K::KEY_TYPE,
                    meta.attr_type().map_or_else(|| "?".to_string(), |t| t.to_string())
                )));
            }

            let root_page_no = meta.root_page_no();
            debug!("opened index {} with root page {}", index_name, root_page_no);

            return Ok(Self {
                pager,
                root_page_no,
                scan: None,
            });
        }

        // Fresh file: meta page first, then the empty root
        let meta_page_no = pager.alloc_page()?;
        let meta = MetaNode::new(
            relation_name,
            attr_byte_offset,
            K::KEY_TYPE,
            INITIAL_ROOT_PAGE_NO,
        );
        pager.write_page(meta_page_no, meta.as_bytes())?;
        pager.unpin(meta_page_no, true);

        let root_page_no = pager.alloc_page()?;
        let root = InternalNode::<K>::new(1);
        pager.write_page(root_page_no, root.as_bytes())?;
        pager.unpin(root_page_no, true);

        if meta_page_no != META_PAGE_NO || root_page_no != INITIAL_ROOT_PAGE_NO {
            return Err(MeridianError::Internal(format!(
                "unexpected initial page layout: meta {} root {}",
                meta_page_no, root_page_no
            )));
        }

        let mut core = Self {
            pager,
            root_page_no,
            scan: None,
        };

        // Seed from the base relation
        let mut seeded = 0u64;
        for entry in relation.scan() {
            let (rid, record) = entry?;
            let bytes = record.to_bytes();
            let key = K::read_from(&bytes[attr_byte_offset as usize..]);
            core.insert(key, rid)?;
            seeded += 1;
        }
        info!("created index {}, seeded {} entries", index_name, seeded);

        Ok(core)
    }

    /// Inserts a `(key, rid)` pair, splitting nodes as needed.
    pub(crate) fn insert(&mut self, key: K, rid: RecordId) -> Result<()> {
        let root = InternalNode::<K>::from_bytes(self.pager.read_page(self.root_page_no)?);
        if root.child_at(0) == INVALID_PAGE_NO {
            return self.bootstrap(root, key, rid);
        }
        self.pager.unpin(self.root_page_no, false);

        let pos = self.locate_for_insert(key)?;

        let mut leaf = LeafNode::<K>::from_bytes(self.pager.read_page(pos.leaf_page_no)?);
        for slot in (pos.insert_slot..pos.end_of_records).rev() {
            let moved_key = leaf.key_at(slot);
            let moved_rid = leaf.rid_at(slot);
            leaf.set_key(slot + 1, moved_key);
            leaf.set_rid(slot + 1, moved_rid);
        }
        leaf.set_key(pos.insert_slot, key);
        leaf.set_rid(pos.insert_slot, rid);

        self.pager.write_page(pos.leaf_page_no, leaf.as_bytes())?;
        self.pager.unpin(pos.leaf_page_no, true);
        Ok(())
    }

    /// First insert into an empty tree: materialize two leaves under
    /// the root. The left leaf stays empty; the entry lands in slot 0
    /// of the right leaf, and the root routes on its key.
    fn bootstrap(&mut self, mut root: InternalNode<K>, key: K, rid: RecordId) -> Result<()> {
        let left_page_no = self.pager.alloc_page()?;
        let right_page_no = self.pager.alloc_page()?;

        let mut left = LeafNode::<K>::new();
        left.set_right_sibling(right_page_no);
        self.pager.write_page(left_page_no, left.as_bytes())?;
        self.pager.unpin(left_page_no, true);

        let mut right = LeafNode::<K>::new();
        right.set_key(0, key);
        right.set_rid(0, rid);
        self.pager.write_page(right_page_no, right.as_bytes())?;
        self.pager.unpin(right_page_no, true);

        root.set_child(0, left_page_no);
        root.set_key(0, key);
        root.set_child(1, right_page_no);
        self.pager.write_page(self.root_page_no, root.as_bytes())?;
        self.pager.unpin(self.root_page_no, true);
        Ok(())
    }

    /// Ends any live scan and flushes the index file.
    pub(crate) fn shutdown(&mut self) -> Result<()> {
        let _ = self.end_scan();
        self.pager.flush()
    }

    /// Validates the whole tree with a pre-order traversal.
    ///
    /// Checks routing bounds, in-node key ordering, uniform leaf
    /// depth, level arithmetic, fill limits, the leaf sibling chain,
    /// and agreement between the meta page and the cached root.
    /// Every key in a subtree must be strictly less than the
    /// separator above it and no less than the separator before it.
    pub(crate) fn check_tree(&self) -> Result<TreeStats> {
        let meta = MetaNode::from_bytes(self.pager.read_page(META_PAGE_NO)?);
        let meta_root = meta.root_page_no();
        self.pager.unpin(META_PAGE_NO, false);
        if meta_root != self.root_page_no {
            return Err(MeridianError::TreeCorrupted(format!(
                "meta page root {} disagrees with cached root {}",
                meta_root, self.root_page_no
            )));
        }

        let root = InternalNode::<K>::from_bytes(self.pager.read_page(self.root_page_no)?);
        let root_level = root.level();
        let empty = root.child_at(0) == INVALID_PAGE_NO;
        self.pager.unpin(self.root_page_no, false);

        let mut stats = TreeStats {
            height: root_level + 1,
            internal_nodes: 0,
            leaf_nodes: 0,
            entries: 0,
        };
        if empty {
            stats.internal_nodes = 1;
            return Ok(stats);
        }

        let mut leaves = Vec::new();
        self.check_node(
            self.root_page_no,
            root_level,
            None,
            None,
            true,
            &mut stats,
            &mut leaves,
        )?;

        // The sibling chain must visit exactly the in-order leaves
        for (i, &leaf_no) in leaves.iter().enumerate() {
            let leaf = LeafNode::<K>::from_bytes(self.pager.read_page(leaf_no)?);
            let sibling = leaf.right_sibling_raw();
            self.pager.unpin(leaf_no, false);

            let expected = if i + 1 < leaves.len() {
                leaves[i + 1]
            } else {
                INVALID_PAGE_NO
            };
            if sibling != expected {
                return Err(MeridianError::TreeCorrupted(format!(
                    "leaf {} links to {}, expected {}",
                    leaf_no, sibling, expected
                )));
            }
        }

        Ok(stats)
    }

    /// Recursive node check. `level == 0` means a leaf is expected.
    #[allow(clippy::too_many_arguments)]
    fn check_node(
        &self,
        page_no: PageNo,
        level: u32,
        lower: Option<K>,
        upper: Option<K>,
        leftmost: bool,
        stats: &mut TreeStats,
        leaves: &mut Vec<PageNo>,
    ) -> Result<()> {
        let corrupt = |msg: String| MeridianError::TreeCorrupted(msg);

        if level == 0 {
            let leaf = LeafNode::<K>::from_bytes(self.pager.read_page(page_no)?);
            self.pager.unpin(page_no, false);

            let count = leaf.occupied_count();
            if count == 0 && !leftmost {
                return Err(corrupt(format!("non-leftmost leaf {} is empty", page_no)));
            }
            for slot in count..LeafNode::<K>::CAPACITY {
                if leaf.is_occupied(slot) {
                    return Err(corrupt(format!("leaf {} has a hole before slot {}", page_no, slot)));
                }
            }

            let mut prev: Option<K> = None;
            for slot in 0..count {
                let key = leaf.key_at(slot);
                if let Some(p) = prev {
                    if p.key_cmp(&key) == Ordering::Greater {
                        return Err(corrupt(format!("leaf {} keys out of order", page_no)));
                    }
                }
                if let Some(lo) = lower {
                    if key.key_cmp(&lo) == Ordering::Less {
                        return Err(corrupt(format!("leaf {} key below subtree bound", page_no)));
                    }
                }
                if let Some(hi) = upper {
                    if key.key_cmp(&hi) != Ordering::Less {
                        return Err(corrupt(format!(
                            "leaf {} key at or above subtree bound",
                            page_no
                        )));
                    }
                }
                prev = Some(key);
            }

            stats.leaf_nodes += 1;
            stats.entries += count as u64;
            leaves.push(page_no);
            return Ok(());
        }

        let node = InternalNode::<K>::from_bytes(self.pager.read_page(page_no)?);
        self.pager.unpin(page_no, false);

        if node.level() != level {
            return Err(corrupt(format!(
                "internal {} at level {}, expected {}",
                page_no,
                node.level(),
                level
            )));
        }

        let key_count = node.key_count();
        if key_count == 0 {
            return Err(corrupt(format!("internal {} holds no keys", page_no)));
        }
        for slot in (key_count + 1)..=InternalNode::<K>::CAPACITY {
            if node.child_at(slot) != INVALID_PAGE_NO {
                return Err(corrupt(format!(
                    "internal {} has a child beyond its fill at slot {}",
                    page_no, slot
                )));
            }
        }
        for slot in 1..key_count {
            if node.key_at(slot - 1).key_cmp(&node.key_at(slot)) == Ordering::Greater {
                return Err(corrupt(format!("internal {} keys out of order", page_no)));
            }
        }

        stats.internal_nodes += 1;

        for slot in 0..=key_count {
            let child = node.child_at(slot);
            let child_lower = if slot == 0 { lower } else { Some(node.key_at(slot - 1)) };
            let child_upper = if slot == key_count {
                upper
            } else {
                Some(node.key_at(slot))
            };
            self.check_node(
                child,
                level - 1,
                child_lower,
                child_upper,
                leftmost && slot == 0,
                stats,
                leaves,
            )?;
        }

        Ok(())
    }
}

/// Monomorphized cores behind the public index type.
enum CoreDispatch {
    Int(BTreeCore<i32>),
    Double(BTreeCore<f64>),
    Str(BTreeCore<StrKey>),
}

impl CoreDispatch {
    fn key_type(&self) -> KeyType {
        match self {
            CoreDispatch::Int(_) => KeyType::Int,
            CoreDispatch::Double(_) => KeyType::Double,
            CoreDispatch::Str(_) => KeyType::Str,
        }
    }
}

/// A disk-resident B+Tree secondary index over one attribute of a
/// base relation.
///
/// Opening a name that already exists verifies the stored metadata
/// against the arguments; creating a new index seeds it by scanning
/// the base relation. At most one scan is live per index instance.
pub struct BTreeIndex {
    /// Computed index file name, `<relation>.<attr_byte_offset>`.
    index_name: String,
    /// File manager, kept to close the index file on drop.
    files: Arc<FileManager>,
    /// The typed core.
    core: CoreDispatch,
}

impl BTreeIndex {
    /// Opens or creates the index for `relation` on the attribute at
    /// `attr_byte_offset`.
    pub fn new(
        relation: &RelationFile,
        files: Arc<FileManager>,
        pool: Arc<BufferPool>,
        attr_byte_offset: u32,
        attr_type: KeyType,
    ) -> Result<Self> {
        let index_name = index_file_name(relation.name(), attr_byte_offset);

        let core = match attr_type {
            KeyType::Int => CoreDispatch::Int(BTreeCore::open_or_create(
                relation,
                files.clone(),
                pool,
                attr_byte_offset,
            )?),
            KeyType::Double => CoreDispatch::Double(BTreeCore::open_or_create(
                relation,
                files.clone(),
                pool,
                attr_byte_offset,
            )?),
            KeyType::Str => CoreDispatch::Str(BTreeCore::open_or_create(
                relation,
                files.clone(),
                pool,
                attr_byte_offset,
            )?),
        };

        Ok(Self {
            index_name,
            files,
            core,
        })
    }

    /// Returns the computed index file name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the key type this index was built over.
    pub fn key_type(&self) -> KeyType {
        self.core.key_type()
    }

    fn type_mismatch(expected: KeyType, actual: KeyType) -> MeridianError {
        MeridianError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Inserts a `(key, rid)` entry. Duplicate keys are legal and
    /// keep insertion order among equals.
    pub fn insert_entry(&mut self, key: KeyValue, rid: RecordId) -> Result<()> {
        let expected = self.core.key_type();
        match (&mut self.core, key) {
            (CoreDispatch::Int(core), KeyValue::Int(k)) => core.insert(k, rid),
            (CoreDispatch::Double(core), KeyValue::Double(k)) => core.insert(k, rid),
            (CoreDispatch::Str(core), KeyValue::Str(k)) => core.insert(k, rid),
            _ => Err(Self::type_mismatch(expected, key.key_type())),
        }
    }

    /// Begins a bounded scan. Any live scan is ended first.
    ///
    /// The lower operator must be GT or GTE and the upper operator LT
    /// or LTE, the lower bound must not exceed the upper bound, and
    /// at least one entry must satisfy the range.
    pub fn start_scan(
        &mut self,
        low: KeyValue,
        low_op: RangeOp,
        high: KeyValue,
        high_op: RangeOp,
    ) -> Result<()> {
        // Operator validation precedes bound type checking
        if !matches!(low_op, RangeOp::GT | RangeOp::GTE)
            || !matches!(high_op, RangeOp::LT | RangeOp::LTE)
        {
            return Err(MeridianError::BadOperator);
        }

        let expected = self.core.key_type();
        match (&mut self.core, low, high) {
            (CoreDispatch::Int(core), KeyValue::Int(l), KeyValue::Int(h)) => {
                core.start_scan(l, low_op, h, high_op)
            }
            (CoreDispatch::Double(core), KeyValue::Double(l), KeyValue::Double(h)) => {
                core.start_scan(l, low_op, h, high_op)
            }
            (CoreDispatch::Str(core), KeyValue::Str(l), KeyValue::Str(h)) => {
                core.start_scan(l, low_op, h, high_op)
            }
            _ => {
                let actual = if low.key_type() != expected {
                    low.key_type()
                } else {
                    high.key_type()
                };
                Err(Self::type_mismatch(expected, actual))
            }
        }
    }

    /// Returns the record id of the next entry matching the scan.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        match &mut self.core {
            CoreDispatch::Int(core) => core.scan_next(),
            CoreDispatch::Double(core) => core.scan_next(),
            CoreDispatch::Str(core) => core.scan_next(),
        }
    }

    /// Ends the live scan, releasing its pinned page.
    pub fn end_scan(&mut self) -> Result<()> {
        match &mut self.core {
            CoreDispatch::Int(core) => core.end_scan(),
            CoreDispatch::Double(core) => core.end_scan(),
            CoreDispatch::Str(core) => core.end_scan(),
        }
    }

    /// Runs the debug traversal, validating tree invariants.
    pub fn check_tree(&self) -> Result<TreeStats> {
        match &self.core {
            CoreDispatch::Int(core) => core.check_tree(),
            CoreDispatch::Double(core) => core.check_tree(),
            CoreDispatch::Str(core) => core.check_tree(),
        }
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        let result = match &mut self.core {
            CoreDispatch::Int(core) => core.shutdown(),
            CoreDispatch::Double(core) => core.shutdown(),
            CoreDispatch::Str(core) => core.shutdown(),
        };
        if let Err(e) = result {
            warn!("error flushing index {}: {}", self.index_name, e);
        }
        if let Err(e) = self.files.close(&self.index_name) {
            warn!("error closing index {}: {}", self.index_name, e);
        }
    }
}
