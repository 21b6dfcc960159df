//! Storage engine for MeridianDB.
//!
//! This crate provides:
//! - File manager for page-level I/O over named data files
//! - Base-relation storage with fixed-width records and a scanner
//! - A disk-resident B+Tree secondary index over one attribute

mod btree;
mod disk;
mod record;
mod relation;

pub use btree::{
    index_file_name, BTreeIndex, IndexKey, IndexPager, InternalNode, KeyValue, LeafNode, MetaNode,
    RangeOp, StrKey, TreeStats, RELATION_NAME_SIZE,
};
pub use disk::{FileManager, FileManagerConfig};
pub use record::{Record, RecordId, RECORD_STRING_SIZE};
pub use relation::{RelationFile, RelationPage, RelationScan};
