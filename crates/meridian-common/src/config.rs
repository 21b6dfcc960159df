//! Configuration structures for MeridianDB.

use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the index engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data and index files.
    pub data_dir: PathBuf,
    /// Page size in bytes.
    pub page_size: usize,
    /// Buffer pool size in number of pages.
    pub buffer_pool_pages: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            page_size: PAGE_SIZE,
            buffer_pool_pages: 1024, // 8 MB with 8 KB pages
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_pages * self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.page_size, PAGE_SIZE);
        assert_eq!(config.buffer_pool_pages, 1024);
        assert!(config.fsync_enabled);
    }

    #[test]
    fn test_buffer_pool_size_bytes() {
        let config = StorageConfig::default();
        assert_eq!(config.buffer_pool_size_bytes(), 1024 * PAGE_SIZE);
        assert_eq!(config.buffer_pool_size_bytes(), 8 * 1024 * 1024);
    }

    #[test]
    fn test_storage_config_custom() {
        let config = StorageConfig {
            data_dir: PathBuf::from("/var/lib/meridian"),
            page_size: 16384,
            buffer_pool_pages: 4096,
            fsync_enabled: false,
        };
        assert_eq!(config.buffer_pool_size_bytes(), 4096 * 16384);
        assert!(!config.fsync_enabled);
    }

    #[test]
    fn test_storage_config_serde_roundtrip() {
        let config = StorageConfig {
            data_dir: PathBuf::from("/tmp/meridian-test"),
            page_size: PAGE_SIZE,
            buffer_pool_pages: 256,
            fsync_enabled: false,
        };

        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(config.data_dir, deserialized.data_dir);
        assert_eq!(config.page_size, deserialized.page_size);
        assert_eq!(config.buffer_pool_pages, deserialized.buffer_pool_pages);
        assert_eq!(config.fsync_enabled, deserialized.fsync_enabled);
    }
}
