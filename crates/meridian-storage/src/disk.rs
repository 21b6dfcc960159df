//! File manager for page-level I/O over named data files.
//!
//! Every data file (the base relation, each index) is registered by
//! name and addressed by a small integer file ID. Pages within a file
//! are numbered from 1 so that page number 0 stays free as the "no
//! page" sentinel used throughout the node layouts.

use meridian_common::page::{PageId, PageNo, INVALID_PAGE_NO, PAGE_SIZE};
use meridian_common::{MeridianError, Result, StorageConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the file manager.
#[derive(Debug, Clone)]
pub struct FileManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for FileManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for FileManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Handle for an open data file.
struct FileHandle {
    /// The underlying file.
    file: File,
    /// Path to the file.
    path: PathBuf,
    /// Number of allocated pages (page numbers 1..=num_pages).
    num_pages: u32,
}

/// Registry of open files.
struct Registry {
    /// Open file handles keyed by file ID.
    files: HashMap<u32, FileHandle>,
    /// File IDs keyed by file name.
    by_name: HashMap<String, u32>,
    /// Next file ID to hand out.
    next_file_id: u32,
}

/// Manages reading and writing pages of named data files.
pub struct FileManager {
    /// Configuration.
    config: FileManagerConfig,
    /// Open file registry.
    registry: Mutex<Registry>,
}

impl FileManager {
    /// Creates a new file manager, creating the data directory if needed.
    pub fn new(config: FileManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            registry: Mutex::new(Registry {
                files: HashMap::new(),
                by_name: HashMap::new(),
                next_file_id: 0,
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Generates the path for a named file.
    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    /// Returns true if the named file exists on disk.
    pub fn exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    /// Opens the named file, creating it if it does not exist.
    ///
    /// Returns the file ID. Reopening an already-open name returns
    /// the same ID.
    pub fn open(&self, name: &str) -> Result<u32> {
        let mut registry = self.registry.lock();

        if let Some(&file_id) = registry.by_name.get(name) {
            return Ok(file_id);
        }

        let path = self.file_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        let file_id = registry.next_file_id;
        registry.next_file_id += 1;

        registry.files.insert(
            file_id,
            FileHandle {
                file,
                path,
                num_pages,
            },
        );
        registry.by_name.insert(name.to_string(), file_id);

        Ok(file_id)
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        if page_id.page_no == INVALID_PAGE_NO {
            return Err(MeridianError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        let mut registry = self.registry.lock();
        let handle = registry
            .files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| MeridianError::IoError(format!("file {} not open", page_id.file_id)))?;

        if page_id.page_no > handle.num_pages {
            return Err(MeridianError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        let offset = (page_id.page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        if page_id.page_no == INVALID_PAGE_NO {
            return Err(MeridianError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        let mut registry = self.registry.lock();
        let handle = registry
            .files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| MeridianError::IoError(format!("file {} not open", page_id.file_id)))?;

        let offset = (page_id.page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        if page_id.page_no > handle.num_pages {
            handle.num_pages = page_id.page_no;
        }

        Ok(())
    }

    /// Allocates a new page at the end of the file.
    ///
    /// The page is zero-filled on disk. Returns its 1-based page number.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageNo> {
        let mut registry = self.registry.lock();
        let handle = registry
            .files
            .get_mut(&file_id)
            .ok_or_else(|| MeridianError::IoError(format!("file {} not open", file_id)))?;

        let page_no = handle.num_pages + 1;

        let offset = (page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_no;

        Ok(page_no)
    }

    /// Returns the number of allocated pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let registry = self.registry.lock();
        let handle = registry
            .files
            .get(&file_id)
            .ok_or_else(|| MeridianError::IoError(format!("file {} not open", file_id)))?;

        Ok(handle.num_pages)
    }

    /// Syncs a single file to disk.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        let registry = self.registry.lock();
        if let Some(handle) = registry.files.get(&file_id) {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Syncs all open files to disk.
    pub fn flush_all(&self) -> Result<()> {
        let registry = self.registry.lock();
        for handle in registry.files.values() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes a named file, syncing it first.
    pub fn close(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.lock();
        if let Some(file_id) = registry.by_name.remove(name) {
            if let Some(handle) = registry.files.remove(&file_id) {
                handle.file.sync_all()?;
            }
        }
        Ok(())
    }

    /// Deletes a named file from disk, closing it if open.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.close(name)?;
        let path = self.file_path(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Returns the on-disk path of an open file.
    pub fn path_of(&self, file_id: u32) -> Option<PathBuf> {
        let registry = self.registry.lock();
        registry.files.get(&file_id).map(|h| h.path.clone())
    }
}

impl Drop for FileManager {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}
