//! Buffer bridge between the index core and the shared buffer pool.
//!
//! Binds one index file to the file manager and buffer pool, exposing
//! pin-based page access: `read_page` and `alloc_page` return with the
//! page pinned, and the caller must balance each with exactly one
//! `unpin` on every exit path. Pages modified through `write_page` are
//! marked dirty when unpinned with `dirty = true`.

use crate::disk::FileManager;
use meridian_buffer::BufferPool;
use meridian_common::page::{PageId, PageNo, PAGE_SIZE};
use meridian_common::{MeridianError, Result};
use std::sync::Arc;

/// Pin-discipline page access for a single index file.
pub struct IndexPager {
    /// File manager for disk I/O.
    files: Arc<FileManager>,
    /// Shared buffer pool.
    pool: Arc<BufferPool>,
    /// File ID of the index file.
    file_id: u32,
}

impl IndexPager {
    /// Creates a pager over an open index file.
    pub fn new(files: Arc<FileManager>, pool: Arc<BufferPool>, file_id: u32) -> Self {
        Self {
            files,
            pool,
            file_id,
        }
    }

    /// Returns the file ID this pager serves.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    #[inline]
    fn page_id(&self, page_no: PageNo) -> PageId {
        PageId::new(self.file_id, page_no)
    }

    /// Reads a page, pinning it, and returns a copy of its bytes.
    ///
    /// Loads the page from disk on a pool miss; a dirty page evicted
    /// to make room is written back to disk first. The pin is held
    /// until the caller's matching `unpin`.
    pub fn read_page(&self, page_no: PageNo) -> Result<[u8; PAGE_SIZE]> {
        let page_id = self.page_id(page_no);

        if let Some(frame) = self.pool.fetch_page(page_id) {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            return Ok(data);
        }

        let disk_data = self.files.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &disk_data)?;
        if let Some(evicted_page) = evicted {
            self.files.write_page(evicted_page.page_id, &evicted_page.data)?;
        }

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        Ok(data)
    }

    /// Allocates a new zero-filled page at the end of the index file.
    ///
    /// The page comes back pinned; the caller must `unpin` it.
    pub fn alloc_page(&self) -> Result<PageNo> {
        let page_no = self.files.allocate_page(self.file_id)?;
        let page_id = self.page_id(page_no);

        let (_, evicted) = self.pool.new_page(page_id)?;
        if let Some(evicted_page) = evicted {
            self.files.write_page(evicted_page.page_id, &evicted_page.data)?;
        }

        Ok(page_no)
    }

    /// Writes page bytes into the pinned frame for this page.
    ///
    /// The caller must currently hold a pin on the page (from
    /// `read_page` or `alloc_page`); the frame is marked dirty.
    pub fn write_page(&self, page_no: PageNo, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let page_id = self.page_id(page_no);

        let frame = self.pool.fetch_page(page_id).ok_or_else(|| {
            MeridianError::Internal(format!("write to unpinned index page {}", page_id))
        })?;
        frame.copy_from(data);
        self.pool.unpin_page(page_id, true);
        Ok(())
    }

    /// Releases one pin on the page.
    ///
    /// `dirty` records whether the caller modified the page.
    pub fn unpin(&self, page_no: PageNo, dirty: bool) {
        self.pool.unpin_page(self.page_id(page_no), dirty);
    }

    /// Writes all dirty pages of this index file back to disk.
    pub fn flush(&self) -> Result<()> {
        let file_id = self.file_id;
        self.pool.flush_matching(
            |pid| pid.file_id == file_id,
            |pid, data| {
                let mut page = [0u8; PAGE_SIZE];
                page.copy_from_slice(data);
                self.files.write_page(pid, &page)
            },
        )?;
        self.files.flush_file(file_id)
    }
}
