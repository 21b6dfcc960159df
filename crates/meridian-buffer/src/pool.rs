//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{ClockReplacer, Replacer};
use meridian_common::page::{PageId, PAGE_SIZE};
use meridian_common::{MeridianError, Result, StorageConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use sysinfo::System;

/// A dirty page that was evicted from the buffer pool.
///
/// The caller must write this to disk before reusing the frame's
/// contents, otherwise the modification is lost.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_pages,
        }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for new pages
/// - Clock replacement for eviction
/// - Pin counting: a pinned page is never evicted
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: Mutex<HashMap<PageId, FrameId>>,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: Mutex::new(HashMap::with_capacity(num_frames)),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so caching stays useful on small machines.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.lock().len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.lock().contains_key(&page_id)
    }

    /// Fetches a page from the buffer pool.
    ///
    /// Returns None if the page is not resident. The page is pinned
    /// before being returned; the caller owes one `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = *self.page_table.lock().get(&page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        Some(frame)
    }

    /// Allocates a frame for a new page.
    ///
    /// Tries the free list first, then evicts an unpinned page.
    /// Returns the frame ID and any evicted dirty page.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop() {
                return Ok((frame_id, None));
            }
        }

        let victim_id = self.replacer.evict().ok_or(MeridianError::BufferPoolFull)?;
        let frame = &self.frames[victim_id.0 as usize];

        // Capture evicted page contents if dirty
        let evicted = if frame.is_dirty() {
            frame.page_id().map(|page_id| {
                let mut data = Box::new([0u8; PAGE_SIZE]);
                frame.copy_to(&mut *data);
                EvictedPage { page_id, data }
            })
        } else {
            None
        };

        if let Some(old_page_id) = frame.page_id() {
            self.page_table.lock().remove(&old_page_id);
        }

        Ok((victim_id, evicted))
    }

    /// Inserts a new page into the buffer pool.
    ///
    /// If the page already exists, the existing frame is returned.
    /// The page is pinned before being returned. `evicted` carries
    /// any dirty page displaced to make room; the caller must write
    /// it to disk.
    pub fn new_page(&self, page_id: PageId) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(&frame_id) = self.page_table.lock().get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.record_access(frame_id);

        self.page_table.lock().insert(page_id, frame_id);

        Ok((frame, evicted))
    }

    /// Loads page data into the buffer pool.
    ///
    /// Used when a page is read from disk. Returns the pinned frame
    /// and any evicted dirty page.
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(page_id)?;
        frame.copy_from(data);
        Ok((frame, evicted))
    }

    /// Unpins a page in the buffer pool.
    ///
    /// When the pin count drops to zero the page becomes evictable.
    /// Returns false if the page is not resident.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let frame_id = match self.page_table.lock().get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id.0 as usize];

        if is_dirty {
            frame.set_dirty(true);
        }

        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Flushes a page through the provided callback if it is dirty.
    ///
    /// Returns true if the page was flushed.
    pub fn flush_page<F>(&self, page_id: PageId, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let frame_id = match self.page_table.lock().get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(false),
        };
        let frame = &self.frames[frame_id.0 as usize];

        if frame.is_dirty() {
            let data = frame.read_data();
            flush_fn(page_id, &**data)?;
            drop(data);
            frame.set_dirty(false);
            return Ok(true);
        }
        Ok(false)
    }

    /// Flushes all dirty pages for which the filter returns true.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_matching<P, F>(&self, mut pred: P, mut flush_fn: F) -> Result<usize>
    where
        P: FnMut(PageId) -> bool,
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let entries: Vec<(PageId, FrameId)> = self
            .page_table
            .lock()
            .iter()
            .map(|(&page_id, &frame_id)| (page_id, frame_id))
            .collect();

        let mut flushed = 0;
        for (page_id, frame_id) in entries {
            if !pred(page_id) {
                continue;
            }
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &**data)?;
                drop(data);
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Flushes all dirty pages.
    pub fn flush_all<F>(&self, flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        self.flush_matching(|_| true, flush_fn)
    }

    /// Deletes a page from the buffer pool.
    ///
    /// Returns false if the page is pinned or not resident.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut table = self.page_table.lock();
        if let Some(&frame_id) = table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                return false;
            }

            table.remove(&page_id);
            self.replacer.remove(frame_id);
            frame.reset();
            self.free_list.lock().push(frame_id);
            return true;
        }
        false
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_count = 0;
        let mut dirty_count = 0;

        let table = self.page_table.lock();
        for &frame_id in table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_list.lock().len(),
            used_frames: table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_pool(num_frames: usize) -> BufferPool {
        BufferPool::new(BufferPoolConfig { num_frames })
    }

    #[test]
    fn test_buffer_pool_new() {
        let pool = create_test_pool(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_buffer_pool_config_from_storage_config() {
        let storage = StorageConfig {
            buffer_pool_pages: 99,
            ..StorageConfig::default()
        };
        let config = BufferPoolConfig::from(&storage);
        assert_eq!(config.num_frames, 99);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        let (frame, evicted) = pool.new_page(page_id).unwrap();

        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 9);
        assert_eq!(pool.page_count(), 1);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_fetch_existing() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
    }

    #[test]
    fn test_buffer_pool_fetch_nonexistent() {
        let pool = create_test_pool(10);
        assert!(pool.fetch_page(PageId::new(0, 1)).is_none());
    }

    #[test]
    fn test_buffer_pool_unpin() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        let (frame, _) = pool.new_page(page_id).unwrap();
        assert!(frame.is_pinned());

        pool.unpin_page(page_id, false);
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_buffer_pool_unpin_nonexistent() {
        let pool = create_test_pool(10);
        assert!(!pool.unpin_page(PageId::new(0, 99), false));
    }

    #[test]
    fn test_buffer_pool_dirty_tracking() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, true);

        let frame = pool.fetch_page(page_id).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_eviction() {
        let pool = create_test_pool(3);

        for i in 1..=3 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, false);
        }

        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.page_count(), 3);

        // Adding one more evicts a clean page
        let new_page_id = PageId::new(0, 99);
        let (_, evicted) = pool.new_page(new_page_id).unwrap();

        assert!(evicted.is_none());
        assert_eq!(pool.page_count(), 3);
        assert!(pool.contains(new_page_id));
    }

    #[test]
    fn test_buffer_pool_eviction_dirty() {
        let pool = create_test_pool(1);
        let page_id1 = PageId::new(0, 1);

        let (frame, _) = pool.new_page(page_id1).unwrap();
        frame.write_data()[0] = 0xAB;
        pool.unpin_page(page_id1, true);

        let page_id2 = PageId::new(0, 2);
        let (_, evicted) = pool.new_page(page_id2).unwrap();

        let evicted = evicted.expect("dirty page should be handed back on eviction");
        assert_eq!(evicted.page_id, page_id1);
        assert_eq!(evicted.data[0], 0xAB);
    }

    #[test]
    fn test_buffer_pool_full_all_pinned() {
        let pool = create_test_pool(2);

        pool.new_page(PageId::new(0, 1)).unwrap();
        pool.new_page(PageId::new(0, 2)).unwrap();

        let result = pool.new_page(PageId::new(0, 3));
        assert!(matches!(result, Err(MeridianError::BufferPoolFull)));
    }

    #[test]
    fn test_buffer_pool_delete_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        assert!(pool.delete_page(page_id));
        assert!(!pool.contains(page_id));
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_buffer_pool_delete_pinned_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        // Still pinned

        assert!(!pool.delete_page(page_id));
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_load_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);
        let data = [0xABu8; PAGE_SIZE];

        let (frame, _) = pool.load_page(page_id, &data).unwrap();

        let frame_data = frame.read_data();
        assert_eq!(frame_data[0], 0xAB);
        assert_eq!(frame_data[PAGE_SIZE - 1], 0xAB);
    }

    #[test]
    fn test_buffer_pool_flush_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, true);

        let mut flushed_pages = vec![];
        let result = pool.flush_page(page_id, |pid, _data| {
            flushed_pages.push(pid);
            Ok(())
        });

        assert!(result.unwrap());
        assert_eq!(flushed_pages, vec![page_id]);

        let frame = pool.fetch_page(page_id).unwrap();
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_flush_all() {
        let pool = create_test_pool(10);

        for i in 1..=5 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, true);
        }

        let mut flushed_count = 0;
        let result = pool.flush_all(|_pid, _data| {
            flushed_count += 1;
            Ok(())
        });

        assert_eq!(result.unwrap(), 5);
        assert_eq!(flushed_count, 5);
    }

    #[test]
    fn test_buffer_pool_flush_matching() {
        let pool = create_test_pool(10);

        // Dirty pages in two files
        for i in 1..=3 {
            let page_id = PageId::new(1, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, true);
        }
        for i in 1..=2 {
            let page_id = PageId::new(2, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, true);
        }

        let flushed = pool
            .flush_matching(|pid| pid.file_id == 1, |_pid, _data| Ok(()))
            .unwrap();
        assert_eq!(flushed, 3);

        // File 2 pages are still dirty
        let flushed = pool.flush_all(|_pid, _data| Ok(())).unwrap();
        assert_eq!(flushed, 2);
    }

    #[test]
    fn test_buffer_pool_duplicate_new_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let (frame, evicted) = pool.new_page(page_id).unwrap();

        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(page_id));
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn test_buffer_pool_stats() {
        let pool = create_test_pool(10);

        for i in 1..=5 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            if i % 2 == 1 {
                pool.unpin_page(page_id, true); // Dirty, unpinned
            }
            // Even pages remain pinned
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 5);
        assert_eq!(stats.used_frames, 5);
        assert_eq!(stats.pinned_frames, 2); // Pages 2, 4
        assert_eq!(stats.dirty_frames, 3); // Pages 1, 3, 5
    }

    #[test]
    fn test_buffer_pool_pinned_page_survives_pressure() {
        let pool = create_test_pool(2);
        let keep = PageId::new(0, 1);

        let (frame, _) = pool.new_page(keep).unwrap();
        frame.write_data()[0] = 0x5A;
        // Keep pinned while cycling other pages through the pool

        for i in 2..=6 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, false);
        }

        assert!(pool.contains(keep));
        let frame = pool.fetch_page(keep).unwrap();
        assert_eq!(frame.read_data()[0], 0x5A);
    }
}
