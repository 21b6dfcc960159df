//! Buffer frame management.

use meridian_common::page::{PageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Sentinel value indicating no page is loaded in the frame.
const NO_PAGE: u64 = u64::MAX;

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Invalid frame ID.
    pub const INVALID: FrameId = FrameId(u32::MAX);

    /// Returns true if this is a valid frame ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A frame in the buffer pool holding a single page.
///
/// Each frame contains the page bytes plus the metadata the pool
/// needs for replacement: a pin count (pages with a nonzero pin count
/// are never evicted) and a dirty flag (evicted dirty pages must be
/// written back by the caller).
pub struct BufferFrame {
    /// Frame identifier.
    frame_id: FrameId,
    /// The page currently stored in this frame (packed as u64, NO_PAGE = none).
    page_id: AtomicU64,
    /// Page data buffer.
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    /// Number of users currently accessing this page.
    pin_count: AtomicU32,
    /// Whether the page has been modified since it was loaded.
    is_dirty: AtomicBool,
}

impl BufferFrame {
    /// Creates a new empty buffer frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU64::new(NO_PAGE),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID currently stored in this frame.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        let packed = self.page_id.load(Ordering::Acquire);
        if packed == NO_PAGE {
            None
        } else {
            Some(PageId::from_u64(packed))
        }
    }

    /// Sets the page ID for this frame.
    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        let packed = match page_id {
            Some(pid) => pid.as_u64(),
            None => NO_PAGE,
        };
        self.page_id.store(packed, Ordering::Release);
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count. Returns the previous pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrements the pin count. Returns the new pin count.
    ///
    /// A decrement of an already-unpinned frame is clamped at zero.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            self.pin_count.store(0, Ordering::Release);
            return 0;
        }
        prev - 1
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Marks this frame as dirty or clean.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Returns true if this frame is empty (no page loaded).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_id.load(Ordering::Acquire) == NO_PAGE
    }

    /// Reads the page data.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Writes to the page data.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Copies data into the frame.
    #[inline]
    pub fn copy_from(&self, src: &[u8]) {
        let mut data = self.data.write();
        let len = src.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&src[..len]);
    }

    /// Copies data out of the frame.
    #[inline]
    pub fn copy_to(&self, dst: &mut [u8]) {
        let data = self.data.read();
        let len = dst.len().min(PAGE_SIZE);
        dst[..len].copy_from_slice(&data[..len]);
    }

    /// Resets the frame to empty state.
    pub fn reset(&self) {
        self.page_id.store(NO_PAGE, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        let mut data = self.data.write();
        data.fill(0);
    }
}
