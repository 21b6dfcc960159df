//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable (unpinned) or not (pinned).
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Selects a victim frame for eviction.
    ///
    /// Returns None if no frames are evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Removes a frame from the replacer.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// Clock (second-chance) replacement algorithm.
///
/// Frames sit on a circular dial swept by a hand. An accessed frame
/// gets its reference bit set; the sweep clears bits as it passes and
/// evicts the first evictable frame found with its bit already clear.
pub struct ClockReplacer {
    /// Total number of frames on the dial.
    capacity: usize,
    /// Sweep state.
    state: Mutex<ClockState>,
}

struct ClockState {
    /// Reference bit per frame.
    referenced: Vec<bool>,
    /// Frames currently eligible for eviction.
    evictable: HashSet<FrameId>,
    /// Current hand position.
    hand: usize,
}

impl ClockReplacer {
    /// Creates a new clock replacer for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(ClockState {
                referenced: vec![false; capacity],
                evictable: HashSet::new(),
                hand: 0,
            }),
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Replacer for ClockReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.capacity {
            self.state.lock().referenced[idx] = true;
        }
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        if (frame_id.0 as usize) >= self.capacity {
            return;
        }

        let mut state = self.state.lock();
        if evictable {
            state.evictable.insert(frame_id);
        } else {
            state.evictable.remove(&frame_id);
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.evictable.is_empty() {
            return None;
        }

        // Two full sweeps suffice: the first clears reference bits,
        // the second must then find a victim.
        for _ in 0..(2 * self.capacity) {
            let hand = state.hand;
            state.hand = (hand + 1) % self.capacity;

            let candidate = FrameId(hand as u32);
            if !state.evictable.contains(&candidate) {
                continue;
            }
            if state.referenced[hand] {
                // Second chance
                state.referenced[hand] = false;
                continue;
            }
            state.evictable.remove(&candidate);
            return Some(candidate);
        }

        // Fall back to an arbitrary evictable frame
        let victim = state.evictable.iter().next().copied()?;
        state.evictable.remove(&victim);
        Some(victim)
    }

    fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.capacity {
            let mut state = self.state.lock();
            state.evictable.remove(&frame_id);
            state.referenced[idx] = false;
        }
    }

    fn size(&self) -> usize {
        self.state.lock().evictable.len()
    }
}
