//! Single-slot cache holding the most recent complete frame.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tosca_core::Frame;

/// Longest the delivery thread waits for the slot before dropping a frame.
const STORE_WAIT: Duration = Duration::from_millis(2);

/// Latest complete frame, last writer wins.
///
/// Readers hold the lock only long enough to clone a [`Frame`], which
/// shares its pixel buffer instead of copying it. The writer is the
/// driver's delivery thread; if the slot stays locked past a short bound
/// the new frame is discarded rather than stalling delivery.
#[derive(Debug, Default)]
pub struct LatestFrameCache {
    slot: Mutex<Option<Frame>>,
    skipped: AtomicU64,
}

impl LatestFrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached frame. Returns false if the frame was discarded
    /// because the slot was contended.
    pub fn store(&self, frame: Frame) -> bool {
        match self.slot.try_lock_for(STORE_WAIT) {
            Some(mut slot) => {
                *slot = Some(frame);
                true
            }
            None => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn get(&self) -> Option<Frame> {
        self.slot.lock().clone()
    }

    /// Sequence id of the cached frame.
    pub fn sequence_id(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(|f| f.sequence_id)
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }

    /// Frames discarded because the slot was contended.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn lock_slot(&self) -> parking_lot::MutexGuard<'_, Option<Frame>> {
        self.slot.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tosca_core::PixelFormat;

    fn frame(seq: u64) -> Frame {
        Frame::new(2, 2, PixelFormat::Mono8, seq, vec![0u8; 4])
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = LatestFrameCache::new();
        assert!(cache.get().is_none());
        assert!(cache.store(frame(1)));
        assert!(cache.store(frame(2)));
        assert_eq!(cache.sequence_id(), Some(2));
        cache.clear();
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_contended_store_is_dropped() {
        let cache = LatestFrameCache::new();
        cache.store(frame(1));
        {
            let _held = cache.lock_slot();
            assert!(!cache.store(frame(2)));
        }
        assert_eq!(cache.skipped(), 1);
        assert_eq!(cache.sequence_id(), Some(1));
    }
}
