//! Frame taps: observers that see every cached frame without owning it.
//!
//! Taps run synchronously on the driver's delivery thread, after a frame has
//! been copied out of the vendor buffer and before it lands in the
//! latest-frame cache. A tap must not block; anything it wants to keep it
//! copies (cloning a [`Frame`] only bumps a reference count).
//!
//! # Deadlock Warning
//!
//! Never call [`TapRegistry::unregister`] from inside [`FrameTap::inspect`].
//! The registry holds its read lock while taps run.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tosca_core::Frame;

/// Non-blocking frame observer.
pub trait FrameTap: Send + Sync {
    /// Called for every complete frame. Must return quickly.
    fn inspect(&self, frame: &Frame);

    fn name(&self) -> &str {
        "unnamed_tap"
    }
}

/// Handle returned by [`TapRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TapHandle(u64);

impl TapHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Registered taps, in registration order.
pub struct TapRegistry {
    taps: RwLock<Vec<(u64, Box<dyn FrameTap>)>>,
    next_id: AtomicU64,
}

impl Default for TapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TapRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            taps: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self, tap: Box<dyn FrameTap>) -> TapHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tap = tap.name(), id, "frame tap registered");
        self.taps.write().push((id, tap));
        TapHandle(id)
    }

    /// Remove a tap. Returns false if the handle was unknown.
    pub fn unregister(&self, handle: TapHandle) -> bool {
        let mut taps = self.taps.write();
        let before = taps.len();
        taps.retain(|(id, _)| *id != handle.0);
        taps.len() != before
    }

    /// Run every tap on `frame`.
    pub fn apply(&self, frame: &Frame) {
        for (_, tap) in self.taps.read().iter() {
            tap.inspect(frame);
        }
    }

    pub fn len(&self) -> usize {
        self.taps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.read().is_empty()
    }
}

impl std::fmt::Debug for TapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .taps
            .read()
            .iter()
            .map(|(_, tap)| tap.name().to_string())
            .collect();
        f.debug_struct("TapRegistry").field("taps", &names).finish()
    }
}

/// Counts frames and sequence gaps. Shared counters, so the creator keeps a
/// clone after handing the tap to the registry.
#[derive(Debug, Clone, Default)]
pub struct FrameStatsTap {
    inner: Arc<FrameStatsInner>,
}

#[derive(Debug, Default)]
struct FrameStatsInner {
    frames: AtomicU64,
    gaps: AtomicU64,
    last_sequence: AtomicU64,
    bytes: AtomicU64,
}

impl FrameStatsTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.inner.frames.load(Ordering::Relaxed)
    }

    /// Frames missing between consecutive inspected sequence ids.
    pub fn gaps(&self) -> u64 {
        self.inner.gaps.load(Ordering::Relaxed)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        match self.inner.last_sequence.load(Ordering::Relaxed) {
            0 => None,
            seq => Some(seq),
        }
    }

    pub fn bytes(&self) -> u64 {
        self.inner.bytes.load(Ordering::Relaxed)
    }
}

impl FrameTap for FrameStatsTap {
    fn inspect(&self, frame: &Frame) {
        let previous = self
            .inner
            .last_sequence
            .swap(frame.sequence_id, Ordering::Relaxed);
        if previous != 0 && frame.sequence_id > previous + 1 {
            self.inner
                .gaps
                .fetch_add(frame.sequence_id - previous - 1, Ordering::Relaxed);
        }
        self.inner.frames.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes
            .fetch_add(frame.data.len() as u64, Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "frame_stats"
    }
}
