//! Building blocks of the streaming path.
//!
//! The vendor driver calls the frame handler on its own thread. Everything
//! here is safe to touch from that thread and never waits on the async side:
//!
//! - [`callback`]: buffer requeue guard, handler construction, counters
//! - [`latest`]: single-slot latest-frame cache
//! - [`taps`]: non-blocking frame observers
//! - [`storage`]: raw frame plus JSON sidecar on disk

pub mod callback;
pub mod latest;
pub mod storage;
pub mod taps;

pub use callback::{CounterSnapshot, FrameCallback, FrameDrop, RequeueGuard, StreamCounters};
pub use latest::LatestFrameCache;
pub use storage::{save_frame, SavedFrame};
pub use taps::{FrameStatsTap, FrameTap, TapHandle, TapRegistry};
