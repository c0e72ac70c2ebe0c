//! Frame handler run on the driver's delivery thread.
//!
//! Every buffer the driver hands over goes back through
//! [`BufferQueue::queue_buffer`] exactly once, whatever happens to the frame
//! in between. [`RequeueGuard`] owns the buffer for the duration of the
//! handler and requeues it on drop, so early returns, decode failures and
//! panics all take the same exit.

use crate::components::latest::LatestFrameCache;
use crate::components::taps::TapRegistry;
use bytes::Bytes;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tosca_core::camera::{BufferQueue, FrameHandler, FrameStatus, VendorBuffer};
use tosca_core::Frame;

// =============================================================================
// Counters
// =============================================================================

/// Streaming diagnostics, updated from the delivery thread.
#[derive(Debug, Default)]
pub struct StreamCounters {
    callback_invocations: AtomicU64,
    buffers_returned: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Point-in-time copy of [`StreamCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CounterSnapshot {
    pub callback_invocations: u64,
    pub buffers_returned: u64,
    /// Frames that reached the latest-frame cache
    pub frames_delivered: u64,
    pub frames_dropped: u64,
}

impl StreamCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            callback_invocations: self.callback_invocations.load(Ordering::SeqCst),
            buffers_returned: self.buffers_returned.load(Ordering::SeqCst),
            frames_delivered: self.frames_delivered.load(Ordering::SeqCst),
            frames_dropped: self.frames_dropped.load(Ordering::SeqCst),
        }
    }

    pub fn reset(&self) {
        self.callback_invocations.store(0, Ordering::SeqCst);
        self.buffers_returned.store(0, Ordering::SeqCst);
        self.frames_delivered.store(0, Ordering::SeqCst);
        self.frames_dropped.store(0, Ordering::SeqCst);
    }
}

// =============================================================================
// RequeueGuard
// =============================================================================

/// Owns a driver buffer and hands it back to the driver on drop.
pub struct RequeueGuard<'a> {
    buffer: Option<VendorBuffer>,
    queue: &'a dyn BufferQueue,
    counters: &'a StreamCounters,
}

impl<'a> RequeueGuard<'a> {
    pub fn new(buffer: VendorBuffer, queue: &'a dyn BufferQueue, counters: &'a StreamCounters) -> Self {
        Self {
            buffer: Some(buffer),
            queue,
            counters,
        }
    }

    /// The guarded buffer. Only `None` while the guard is being dropped.
    pub fn buffer(&self) -> Option<&VendorBuffer> {
        self.buffer.as_ref()
    }
}

impl Drop for RequeueGuard<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.queue.queue_buffer(buffer);
            self.counters.buffers_returned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// =============================================================================
// Frame decoding
// =============================================================================

/// Why a delivered buffer did not become a cached frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameDrop {
    #[error("frame {0} is incomplete")]
    Incomplete(u64),

    #[error("frame {0} is invalid")]
    Invalid(u64),

    #[error("frame {frame_id} payload is {actual} bytes, expected {expected}")]
    Truncated {
        frame_id: u64,
        expected: usize,
        actual: usize,
    },

    #[error("frame {0} slot is contended")]
    Contended(u64),
}

impl FrameDrop {
    /// Driver-side id of the dropped frame, or the sequence id for
    /// [`FrameDrop::Contended`].
    pub fn frame_id(&self) -> u64 {
        match self {
            FrameDrop::Incomplete(id) | FrameDrop::Invalid(id) | FrameDrop::Contended(id) => *id,
            FrameDrop::Truncated { frame_id, .. } => *frame_id,
        }
    }
}

/// Copy a completed vendor buffer into an owned [`Frame`].
///
/// The sequence id is only drawn once the buffer has passed its checks.
pub(crate) fn decode(buffer: &VendorBuffer, sequence: &AtomicU64) -> Result<Frame, FrameDrop> {
    match buffer.status {
        FrameStatus::Complete => {}
        FrameStatus::Incomplete => return Err(FrameDrop::Incomplete(buffer.frame_id)),
        FrameStatus::Invalid => return Err(FrameDrop::Invalid(buffer.frame_id)),
    }

    if let Some(bpp) = buffer.pixel_format.bytes_per_pixel() {
        let expected = buffer.width as usize * buffer.height as usize * bpp;
        if buffer.payload.len() != expected {
            return Err(FrameDrop::Truncated {
                frame_id: buffer.frame_id,
                expected,
                actual: buffer.payload.len(),
            });
        }
    } else if buffer.payload.is_empty() {
        return Err(FrameDrop::Truncated {
            frame_id: buffer.frame_id,
            expected: 1,
            actual: 0,
        });
    }

    let sequence_id = sequence.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(Frame::new(
        buffer.width,
        buffer.height,
        buffer.pixel_format.clone(),
        sequence_id,
        Bytes::copy_from_slice(&buffer.payload),
    ))
}

// =============================================================================
// FrameCallback
// =============================================================================

/// State the frame handler closes over.
#[derive(Clone)]
pub struct FrameCallback {
    cache: Arc<LatestFrameCache>,
    taps: Arc<TapRegistry>,
    counters: Arc<StreamCounters>,
    sequence: Arc<AtomicU64>,
}

impl FrameCallback {
    pub fn new(
        cache: Arc<LatestFrameCache>,
        taps: Arc<TapRegistry>,
        counters: Arc<StreamCounters>,
        sequence: Arc<AtomicU64>,
    ) -> Self {
        Self {
            cache,
            taps,
            counters,
            sequence,
        }
    }

    /// Wrap into the handler type the driver expects.
    pub fn into_handler(self) -> FrameHandler {
        Arc::new(move |buffer: VendorBuffer, queue: &dyn BufferQueue| self.handle(buffer, queue))
    }

    /// Process one delivered buffer. Never unwinds into the driver.
    pub fn handle(&self, buffer: VendorBuffer, queue: &dyn BufferQueue) {
        self.counters
            .callback_invocations
            .fetch_add(1, Ordering::SeqCst);
        let guard = RequeueGuard::new(buffer, queue, &self.counters);

        match catch_unwind(AssertUnwindSafe(|| self.process(&guard))) {
            Ok(Ok(sequence_id)) => {
                self.counters.frames_delivered.fetch_add(1, Ordering::SeqCst);
                log::trace!("frame {} cached", sequence_id);
            }
            Ok(Err(reason)) => {
                self.counters.frames_dropped.fetch_add(1, Ordering::SeqCst);
                match reason {
                    FrameDrop::Contended(_) => log::debug!("{}", reason),
                    _ => log::warn!("dropping {}", reason),
                }
            }
            Err(_) => {
                self.counters.frames_dropped.fetch_add(1, Ordering::SeqCst);
                tracing::error!("frame handler panicked; buffer returned to driver");
            }
        }
    }

    fn process(&self, guard: &RequeueGuard<'_>) -> Result<u64, FrameDrop> {
        let Some(buffer) = guard.buffer() else {
            return Err(FrameDrop::Invalid(0));
        };
        let frame = decode(buffer, &self.sequence)?;
        let sequence_id = frame.sequence_id;
        self.taps.apply(&frame);
        if self.cache.store(frame) {
            Ok(sequence_id)
        } else {
            Err(FrameDrop::Contended(sequence_id))
        }
    }
}
