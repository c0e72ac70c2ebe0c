//! Fault injection for simulated serial devices.
//!
//! A [`FaultPlan`] queues reply-level misbehaviour: the next N replies are
//! either dropped entirely (the host sees a timeout) or garbled (the host
//! sees a malformed payload).

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct FaultPlan {
    silent: AtomicU32,
    garbled: AtomicU32,
}

/// What to do with the next reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFault {
    None,
    Silent,
    Garbled,
}

impl FaultPlan {
    /// Drop the next `n` replies.
    pub fn silence_next(&self, n: u32) {
        self.silent.store(n, Ordering::SeqCst);
    }

    /// Corrupt the next `n` replies.
    pub fn garble_next(&self, n: u32) {
        self.garbled.store(n, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.silent.store(0, Ordering::SeqCst);
        self.garbled.store(0, Ordering::SeqCst);
    }

    /// Consume one queued fault, silence first.
    pub fn next_fault(&self) -> ReplyFault {
        if take_one(&self.silent) {
            ReplyFault::Silent
        } else if take_one(&self.garbled) {
            ReplyFault::Garbled
        } else {
            ReplyFault::None
        }
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faults_are_consumed_in_order() {
        let plan = FaultPlan::default();
        plan.silence_next(1);
        plan.garble_next(2);

        assert_eq!(plan.next_fault(), ReplyFault::Silent);
        assert_eq!(plan.next_fault(), ReplyFault::Garbled);
        assert_eq!(plan.next_fault(), ReplyFault::Garbled);
        assert_eq!(plan.next_fault(), ReplyFault::None);
    }
}
