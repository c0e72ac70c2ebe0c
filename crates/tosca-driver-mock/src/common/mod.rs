//! Common infrastructure for simulated devices.
//!
//! - **mode**: how simulated motion executes
//! - **faults**: reply-level fault injection

pub mod faults;
pub mod mode;

pub use faults::{FaultPlan, ReplyFault};
pub use mode::MockMode;
