//! Operational modes for simulated devices.
//!
//! - **Instant**: motion completes by the first status poll, for unit tests
//! - **Realistic**: moves at the commanded speed, for timing-sensitive tests
//! - **Stalled**: motion never reaches its target, for timeout paths

/// How a simulated actuator executes motion commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    #[default]
    Instant,
    Realistic,
    Stalled,
}
