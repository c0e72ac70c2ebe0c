//! Simulated hardware for TOSCA
//!
//! This crate provides in-process stand-ins for the workstation's devices so
//! controllers can be exercised without physical hardware.
//!
//! # Available Simulators
//!
//! - [`MockPorts`] - `PortOpener` over in-memory duplex streams, counting opens and closes
//! - [`MockXeryon`] - Xeryon XLS stage speaking `TAG=VALUE`, with fault and reply injection
//! - [`MockLaser`] - Laser source speaking `MNEMONIC VALUE`
//! - [`SilentDevice`] - Accepts lines and never answers
//! - [`MockCameraSystem`] - Vendor camera driver with a driver-owned delivery thread
//!
//! # Wiring
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tosca_driver_mock::{MockMode, MockPorts, MockXeryon};
//!
//! let stage = Arc::new(MockXeryon::new(MockMode::Instant));
//! let ports = MockPorts::new().with_device("/dev/ttyMOCK0", Some("XLS"), stage.clone());
//! // hand `Arc::new(ports)` to a controller as its PortOpener
//! ```

pub mod common;
mod mock_camera;
mod mock_laser;
mod mock_stage;
mod ports;

// Re-export common types
pub use common::{FaultPlan, MockMode, ReplyFault};

// Re-export simulators
pub use mock_camera::{MockCameraProbe, MockCameraSpec, MockCameraSystem};
pub use mock_laser::MockLaser;
pub use mock_stage::{bits as xeryon_bits, MockXeryon};
pub use ports::{MockPorts, PortCounters, SilentDevice, SimulatedDevice};

/// Port names used by [`MockPorts::workstation`].
pub mod port_names {
    pub const ACTUATOR: &str = "/dev/ttyMOCK0";
    pub const LASER: &str = "/dev/ttyMOCK1";
}

impl MockPorts {
    /// A port table with one simulated stage and one simulated laser.
    pub fn workstation(stage: std::sync::Arc<MockXeryon>, laser: std::sync::Arc<MockLaser>) -> Self {
        MockPorts::new()
            .with_device(port_names::ACTUATOR, Some("Xeryon XLS controller"), stage)
            .with_device(port_names::LASER, Some("Laser source"), laser)
    }
}
