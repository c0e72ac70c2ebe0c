//! `tosca-core`
//!
//! Shared building blocks for the TOSCA hardware coordination layer.
//!
//! ## Modules
//!
//! - [`serial`]: line-oriented command/response transport over a serial link
//! - [`error`]: error taxonomy every controller classifies into
//! - [`state`]: controller lifecycle state machine and its watch channel
//! - [`status`]: status/error sink for the presentation layer
//! - [`data`]: frames and pixel formats
//! - [`camera`]: traits a vendor camera driver binding implements
//!
//! Controllers live in the `tosca-driver-*` crates and are owned explicitly
//! by their caller. Nothing in this crate is a process-wide singleton.

pub mod camera;
pub mod data;
pub mod error;
pub mod serial;
pub mod state;
pub mod status;

pub use data::{Frame, PixelFormat};
pub use error::{Classify, ConnectError, ErrorKind, Severity, TransportError};
pub use serial::{Command, Framing, PortOpener, PortSpec, Response, SystemPorts, Transport};
pub use state::{ControllerFault, ControllerState, ObservableState, Operation, StateError};
pub use status::{DeviceKind, StatusEvent, StatusSink};
