//! Laser source driver for the TOSCA workstation.
//!
//! - [`LaserController`]: connect/auto-detect, identify, emission on/off,
//!   range-checked power setpoint, status query
//! - [`DeviceInfo`], [`LaserStatus`]: parsed identification and status replies

pub mod config;
pub mod controller;
pub mod reply;

pub use config::LaserConfig;
pub use controller::{LaserController, LaserError};
pub use reply::{DeviceInfo, LaserStatus};
