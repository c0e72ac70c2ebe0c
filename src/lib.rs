//! # TOSCA workstation hardware layer
//!
//! Coordinates the devices of the TOSCA laser treatment workstation: a
//! Xeryon piezo stage, the treatment laser source and the imaging camera.
//!
//! ## Crate Structure
//!
//! - **`config`**: `tosca.toml` plus `TOSCA_` environment variables, via `figment`
//! - **`tracing_config`**: `tracing-subscriber` setup from the `[logging]` section
//! - **`workstation`**: the [`Workstation`] context owning all controllers
//!
//! Device controllers live in their own crates and are re-exported here:
//! [`tosca_driver_xeryon`], [`tosca_driver_laser`], [`tosca_driver_camera`],
//! with shared types in [`tosca_core`] and simulated devices in
//! [`tosca_driver_mock`].

pub mod config;
pub mod tracing_config;
pub mod workstation;

pub use config::AppConfig;
pub use workstation::{ConnectReport, SimulatedDevices, Workstation, WorkstationState};

pub use tosca_core;
pub use tosca_driver_camera;
pub use tosca_driver_laser;
pub use tosca_driver_mock;
pub use tosca_driver_xeryon;
