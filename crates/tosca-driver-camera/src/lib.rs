//! Imaging acquisition driver for the TOSCA workstation.
//!
//! - [`ImagingController`]: camera selection with fallbacks, single capture,
//!   streaming into a latest-frame cache, features, settings files, frame
//!   saving
//! - [`components`]: the pieces that run on the vendor driver's delivery
//!   thread (requeue guard, latest-frame cache, frame taps) and frame storage

pub mod components;
pub mod config;
pub mod controller;
pub mod error;

pub use components::{CounterSnapshot, FrameStatsTap, FrameTap, SavedFrame, TapHandle};
pub use config::CameraConfig;
pub use controller::ImagingController;
pub use error::CameraError;
