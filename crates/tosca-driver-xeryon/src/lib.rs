//! Xeryon piezo stage driver for the TOSCA workstation.
//!
//! This crate provides the actuator motion controller:
//! - [`ActuatorController`]: connect/auto-detect, home, absolute and
//!   relative moves, scans, stop, status and fault reset
//! - [`StatusWord`]: the controller's packed condition flags
//! - [`Sequence`]: stored, repeatable motion sequences
//!
//! # Usage
//!
//! ```rust,ignore
//! use tosca_driver_xeryon::{ActuatorConfig, ActuatorController};
//!
//! let actuator = ActuatorController::new(config, opener, status_sink);
//! actuator.connect(&config.port).await?;
//! actuator.move_to(2_500, None).await?;
//! ```

pub mod config;
pub mod sequence;
pub mod status_word;
pub mod xls;

pub use config::{ActuatorConfig, BusyPolicy};
pub use sequence::{Sequence, SequenceReport, SequenceStep};
pub use status_word::{MotionStatus, StatusFlag, StatusWord};
pub use xls::{ActuatorController, MotionError, ScanDirection};
