//! Vendor camera driver abstraction.
//!
//! The imaging controller never talks to a vendor SDK directly. It drives a
//! [`CameraSystem`] (enumeration and open) and the [`CameraDevice`] it hands
//! back. A binding to the real SDK implements these traits; the mock crate
//! provides a simulated system with a driver-owned delivery thread.
//!
//! # Buffer lifecycle
//!
//! While streaming, the driver owns a fixed pool of [`VendorBuffer`]s. Each
//! filled buffer is passed to the registered [`FrameHandler`] on the driver's
//! own thread, and must be handed back through [`BufferQueue::queue_buffer`]
//! exactly once. A buffer that is never returned is lost to the pool; once
//! all are lost, streaming stalls.

use crate::data::PixelFormat;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How the camera is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Read and write features, acquire frames.
    #[default]
    Full,
    /// Read features only.
    Read,
    /// Configuration only, no acquisition.
    Config,
}

impl std::str::FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(AccessMode::Full),
            "read" => Ok(AccessMode::Read),
            "config" => Ok(AccessMode::Config),
            other => Err(format!("unknown access mode '{other}'")),
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AccessMode::Full => "full",
            AccessMode::Read => "read",
            AccessMode::Config => "config",
        };
        write!(f, "{}", label)
    }
}

/// One enumerated camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: String,
    pub serial: String,
    pub model: String,
    pub name: String,
}

impl CameraInfo {
    /// True when `selector` names this camera by id, serial or model.
    pub fn matches(&self, selector: &str) -> bool {
        self.id == selector || self.serial == selector || self.model == selector
    }
}

/// Value of a named camera feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FeatureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Int(v) => Some(*v as f64),
            FeatureValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Parse a command-line string: bool, then integer, then float, then text.
    pub fn parse(raw: &str) -> Self {
        if let Ok(b) = raw.parse::<bool>() {
            FeatureValue::Bool(b)
        } else if let Ok(i) = raw.parse::<i64>() {
            FeatureValue::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            FeatureValue::Float(f)
        } else {
            FeatureValue::Text(raw.to_string())
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Float(v)
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        FeatureValue::Int(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Bool(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

impl std::fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureValue::Bool(v) => write!(f, "{}", v),
            FeatureValue::Int(v) => write!(f, "{}", v),
            FeatureValue::Float(v) => write!(f, "{}", v),
            FeatureValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Vendor driver error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorErrorCode {
    Timeout,
    NotFound,
    AccessDenied,
    InvalidValue,
    NotSupported,
    Io,
    Other,
}

impl std::fmt::Display for VendorErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            VendorErrorCode::Timeout => "timeout",
            VendorErrorCode::NotFound => "not_found",
            VendorErrorCode::AccessDenied => "access_denied",
            VendorErrorCode::InvalidValue => "invalid_value",
            VendorErrorCode::NotSupported => "not_supported",
            VendorErrorCode::Io => "io",
            VendorErrorCode::Other => "other",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by the vendor driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("vendor driver {code} error: {message}")]
pub struct VendorError {
    pub code: VendorErrorCode,
    pub message: String,
}

impl VendorError {
    pub fn new(code: VendorErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Completion status of a delivered buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Complete,
    /// Some packets were lost; pixel data is unreliable.
    Incomplete,
    Invalid,
}

/// A driver-owned frame buffer.
#[derive(Debug)]
pub struct VendorBuffer {
    /// Slot in the driver's buffer pool.
    pub slot: usize,
    pub status: FrameStatus,
    /// Driver-side frame counter.
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub payload: BytesMut,
}

/// Return path for streamed buffers.
pub trait BufferQueue: Send + Sync {
    /// Give `buffer` back to the driver so it can be filled again.
    fn queue_buffer(&self, buffer: VendorBuffer);
}

/// Callback invoked on the driver's delivery thread for every filled buffer.
pub type FrameHandler = Arc<dyn Fn(VendorBuffer, &dyn BufferQueue) + Send + Sync>;

/// Entry point of the vendor driver: camera enumeration and open.
///
/// One instance is created for the lifetime of the application and passed
/// explicitly to whoever needs it.
pub trait CameraSystem: Send + Sync {
    fn cameras(&self) -> Result<Vec<CameraInfo>, VendorError>;

    fn open(&self, id: &str, mode: AccessMode) -> Result<Box<dyn CameraDevice>, VendorError>;
}

/// An opened camera.
///
/// All calls are blocking; the controller runs them on the blocking pool.
pub trait CameraDevice: Send + Sync {
    fn info(&self) -> CameraInfo;

    fn access_mode(&self) -> AccessMode;

    fn pixel_formats(&self) -> Result<Vec<PixelFormat>, VendorError>;

    fn pixel_format(&self) -> Result<PixelFormat, VendorError>;

    fn set_pixel_format(&self, format: &PixelFormat) -> Result<(), VendorError>;

    fn feature(&self, name: &str) -> Result<FeatureValue, VendorError>;

    fn set_feature(&self, name: &str, value: &FeatureValue) -> Result<(), VendorError>;

    /// Acquire one frame outside of streaming.
    fn acquire_frame(&self, timeout: Duration) -> Result<VendorBuffer, VendorError>;

    /// Allocate `buffer_count` buffers and begin delivering them to `handler`.
    fn start_streaming(&self, buffer_count: usize, handler: FrameHandler) -> Result<(), VendorError>;

    /// Stop delivery and join the delivery thread.
    fn stop_streaming(&self) -> Result<(), VendorError>;

    /// Export the current feature set to an XML settings file.
    fn save_settings(&self, path: &Path) -> Result<(), VendorError>;

    fn load_settings(&self, path: &Path) -> Result<(), VendorError>;

    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matching() {
        let info = CameraInfo {
            id: "DEV_1AB22C00".into(),
            serial: "50-0503343289".into(),
            model: "1800 U-240m".into(),
            name: "Allied Vision 1800 U-240m".into(),
        };
        assert!(info.matches("DEV_1AB22C00"));
        assert!(info.matches("50-0503343289"));
        assert!(info.matches("1800 U-240m"));
        assert!(!info.matches("Allied Vision"));
    }

    #[test]
    fn test_feature_value_parse() {
        assert_eq!(FeatureValue::parse("true"), FeatureValue::Bool(true));
        assert_eq!(FeatureValue::parse("42"), FeatureValue::Int(42));
        assert_eq!(FeatureValue::parse("5.0"), FeatureValue::Float(5.0));
        assert_eq!(
            FeatureValue::parse("Continuous"),
            FeatureValue::Text("Continuous".into())
        );
        assert_eq!(FeatureValue::Int(3).as_f64(), Some(3.0));
    }

    #[test]
    fn test_access_mode_from_str() {
        assert_eq!("FULL".parse::<AccessMode>(), Ok(AccessMode::Full));
        assert!("exclusive".parse::<AccessMode>().is_err());
    }
}
