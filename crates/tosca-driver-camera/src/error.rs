use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tosca_core::camera::{VendorError, VendorErrorCode};
use tosca_core::error::{Classify, ErrorKind};
use tosca_core::state::StateError;

/// Errors returned by the imaging controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    /// No camera could be opened.
    #[error("camera initialization failed: {0}")]
    InitializationFailed(String),

    #[error("camera is not initialized")]
    NotInitialized,

    #[error("no frame within {0:?}")]
    CaptureTimeout(Duration),

    #[error("camera is already streaming")]
    AlreadyStreaming,

    #[error("feature '{name}': {reason}")]
    FeatureError { name: String, reason: String },

    #[error("camera settings {}: {reason}", path.display())]
    Settings { path: PathBuf, reason: String },

    #[error("cannot store frame at {}: {reason}", path.display())]
    Storage { path: PathBuf, reason: String },

    /// The driver delivered a frame with lost packets.
    #[error("frame {0} arrived incomplete")]
    IncompleteFrame(u64),

    #[error(transparent)]
    Vendor(#[from] VendorError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl CameraError {
    pub(crate) fn feature(name: &str, err: impl std::fmt::Display) -> Self {
        CameraError::FeatureError {
            name: name.to_string(),
            reason: err.to_string(),
        }
    }
}

impl Classify for CameraError {
    fn kind(&self) -> ErrorKind {
        match self {
            CameraError::InitializationFailed(_) => ErrorKind::Connection,
            CameraError::NotInitialized | CameraError::AlreadyStreaming => ErrorKind::State,
            CameraError::CaptureTimeout(_) | CameraError::IncompleteFrame(_) => {
                ErrorKind::Communication
            }
            CameraError::FeatureError { .. } | CameraError::Settings { .. } => ErrorKind::Parameter,
            CameraError::Storage { .. } => ErrorKind::Unknown,
            CameraError::Vendor(e) => match e.code {
                VendorErrorCode::Timeout | VendorErrorCode::Io => ErrorKind::Communication,
                VendorErrorCode::NotFound => ErrorKind::Connection,
                VendorErrorCode::AccessDenied => ErrorKind::State,
                VendorErrorCode::InvalidValue | VendorErrorCode::NotSupported => {
                    ErrorKind::Parameter
                }
                VendorErrorCode::Other => ErrorKind::Unknown,
            },
            CameraError::State(_) => ErrorKind::State,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tosca_core::Severity;

    #[test]
    fn test_vendor_codes_classify() {
        let err = CameraError::from(VendorError::new(VendorErrorCode::NotFound, "unplugged"));
        assert_eq!(err.kind(), ErrorKind::Connection);
        let err = CameraError::from(VendorError::new(VendorErrorCode::InvalidValue, "nope"));
        assert_eq!(err.severity(), Severity::Warning);
    }

    #[test]
    fn test_feature_error_message() {
        let err = CameraError::feature("Gain", "value out of range");
        assert_eq!(err.to_string(), "feature 'Gain': value out of range");
        assert_eq!(err.kind(), ErrorKind::Parameter);
    }
}
