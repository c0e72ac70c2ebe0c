use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tosca_core::camera::AccessMode;
use tosca_core::PixelFormat;

/// Configuration for the imaging acquisition controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Camera id, serial or model; the first camera is used when unset
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
    #[serde(default)]
    pub access_mode: AccessMode,
    /// Buffers handed to the driver when streaming
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
    /// Root directory for saved frames
    #[serde(default = "default_capture_dir")]
    pub capture_dir: PathBuf,
    /// Optional `[width, height]` applied after open
    #[serde(default)]
    pub resolution: Option<[u32; 2]>,
}

fn default_pixel_format() -> PixelFormat {
    PixelFormat::Mono8
}

fn default_buffer_count() -> usize {
    5
}

fn default_capture_timeout_ms() -> u64 {
    2000
}

fn default_capture_dir() -> PathBuf {
    PathBuf::from("captures")
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            selector: None,
            pixel_format: default_pixel_format(),
            access_mode: AccessMode::default(),
            buffer_count: default_buffer_count(),
            capture_timeout_ms: default_capture_timeout_ms(),
            capture_dir: default_capture_dir(),
            resolution: None,
        }
    }
}

impl CameraConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_count == 0 {
            return Err(anyhow!("camera buffer_count must be at least 1"));
        }
        if self.capture_timeout_ms == 0 {
            return Err(anyhow!("camera capture_timeout_ms must be non-zero"));
        }
        if let Some([width, height]) = self.resolution {
            if width == 0 || height == 0 {
                return Err(anyhow!("camera resolution must be non-zero, got {width}x{height}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CameraConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.buffer_count, 5);
        assert_eq!(cfg.capture_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.access_mode, AccessMode::Full);
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let cfg: CameraConfig =
            serde_json::from_str(r#"{"pixel_format": "Mono12", "access_mode": "read"}"#).unwrap();
        assert_eq!(cfg.pixel_format, PixelFormat::Mono12);
        assert_eq!(cfg.access_mode, AccessMode::Read);
        assert_eq!(cfg.capture_dir, PathBuf::from("captures"));
    }

    #[test]
    fn test_zero_buffers_rejected() {
        let cfg = CameraConfig {
            buffer_count: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
