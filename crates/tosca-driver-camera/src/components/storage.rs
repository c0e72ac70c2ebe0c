//! Saving frames as raw buffers with a JSON metadata sidecar.
//!
//! Layout: `<root>/<patient or "unassigned">/capture_<YYYYmmdd_HHMMSS_micros>.raw`
//! next to a `.json` file of the same stem. Pixel bytes are written exactly as
//! acquired; no image conversion happens here.

use crate::error::CameraError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tosca_core::data::FrameMetadata;
use tosca_core::Frame;

const UNASSIGNED: &str = "unassigned";

/// Paths written by [`save_frame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedFrame {
    pub raw: PathBuf,
    pub metadata: PathBuf,
}

/// Directory name for a patient id. Anything outside `[A-Za-z0-9_-]` becomes
/// `_` so an id can never escape the capture root.
fn patient_dir(patient: Option<&str>) -> String {
    match patient.map(str::trim).filter(|p| !p.is_empty()) {
        Some(id) => id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect(),
        None => UNASSIGNED.to_string(),
    }
}

fn storage_error(path: &Path, err: impl std::fmt::Display) -> CameraError {
    CameraError::Storage {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Write `frame` under `root`. Blocking; call from the blocking pool.
pub fn save_frame(root: &Path, frame: &Frame, patient: Option<&str>) -> Result<SavedFrame, CameraError> {
    let dir = root.join(patient_dir(patient));
    std::fs::create_dir_all(&dir).map_err(|e| storage_error(&dir, e))?;

    let stamp = frame.timestamp.format("%Y%m%d_%H%M%S_%6f");
    let mut stem = format!("capture_{}", stamp);
    if dir.join(format!("{}.raw", stem)).exists() {
        stem = format!("{}_{}", stem, frame.sequence_id);
    }
    let raw = dir.join(format!("{}.raw", stem));
    let metadata = dir.join(format!("{}.json", stem));

    std::fs::write(&raw, &frame.data).map_err(|e| storage_error(&raw, e))?;
    let sidecar = serde_json::to_vec_pretty(&FrameMetadata::for_frame(frame, patient))
        .map_err(|e| storage_error(&metadata, e))?;
    std::fs::write(&metadata, sidecar).map_err(|e| storage_error(&metadata, e))?;

    log::info!("Saved frame {} to {}", frame.sequence_id, raw.display());
    Ok(SavedFrame { raw, metadata })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tosca_core::PixelFormat;

    #[test]
    fn test_layout_and_sidecar() {
        let root = tempfile::tempdir().unwrap();
        let frame = Frame::new(4, 2, PixelFormat::Mono8, 9, vec![3u8; 8]);

        let saved = save_frame(root.path(), &frame, Some("P-001")).unwrap();
        assert_eq!(saved.raw.parent().unwrap(), root.path().join("P-001"));
        let name = saved.raw.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("capture_") && name.ends_with(".raw"), "{}", name);
        assert_eq!(std::fs::read(&saved.raw).unwrap(), vec![3u8; 8]);

        let meta: FrameMetadata =
            serde_json::from_slice(&std::fs::read(&saved.metadata).unwrap()).unwrap();
        assert_eq!(meta.sequence_id, 9);
        assert_eq!(meta.patient_id.as_deref(), Some("P-001"));
    }

    #[test]
    fn test_patient_dir_names() {
        assert_eq!(patient_dir(None), "unassigned");
        assert_eq!(patient_dir(Some("  ")), "unassigned");
        assert_eq!(patient_dir(Some("../etc")), "___etc");
    }

    #[test]
    fn test_same_timestamp_does_not_overwrite() {
        let root = tempfile::tempdir().unwrap();
        let first = Frame::new(1, 1, PixelFormat::Mono8, 1, vec![1u8]);
        let mut second = Frame::new(1, 1, PixelFormat::Mono8, 2, vec![2u8]);
        second.timestamp = first.timestamp;

        let a = save_frame(root.path(), &first, None).unwrap();
        let b = save_frame(root.path(), &second, None).unwrap();
        assert_ne!(a.raw, b.raw);
        assert_eq!(std::fs::read(&a.raw).unwrap(), vec![1u8]);
    }
}
