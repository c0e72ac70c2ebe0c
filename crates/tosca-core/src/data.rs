use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pixel layout tag reported by the camera.
///
/// Known formats get their own variant; anything else the vendor driver
/// reports is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PixelFormat {
    Mono8,
    Mono10,
    Mono12,
    Mono16,
    Rgb8,
    Bgr8,
    Other(String),
}

impl PixelFormat {
    /// Bytes per pixel for unpacked formats.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Mono8 => Some(1),
            PixelFormat::Mono10 | PixelFormat::Mono12 | PixelFormat::Mono16 => Some(2),
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => Some(3),
            PixelFormat::Other(_) => None,
        }
    }
}

impl From<String> for PixelFormat {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Mono8" => PixelFormat::Mono8,
            "Mono10" => PixelFormat::Mono10,
            "Mono12" => PixelFormat::Mono12,
            "Mono16" => PixelFormat::Mono16,
            "Rgb8" | "RGB8" => PixelFormat::Rgb8,
            "Bgr8" | "BGR8" => PixelFormat::Bgr8,
            _ => PixelFormat::Other(value),
        }
    }
}

impl From<&str> for PixelFormat {
    fn from(value: &str) -> Self {
        PixelFormat::from(value.to_string())
    }
}

impl From<PixelFormat> for String {
    fn from(format: PixelFormat) -> Self {
        format.to_string()
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Mono8 => write!(f, "Mono8"),
            PixelFormat::Mono10 => write!(f, "Mono10"),
            PixelFormat::Mono12 => write!(f, "Mono12"),
            PixelFormat::Mono16 => write!(f, "Mono16"),
            PixelFormat::Rgb8 => write!(f, "Rgb8"),
            PixelFormat::Bgr8 => write!(f, "Bgr8"),
            PixelFormat::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A single acquired image.
///
/// # Storage
/// Pixels are kept as raw bytes in the camera's native layout. 16-bit
/// formats are little endian, two bytes per pixel. The buffer is a
/// [`Bytes`], so cloning a frame out of the latest-frame cache never copies
/// pixel data and never aliases a vendor buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    pub pixel_format: PixelFormat,

    /// Strictly increasing within one controller.
    pub sequence_id: u64,

    pub timestamp: DateTime<Utc>,

    /// Raw pixel data
    pub data: Bytes,
}

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        sequence_id: u64,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            width,
            height,
            pixel_format,
            sequence_id,
            timestamp: Utc::now(),
            data: data.into(),
        }
    }

    /// Buffer size implied by the geometry, if the format is known.
    pub fn expected_len(&self) -> Option<usize> {
        self.pixel_format
            .bytes_per_pixel()
            .map(|bpp| self.width as usize * self.height as usize * bpp)
    }

    /// Calculate mean pixel value (mono formats only).
    pub fn mean(&self) -> Option<f64> {
        if self.data.is_empty() {
            return None;
        }
        match self.pixel_format.bytes_per_pixel() {
            Some(1) => {
                let sum: u64 = self.data.iter().map(|&v| v as u64).sum();
                Some(sum as f64 / self.data.len() as f64)
            }
            Some(2) => {
                let pixels = self.data.len() / 2;
                if pixels == 0 {
                    return None;
                }
                let sum: u64 = self
                    .data
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]) as u64)
                    .sum();
                Some(sum as f64 / pixels as f64)
            }
            _ => None,
        }
    }
}

/// Metadata written next to a saved frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub sequence_id: u64,
    pub timestamp: DateTime<Utc>,
    pub patient_id: Option<String>,
}

impl FrameMetadata {
    pub fn for_frame(frame: &Frame, patient_id: Option<&str>) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            pixel_format: frame.pixel_format.clone(),
            sequence_id: frame.sequence_id,
            timestamp: frame.timestamp,
            patient_id: patient_id.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_names() {
        assert_eq!(PixelFormat::from("Mono12"), PixelFormat::Mono12);
        assert_eq!(
            PixelFormat::from("BayerRG8"),
            PixelFormat::Other("BayerRG8".into())
        );
        assert_eq!(PixelFormat::Other("BayerRG8".into()).to_string(), "BayerRG8");
        assert_eq!(PixelFormat::Mono16.bytes_per_pixel(), Some(2));
    }

    #[test]
    fn test_mean_mono8_and_mono16() {
        let frame = Frame::new(2, 2, PixelFormat::Mono8, 1, vec![0u8, 10, 20, 30]);
        assert_eq!(frame.expected_len(), Some(4));
        assert_eq!(frame.mean(), Some(15.0));

        let mut data = Vec::new();
        for v in [100u16, 300] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let frame = Frame::new(2, 1, PixelFormat::Mono16, 2, data);
        assert_eq!(frame.mean(), Some(200.0));

        let frame = Frame::new(1, 1, PixelFormat::Rgb8, 3, vec![1u8, 2, 3]);
        assert_eq!(frame.mean(), None);
    }

    #[test]
    fn test_metadata_serializes_format_as_string() {
        let frame = Frame::new(4, 4, PixelFormat::Mono8, 7, vec![0u8; 16]);
        let meta = FrameMetadata::for_frame(&frame, Some("P-001"));
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"pixel_format\":\"Mono8\""));
        assert!(json.contains("\"patient_id\":\"P-001\""));
    }
}
