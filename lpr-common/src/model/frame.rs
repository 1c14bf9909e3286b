//! Camera-like frames handed to the pipeline by the frame source

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Yuv420,
    Nv21,
    Bgra8888,
    Rgb888,
    Jpeg,
}

/// Position reported by the device when the frame was captured
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres, if the source reports one
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

/// One captured frame
///
/// Immutable once produced. Cloning is cheap: the pixel buffer is shared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Opaque correlation id assigned by the frame source
    pub id: String,
    /// Capture timestamp (epoch ms)
    pub captured_at_ms: i64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// Raw pixel data; never serialized
    #[serde(skip)]
    pub pixels: Option<Arc<Vec<u8>>>,
}

impl Frame {
    /// Create a frame without pixel data or location
    pub fn new(
        id: impl Into<String>,
        captured_at_ms: i64,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
    ) -> Self {
        Self {
            id: id.into(),
            captured_at_ms,
            width,
            height,
            pixel_format,
            location: None,
            pixels: None,
        }
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_pixels(mut self, pixels: Vec<u8>) -> Self {
        self.pixels = Some(Arc::new(pixels));
        self
    }
}
