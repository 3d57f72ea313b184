use image::{ImageBuffer, Rgb as RgbPixel, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An RGB colour, serialized as `[r, g, b]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const BLACK: Rgb = Rgb([0, 0, 0]);
    pub const WHITE: Rgb = Rgb([255, 255, 255]);

    pub fn pixel(self) -> RgbPixel<u8> {
        RgbPixel(self.0)
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::BLACK
    }
}

/// Represents a single video frame
///
/// This is a simple wrapper around an RGB image buffer that provides
/// convenient methods for pixel manipulation used by effects and transitions.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    buffer: RgbImage,
}

impl Frame {
    /// Create a new frame from an RGB image buffer
    pub fn new(buffer: RgbImage) -> Self {
        Self { buffer }
    }

    /// Create a new frame with the given dimensions filled with black
    pub fn new_black(width: u32, height: u32) -> Self {
        Self::new_filled(width, height, Rgb::BLACK)
    }

    /// Create a new frame with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: Rgb) -> Self {
        let buffer = ImageBuffer::from_pixel(width, height, color.pixel());
        Self { buffer }
    }

    /// Get the width of the frame
    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    /// Get the height of the frame
    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn size(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    /// Get a pixel at the given coordinates (returns RGB array)
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.buffer.get_pixel(x, y).0
    }

    /// Set a pixel at the given coordinates
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        self.buffer.put_pixel(x, y, RgbPixel(color));
    }

    /// Get the underlying image buffer
    pub fn as_image(&self) -> &RgbImage {
        &self.buffer
    }

    /// Get a mutable reference to the underlying image buffer
    pub fn as_image_mut(&mut self) -> &mut RgbImage {
        &mut self.buffer
    }

    pub fn into_image(self) -> RgbImage {
        self.buffer
    }

    /// Raw RGB bytes, row-major
    pub fn as_rgb_bytes(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    /// Create a frame from raw RGB bytes
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data)
            .map(|buffer| Self { buffer })
    }

    /// Linear mix of two equally sized frames: `self * (1 - t) + other * t`
    pub fn mix(&self, other: &Frame, t: f64) -> Frame {
        debug_assert_eq!(self.size(), other.size());
        let t = t.clamp(0.0, 1.0) as f32;
        let mut out = self.clone();
        out.buffer
            .par_chunks_mut(3)
            .zip(other.buffer.par_chunks(3))
            .for_each(|(a, b)| {
                for c in 0..3 {
                    let v = a[c] as f32 * (1.0 - t) + b[c] as f32 * t;
                    a[c] = v.round().clamp(0.0, 255.0) as u8;
                }
            });
        out
    }

    /// Save the frame as an image file (format chosen by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), image::ImageError> {
        self.buffer.save(path)
    }
}

/// Kind of source media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    StillImage,
}

/// Metadata for a source file on disk
///
/// Still images have no natural duration; the caller assigns one when the
/// image is placed on a timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    /// Identity of the asset
    pub path: PathBuf,

    pub kind: MediaKind,

    /// Natural duration in seconds (videos only)
    pub duration: Option<f64>,

    /// Natural frame size (width, height)
    pub size: (u32, u32),

    /// Native frame rate (videos only)
    pub fps: Option<f64>,

    /// Whether the container carries an audio stream
    pub has_audio: bool,

    /// Video codec name as reported by the prober
    pub codec: Option<String>,
}

impl MediaAsset {
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Output video parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoParams {
    /// Target frame rate for output
    pub fps: f64,

    /// Target resolution (width, height)
    pub resolution: (u32, u32),

    /// Video codec override; chosen by container extension when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,

    /// Audio codec override; chosen by container extension when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,

    /// Quality setting (0-100, higher is better), used when no bitrate is given
    pub quality: u8,

    /// Target video bitrate such as "4M"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            fps: 30.0,
            resolution: (1920, 1080),
            codec: None,
            audio_codec: None,
            quality: 85,
            bitrate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_endpoints_return_inputs() {
        let a = Frame::new_filled(4, 4, Rgb([200, 0, 0]));
        let b = Frame::new_filled(4, 4, Rgb([0, 0, 100]));

        assert_eq!(a.mix(&b, 0.0), a);
        assert_eq!(a.mix(&b, 1.0), b);
        assert_eq!(a.mix(&b, 0.5).get_pixel(1, 1), [100, 0, 50]);
    }

    #[test]
    fn raw_bytes_roundtrip_dimensions() {
        let frame = Frame::new_filled(3, 2, Rgb([1, 2, 3]));
        let bytes = frame.as_rgb_bytes().to_vec();
        assert_eq!(bytes.len(), 3 * 2 * 3);
        let rebuilt = Frame::from_rgb_bytes(3, 2, bytes).unwrap();
        assert_eq!(rebuilt, frame);
        assert!(Frame::from_rgb_bytes(3, 3, vec![0; 5]).is_none());
    }
}
