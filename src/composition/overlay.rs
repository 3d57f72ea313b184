//! Text captions drawn on top of slideshow images

use std::path::{Path, PathBuf};
use std::sync::Arc;

use imageproc::drawing::{draw_text_mut, text_size};
use rusttype::{Font, Scale};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::AudioSpan;
use crate::config::OverlayConfig;
use crate::error::{CompositorError, Result};
use crate::video::clip::{Clip, ClipRef};
use crate::video::types::{Frame, Rgb};

/// Fonts tried when neither the overlay nor the configuration names one
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Named anchor inside the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    Top,
    Bottom,
    #[default]
    Center,
}

/// Where a caption goes: a horizontally centred anchor or an absolute pixel position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OverlayPosition {
    Anchor(Anchor),
    At { x: i32, y: i32 },
}

impl Default for OverlayPosition {
    fn default() -> Self {
        OverlayPosition::Anchor(Anchor::Center)
    }
}

/// One caption request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextOverlay {
    pub text: String,

    /// Images that carry the caption; all images when absent
    #[serde(default)]
    pub image_indices: Option<Vec<usize>>,

    /// Offset from the start of the image (seconds)
    #[serde(default)]
    pub start_time: f64,

    /// Visible time; until the end of the image when absent
    #[serde(default)]
    pub duration: Option<f64>,

    #[serde(default)]
    pub position: OverlayPosition,

    #[serde(default, alias = "fontsize")]
    pub font_size: Option<f32>,

    #[serde(default)]
    pub color: Option<Rgb>,

    #[serde(default, alias = "font")]
    pub font_path: Option<PathBuf>,

    /// Distance from the frame edge for `top` and `bottom`
    #[serde(default = "default_margin")]
    pub margin: u32,

    #[serde(default)]
    pub outline_width: u32,

    #[serde(default)]
    pub outline_color: Rgb,
}

fn default_margin() -> u32 {
    20
}

impl TextOverlay {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            image_indices: None,
            start_time: 0.0,
            duration: None,
            position: OverlayPosition::default(),
            font_size: None,
            color: None,
            font_path: None,
            margin: default_margin(),
            outline_width: 0,
            outline_color: Rgb::BLACK,
        }
    }

    pub fn applies_to(&self, image_index: usize) -> bool {
        match &self.image_indices {
            Some(indices) => indices.contains(&image_index),
            None => true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.start_time.is_finite() && self.start_time >= 0.0) {
            return Err(CompositorError::invalid(format!(
                "text overlay '{}': start_time must be >= 0, got {}",
                self.text, self.start_time
            )));
        }
        if let Some(duration) = self.duration {
            if !(duration.is_finite() && duration > 0.0) {
                return Err(CompositorError::invalid(format!(
                    "text overlay '{}': duration must be positive, got {}",
                    self.text, duration
                )));
            }
        }
        if let Some(size) = self.font_size {
            if !(size.is_finite() && size > 0.0) {
                return Err(CompositorError::invalid(format!(
                    "text overlay '{}': font_size must be positive, got {}",
                    self.text, size
                )));
            }
        }
        Ok(())
    }
}

/// Load the first usable font: the overlay's, the configured one, then system fonts
pub fn load_font(requested: Option<&Path>, config: &OverlayConfig) -> Result<Arc<Font<'static>>> {
    if let Some(explicit) = requested.or(config.font_path.as_deref()) {
        if !explicit.exists() {
            return Err(CompositorError::not_found(explicit));
        }
        return read_font(explicit);
    }

    for candidate in SYSTEM_FONTS {
        let path = Path::new(candidate);
        if path.exists() {
            if let Ok(font) = read_font(path) {
                debug!("Using system font {}", candidate);
                return Ok(font);
            }
        }
    }

    Err(CompositorError::invalid(
        "no font available for text overlays; set overlay.font_path or pass font_path",
    ))
}

fn read_font(path: &Path) -> Result<Arc<Font<'static>>> {
    let bytes = std::fs::read(path)?;
    Font::try_from_vec(bytes)
        .map(Arc::new)
        .ok_or_else(|| CompositorError::invalid(format!("{} is not a usable TrueType font", path.display())))
}

/// Top-left corner for a `text` box of `text_dims` on a `canvas`
pub fn place(canvas: (u32, u32), text_dims: (i32, i32), position: OverlayPosition, margin: u32) -> (i32, i32) {
    let (cw, ch) = (canvas.0 as i32, canvas.1 as i32);
    let (tw, th) = text_dims;
    let centered_x = (cw - tw) / 2;
    let margin = margin as i32;

    match position {
        OverlayPosition::Anchor(Anchor::Top) => (centered_x, margin),
        OverlayPosition::Anchor(Anchor::Bottom) => (centered_x, ch - th - margin),
        OverlayPosition::Anchor(Anchor::Center) => (centered_x, (ch - th) / 2),
        OverlayPosition::At { x, y } => (x, y),
    }
}

/// A caption ready to draw
#[derive(Clone)]
struct Caption {
    text: String,
    start: f64,
    end: f64,
    scale: Scale,
    color: Rgb,
    position: OverlayPosition,
    margin: u32,
    outline_width: u32,
    outline_color: Rgb,
    font: Arc<Font<'static>>,
}

impl Caption {
    fn draw(&self, frame: &mut Frame) {
        let dims = text_size(self.scale, &self.font, &self.text);
        let (x, y) = place(frame.size(), dims, self.position, self.margin);
        let image = frame.as_image_mut();

        let w = self.outline_width as i32;
        if w > 0 {
            for dy in -w..=w {
                for dx in -w..=w {
                    if dx != 0 || dy != 0 {
                        draw_text_mut(image, self.outline_color.pixel(), x + dx, y + dy, self.scale, &self.font, &self.text);
                    }
                }
            }
        }
        draw_text_mut(image, self.color.pixel(), x, y, self.scale, &self.font, &self.text);
    }
}

/// An image clip with captions composited on top
pub struct OverlayClip {
    inner: ClipRef,
    captions: Vec<Caption>,
}

impl OverlayClip {
    /// Attach the overlays that apply to `image_index`; returns `inner` untouched when none do
    pub fn wrap(
        inner: ClipRef,
        image_index: usize,
        overlays: &[TextOverlay],
        config: &OverlayConfig,
    ) -> Result<(ClipRef, Vec<String>)> {
        let mut captions = Vec::new();
        let mut applied = Vec::new();

        for overlay in overlays.iter().filter(|o| o.applies_to(image_index) && !o.text.is_empty()) {
            overlay.validate()?;
            let font = load_font(overlay.font_path.as_deref(), config)?;
            let start = overlay.start_time;
            let end = overlay
                .duration
                .map(|d| start + d)
                .unwrap_or(f64::INFINITY)
                .min(inner.duration());

            applied.push(format!("text('{}' on image {})", overlay.text, image_index));
            captions.push(Caption {
                text: overlay.text.clone(),
                start,
                end,
                scale: Scale::uniform(overlay.font_size.unwrap_or(config.font_size)),
                color: overlay.color.unwrap_or(config.color),
                position: overlay.position,
                margin: overlay.margin,
                outline_width: overlay.outline_width,
                outline_color: overlay.outline_color,
                font,
            });
        }

        if captions.is_empty() {
            return Ok((inner, applied));
        }
        Ok((Arc::new(Self { inner, captions }), applied))
    }
}

impl Clip for OverlayClip {
    fn duration(&self) -> f64 {
        self.inner.duration()
    }

    fn size(&self) -> (u32, u32) {
        self.inner.size()
    }

    fn fps(&self) -> f64 {
        self.inner.fps()
    }

    fn frame_at(&self, t: f64) -> Result<Frame> {
        let mut frame = self.inner.frame_at(t)?;
        for caption in self.captions.iter().filter(|c| t >= c.start && t < c.end) {
            caption.draw(&mut frame);
        }
        Ok(frame)
    }

    fn audio_spans(&self) -> Vec<AudioSpan> {
        self.inner.audio_spans()
    }

    fn release(&self) {
        self.inner.release();
    }

    fn fork(&self) -> ClipRef {
        Arc::new(Self {
            inner: self.inner.fork(),
            captions: self.captions.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::clip::ColorClip;

    fn system_font_config() -> Option<OverlayConfig> {
        SYSTEM_FONTS
            .iter()
            .find(|p| Path::new(p).exists())
            .map(|p| OverlayConfig {
                font_path: Some(PathBuf::from(p)),
                ..OverlayConfig::default()
            })
    }

    #[test]
    fn test_positions() {
        assert_eq!(place((100, 50), (20, 10), OverlayPosition::Anchor(Anchor::Top), 5), (40, 5));
        assert_eq!(place((100, 50), (20, 10), OverlayPosition::Anchor(Anchor::Bottom), 5), (40, 35));
        assert_eq!(place((100, 50), (20, 10), OverlayPosition::Anchor(Anchor::Center), 5), (40, 20));
        assert_eq!(place((100, 50), (20, 10), OverlayPosition::At { x: 3, y: 4 }, 5), (3, 4));
    }

    #[test]
    fn test_overlay_json_shapes() {
        let overlay: TextOverlay = serde_json::from_str(
            r#"{"text": "Hi", "fontsize": 36, "position": "bottom", "image_indices": [0, 2], "margin": 30}"#,
        ).unwrap();
        assert_eq!(overlay.font_size, Some(36.0));
        assert_eq!(overlay.position, OverlayPosition::Anchor(Anchor::Bottom));
        assert!(overlay.applies_to(2));
        assert!(!overlay.applies_to(1));

        let overlay: TextOverlay = serde_json::from_str(r#"{"text": "Hi", "position": {"x": 10, "y": 12}}"#).unwrap();
        assert_eq!(overlay.position, OverlayPosition::At { x: 10, y: 12 });
        assert!(overlay.applies_to(7));
    }

    #[test]
    fn test_missing_explicit_font_is_reported() {
        let config = OverlayConfig {
            font_path: Some(PathBuf::from("/definitely/not/here.ttf")),
            ..OverlayConfig::default()
        };
        let err = load_font(None, &config).err().unwrap();
        assert!(matches!(err, CompositorError::SourceNotFound { .. }));
    }

    #[test]
    fn test_rejects_negative_start() {
        let mut overlay = TextOverlay::new("x");
        overlay.start_time = -1.0;
        assert!(overlay.validate().unwrap_err().is_invalid_parameters());
    }

    #[test]
    fn test_unrelated_image_is_untouched() {
        let clip: ClipRef = Arc::new(ColorClip::new((64, 32), Rgb::BLACK, 2.0, 10.0));
        let mut overlay = TextOverlay::new("only on the second image");
        overlay.image_indices = Some(vec![1]);

        let (wrapped, applied) = OverlayClip::wrap(clip.clone(), 0, &[overlay], &OverlayConfig::default()).unwrap();
        assert!(Arc::ptr_eq(&clip, &wrapped));
        assert!(applied.is_empty());
    }

    #[test]
    fn test_caption_drawn_only_inside_window() {
        let Some(config) = system_font_config() else {
            return;
        };
        let clip: ClipRef = Arc::new(ColorClip::new((160, 90), Rgb::BLACK, 4.0, 10.0));
        let mut overlay = TextOverlay::new("HELLO");
        overlay.start_time = 1.0;
        overlay.duration = Some(1.0);
        overlay.font_size = Some(40.0);

        let (wrapped, applied) = OverlayClip::wrap(clip, 0, &[overlay], &config).unwrap();
        assert_eq!(applied.len(), 1);

        let lit = |frame: Frame| frame.as_rgb_bytes().iter().any(|&v| v > 0);
        assert!(!lit(wrapped.frame_at(0.5).unwrap()));
        assert!(lit(wrapped.frame_at(1.5).unwrap()));
        assert!(!lit(wrapped.frame_at(2.5).unwrap()));
    }
}
