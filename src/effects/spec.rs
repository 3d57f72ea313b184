use serde::{Deserialize, Serialize};

use crate::error::{CompositorError, Result};

fn default_fade() -> f64 {
    1.0
}

fn default_zoom() -> f64 {
    1.2
}

fn default_pan_distance() -> f64 {
    100.0
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoomDirection {
    /// Scale grows from 1.0 to `factor`
    #[default]
    In,
    /// Scale shrinks from `factor` to 1.0
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanDirection {
    Left,
    #[default]
    Right,
    Up,
    Down,
}

impl PanDirection {
    /// Unit vector of the content movement in image coordinates
    pub fn vector(self) -> (f64, f64) {
        match self {
            PanDirection::Left => (-1.0, 0.0),
            PanDirection::Right => (1.0, 0.0),
            PanDirection::Up => (0.0, -1.0),
            PanDirection::Down => (0.0, 1.0),
        }
    }
}

/// A single effect operation
///
/// Deserialized from records such as `{"type": "zoom", "factor": 1.5}`.
/// Unknown `type` tags fail deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectSpec {
    /// Ramp up from the background colour over `duration` seconds
    FadeIn {
        #[serde(default = "default_fade")]
        duration: f64,
    },
    /// Ramp down to the background colour over the last `duration` seconds
    FadeOut {
        #[serde(default = "default_fade")]
        duration: f64,
    },
    /// Progressive center-anchored scale over the whole clip
    Zoom {
        #[serde(default = "default_zoom")]
        factor: f64,
        #[serde(default)]
        direction: ZoomDirection,
    },
    /// Linear translation of the picture by `distance` pixels over the clip
    Pan {
        #[serde(default)]
        direction: PanDirection,
        #[serde(default = "default_pan_distance")]
        distance: f64,
    },
    /// Constant counter-clockwise rotation in degrees
    Rotate {
        #[serde(default)]
        angle: f64,
    },
    /// Per-pixel multiplicative scale
    Brightness {
        #[serde(default = "one")]
        factor: f64,
    },
    /// Playback rate; duration becomes `duration / factor`
    Speed {
        #[serde(default = "one")]
        factor: f64,
    },
    /// Keep the rectangle `[x1, x2) x [y1, y2)`; missing corners default to the frame edges
    Crop {
        x1: Option<i64>,
        y1: Option<i64>,
        x2: Option<i64>,
        y2: Option<i64>,
    },
    /// Exact resample; a missing dimension keeps the current one
    Resize {
        width: Option<u32>,
        height: Option<u32>,
    },
    AudioFadeIn {
        #[serde(default = "default_fade")]
        duration: f64,
    },
    AudioFadeOut {
        #[serde(default = "default_fade")]
        duration: f64,
    },
}

/// Crop rectangle resolved against a concrete frame size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl EffectSpec {
    pub fn name(&self) -> &'static str {
        match self {
            EffectSpec::FadeIn { .. } => "fade_in",
            EffectSpec::FadeOut { .. } => "fade_out",
            EffectSpec::Zoom { .. } => "zoom",
            EffectSpec::Pan { .. } => "pan",
            EffectSpec::Rotate { .. } => "rotate",
            EffectSpec::Brightness { .. } => "brightness",
            EffectSpec::Speed { .. } => "speed",
            EffectSpec::Crop { .. } => "crop",
            EffectSpec::Resize { .. } => "resize",
            EffectSpec::AudioFadeIn { .. } => "audio_fade_in",
            EffectSpec::AudioFadeOut { .. } => "audio_fade_out",
        }
    }

    /// Short trace entry such as `speed(2x)` or `crop(0,0,640,360)`
    pub fn describe(&self, size: (u32, u32)) -> String {
        match self {
            EffectSpec::FadeIn { duration }
            | EffectSpec::FadeOut { duration }
            | EffectSpec::AudioFadeIn { duration }
            | EffectSpec::AudioFadeOut { duration } => format!("{}({}s)", self.name(), duration),
            EffectSpec::Zoom { factor, direction } => {
                let dir = match direction {
                    ZoomDirection::In => "in",
                    ZoomDirection::Out => "out",
                };
                format!("zoom({}x {})", factor, dir)
            }
            EffectSpec::Pan { direction, distance } => {
                format!("pan({:?} {}px)", direction, distance).to_lowercase()
            }
            EffectSpec::Rotate { angle } => format!("rotate({}°)", angle),
            EffectSpec::Brightness { factor } => format!("brightness({})", factor),
            EffectSpec::Speed { factor } => format!("speed({}x)", factor),
            EffectSpec::Crop { .. } => match self.crop_box(size) {
                Ok(b) => format!("crop({},{},{},{})", b.x, b.y, b.x + b.width, b.y + b.height),
                Err(_) => "crop(invalid)".to_string(),
            },
            EffectSpec::Resize { width, height } => format!(
                "resize({}x{})",
                width.unwrap_or(size.0),
                height.unwrap_or(size.1)
            ),
        }
    }

    /// Check parameters against the clip the effect will be applied to
    pub fn validate(&self, size: (u32, u32), duration: f64) -> Result<()> {
        let name = self.name();
        match *self {
            EffectSpec::FadeIn { duration: d }
            | EffectSpec::FadeOut { duration: d }
            | EffectSpec::AudioFadeIn { duration: d }
            | EffectSpec::AudioFadeOut { duration: d } => {
                if !(d.is_finite() && d > 0.0) {
                    return Err(CompositorError::effect(name, "duration", format!("must be positive, got {}", d)));
                }
                if d > duration + 1e-6 {
                    return Err(CompositorError::effect(
                        name,
                        "duration",
                        format!("{}s exceeds clip duration {:.3}s", d, duration),
                    ));
                }
            }
            EffectSpec::Zoom { factor, .. } => {
                if !(factor.is_finite() && factor > 0.0) {
                    return Err(CompositorError::effect(name, "factor", format!("must be positive, got {}", factor)));
                }
            }
            EffectSpec::Pan { distance, .. } => {
                if !(distance.is_finite() && distance >= 0.0) {
                    return Err(CompositorError::effect(name, "distance", format!("must be non-negative, got {}", distance)));
                }
            }
            EffectSpec::Rotate { angle } => {
                if !angle.is_finite() {
                    return Err(CompositorError::effect(name, "angle", "must be finite"));
                }
            }
            EffectSpec::Brightness { factor } => {
                if !(factor.is_finite() && factor >= 0.0) {
                    return Err(CompositorError::effect(name, "factor", format!("must be non-negative, got {}", factor)));
                }
            }
            EffectSpec::Speed { factor } => {
                if !(factor.is_finite() && factor > 0.0) {
                    return Err(CompositorError::effect(name, "factor", format!("must be positive, got {}", factor)));
                }
            }
            EffectSpec::Crop { .. } => {
                self.crop_box(size)?;
            }
            EffectSpec::Resize { width, height } => {
                if width == Some(0) {
                    return Err(CompositorError::effect(name, "width", "must be positive"));
                }
                if height == Some(0) {
                    return Err(CompositorError::effect(name, "height", "must be positive"));
                }
            }
        }
        Ok(())
    }

    /// Resolve a crop rectangle against `size`
    pub fn crop_box(&self, size: (u32, u32)) -> Result<CropBox> {
        let EffectSpec::Crop { x1, y1, x2, y2 } = *self else {
            return Err(CompositorError::effect(self.name(), "type", "not a crop"));
        };
        let (w, h) = (size.0 as i64, size.1 as i64);
        let (x1, y1) = (x1.unwrap_or(0), y1.unwrap_or(0));
        let (x2, y2) = (x2.unwrap_or(w), y2.unwrap_or(h));

        for (param, value, limit) in [("x1", x1, w), ("y1", y1, h), ("x2", x2, w), ("y2", y2, h)] {
            if value < 0 || value > limit {
                return Err(CompositorError::effect(
                    "crop",
                    param,
                    format!("{} is outside the {}x{} frame", value, w, h),
                ));
            }
        }
        if x2 <= x1 {
            return Err(CompositorError::effect("crop", "x2", format!("{} must be greater than x1 {}", x2, x1)));
        }
        if y2 <= y1 {
            return Err(CompositorError::effect("crop", "y2", format!("{} must be greater than y1 {}", y2, y1)));
        }

        Ok(CropBox {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_records_with_defaults() {
        let effects: Vec<EffectSpec> = serde_json::from_str(
            r#"[{"type":"fade_in"},{"type":"zoom","factor":1.5,"direction":"out"},
                {"type":"pan","direction":"up"},{"type":"audio_fade_out","duration":2}]"#,
        ).unwrap();

        assert_eq!(effects[0], EffectSpec::FadeIn { duration: 1.0 });
        assert_eq!(effects[1], EffectSpec::Zoom { factor: 1.5, direction: ZoomDirection::Out });
        assert_eq!(effects[2], EffectSpec::Pan { direction: PanDirection::Up, distance: 100.0 });
        assert_eq!(effects[3], EffectSpec::AudioFadeOut { duration: 2.0 });
    }

    #[test]
    fn test_unknown_effect_is_rejected() {
        let parsed: std::result::Result<EffectSpec, _> = serde_json::from_str(r#"{"type":"blur","radius":2}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_inverted_crop_is_invalid_parameters() {
        let crop = EffectSpec::Crop { x1: Some(100), y1: Some(100), x2: Some(50), y2: Some(50) };
        let err = crop.validate((640, 360), 5.0).unwrap_err();
        assert!(err.is_invalid_parameters());
        assert!(matches!(err, CompositorError::InvalidEffectParameters { ref parameter, .. } if parameter == "x2"));
    }

    #[test]
    fn test_crop_bounds_and_defaults() {
        let crop = EffectSpec::Crop { x1: Some(10), y1: None, x2: None, y2: Some(100) };
        assert_eq!(
            crop.crop_box((640, 360)).unwrap(),
            CropBox { x: 10, y: 0, width: 630, height: 100 }
        );
        assert_eq!(crop.describe((640, 360)), "crop(10,0,640,100)");

        let outside = EffectSpec::Crop { x1: Some(0), y1: Some(0), x2: Some(700), y2: Some(10) };
        assert!(outside.validate((640, 360), 1.0).is_err());
    }

    #[test]
    fn test_fade_longer_than_clip_fails() {
        let fade = EffectSpec::FadeOut { duration: 3.0 };
        assert!(fade.validate((10, 10), 2.0).is_err());
        assert!(fade.validate((10, 10), 3.0).is_ok());
    }

    #[test]
    fn test_numeric_preconditions() {
        assert!(EffectSpec::Rotate { angle: f64::NAN }.validate((4, 4), 1.0).is_err());
        assert!(EffectSpec::Speed { factor: 0.0 }.validate((4, 4), 1.0).is_err());
        assert!(EffectSpec::Brightness { factor: -0.5 }.validate((4, 4), 1.0).is_err());
        assert!(EffectSpec::Resize { width: Some(0), height: None }.validate((4, 4), 1.0).is_err());
        assert!(EffectSpec::Zoom { factor: 1.3, direction: ZoomDirection::In }.validate((4, 4), 1.0).is_ok());
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(EffectSpec::Speed { factor: 2.0 }.describe((1, 1)), "speed(2x)");
        assert_eq!(EffectSpec::FadeIn { duration: 1.5 }.describe((1, 1)), "fade_in(1.5s)");
        assert_eq!(EffectSpec::Resize { width: Some(320), height: None }.describe((640, 360)), "resize(320x360)");
        assert_eq!(
            EffectSpec::Pan { direction: PanDirection::Left, distance: 50.0 }.describe((1, 1)),
            "pan(left 50px)"
        );
    }
}
