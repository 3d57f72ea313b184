use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    video::{geometry::FitPolicy, types::Rgb, VideoParams},
};

/// Main configuration for the timeline compositor
///
/// Loaded once and handed to the [`CompositionEngine`](crate::CompositionEngine)
/// at construction time. Per-call parameters override these values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Timeline composition settings
    pub composition: CompositionConfig,

    /// Output video settings
    pub video: VideoParams,

    /// Render loop settings
    pub render: RenderConfig,

    /// Text overlay defaults
    pub overlay: OverlayConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string(),
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.composition.validate()?;
        validate_video_params(&self.video)?;
        self.render.validate()?;
        self.overlay.validate()?;
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Timeline composition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionConfig {
    /// Crossfade length used by the duration matcher (seconds)
    pub fade_duration: f64,

    /// Nominal repeat window used when extending a video (seconds)
    pub segment_length: f64,

    /// Default transition length between timeline segments (seconds)
    pub transition_duration: f64,

    /// Default display duration for still images (seconds)
    pub image_duration: f64,

    /// Letterbox / fill colour
    pub background_color: Rgb,

    /// Default fit policy for heterogeneous sources
    pub fit_policy: FitPolicy,

    /// Starting scale of the incoming clip in a zoom transition
    pub zoom_transition_factor: f64,

    /// Most tail copies the duration matcher may append
    pub max_extension_repeats: usize,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            fade_duration: 1.0,
            segment_length: 10.0,
            transition_duration: 0.5,
            image_duration: 3.0,
            background_color: Rgb::BLACK,
            fit_policy: FitPolicy::Contain,
            zoom_transition_factor: 1.3,
            max_extension_repeats: 1000,
        }
    }
}

impl CompositionConfig {
    fn validate(&self) -> Result<()> {
        if !(self.segment_length.is_finite() && self.segment_length > 0.0) {
            return Err(invalid("composition.segment_length", self.segment_length).into());
        }

        if !(self.fade_duration.is_finite() && self.fade_duration >= 0.0)
            || self.fade_duration >= self.segment_length
        {
            return Err(ConfigError::InvalidValue {
                key: "composition.fade_duration".to_string(),
                value: format!("{} (segment_length {})", self.fade_duration, self.segment_length),
            }.into());
        }

        if !(self.transition_duration.is_finite() && self.transition_duration >= 0.0) {
            return Err(invalid("composition.transition_duration", self.transition_duration).into());
        }

        if !(self.image_duration.is_finite() && self.image_duration > 0.0) {
            return Err(invalid("composition.image_duration", self.image_duration).into());
        }

        if !(self.zoom_transition_factor.is_finite() && self.zoom_transition_factor > 0.0) {
            return Err(invalid("composition.zoom_transition_factor", self.zoom_transition_factor).into());
        }

        if self.max_extension_repeats == 0 {
            return Err(invalid("composition.max_extension_repeats", self.max_extension_repeats).into());
        }

        Ok(())
    }
}

fn validate_video_params(params: &VideoParams) -> Result<()> {
    if !(params.fps.is_finite() && params.fps > 0.0) {
        return Err(invalid("video.fps", params.fps).into());
    }

    if params.resolution.0 == 0 || params.resolution.1 == 0 {
        return Err(invalid(
            "video.resolution",
            format!("{}x{}", params.resolution.0, params.resolution.1),
        ).into());
    }

    if params.quality > 100 {
        return Err(invalid("video.quality", params.quality).into());
    }

    Ok(())
}

/// Render loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Frames evaluated in parallel before being written to the encoder
    pub batch_size: usize,

    /// Worker threads for frame evaluation
    pub processing_threads: usize,

    /// Decoded frames kept per open video source
    pub decoder_cache_frames: usize,

    /// ffmpeg executable
    pub ffmpeg_path: PathBuf,

    /// ffprobe executable
    pub ffprobe_path: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            processing_threads: num_cpus::get(),
            decoder_cache_frames: 48,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

impl RenderConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(invalid("render.batch_size", self.batch_size).into());
        }

        if self.processing_threads == 0 {
            return Err(invalid("render.processing_threads", self.processing_threads).into());
        }

        if self.decoder_cache_frames == 0 {
            return Err(invalid("render.decoder_cache_frames", self.decoder_cache_frames).into());
        }

        Ok(())
    }
}

/// Text overlay defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// TrueType font used when an overlay does not name one
    pub font_path: Option<PathBuf>,

    /// Font size in pixels
    pub font_size: f32,

    /// Text colour
    pub color: Rgb,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            font_size: 50.0,
            color: Rgb::WHITE,
        }
    }
}

impl OverlayConfig {
    fn validate(&self) -> Result<()> {
        if !(self.font_size.is_finite() && self.font_size > 0.0) {
            return Err(invalid("overlay.font_size", self.font_size).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test_config.toml");

        let mut original_config = Config::default();
        original_config.composition.segment_length = 8.0;
        original_config.video.codec = Some("libx265".to_string());

        original_config.save_to_file(&file_path).unwrap();
        let loaded_config = Config::from_file(&file_path).unwrap();

        assert_eq!(loaded_config.composition.segment_length, 8.0);
        assert_eq!(loaded_config.video.codec.as_deref(), Some("libx265"));
        assert_eq!(original_config.video.fps, loaded_config.video.fps);
        assert_eq!(loaded_config.composition.fit_policy, FitPolicy::Contain);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[composition]\nfade_duration = 0.25\n").unwrap();

        let config = Config::from_file(&file_path).unwrap();
        assert_eq!(config.composition.fade_duration, 0.25);
        assert_eq!(config.composition.segment_length, 10.0);
        assert_eq!(config.render.batch_size, 16);
    }

    #[test]
    fn test_fade_must_be_shorter_than_segment() {
        let mut config = Config::default();
        config.composition.fade_duration = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extension_ceiling_must_allow_one_copy() {
        let mut config = Config::default();
        config.composition.max_extension_repeats = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_video_params() {
        let mut config = Config::default();
        config.video.fps = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.video.resolution = (0, 1080);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/definitely/not/here.toml");
        assert!(matches!(
            result,
            Err(crate::error::CompositorError::Config(ConfigError::FileNotFound { .. }))
        ));
    }
}
