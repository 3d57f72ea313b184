//! # Tool Operations
//!
//! The JSON surface consumed by an orchestration layer. Every operation takes
//! a serde parameter record (paths as strings, durations in seconds, effects
//! and transitions as nested records) and always answers with a
//! [`ToolResult`]; errors never escape as `Err`.
//!
//! ```rust,no_run
//! use timeline_compositor::{config::Config, ops::Operations};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ops = Operations::new(Config::default());
//! let result = ops.run_json(r#"{
//!     "operation": "create_slideshow",
//!     "params": {
//!         "images": [{"path": "a.jpg"}, {"path": "b.png"}],
//!         "output_path": "slides.mp4",
//!         "transition": "crossfade"
//!     }
//! }"#).await;
//! println!("{}", serde_json::to_string_pretty(&result).unwrap());
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::audio::{AudioLoader, SyncMode};
use crate::composition::{
    AudioSpec, Composite, CompositeResult, CompositionEngine, ConcatRequest, DurationMatcher, SlideshowRequest,
};
use crate::config::Config;
use crate::effects::EffectSpec;
use crate::error::{CompositorError, Result};
use crate::transitions::{SequenceClip, TransitionSpec};
use crate::video::clip::{ClipRef, SubClip};
use crate::video::encoder::audio_codec_for;
use crate::video::{ExportSettings, QualityPreset};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// Result record returned by every operation
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub status: Status,
    pub message: String,

    /// Always `null` on error
    pub output_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// Error taxonomy tag such as `source_not_found`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Operation-specific fields
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ToolResult {
    pub fn success<S: Into<String>>(message: S, output: &Path, duration: f64) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            output_path: Some(output.display().to_string()),
            duration: Some(duration),
            error_kind: None,
            details: Map::new(),
        }
    }

    pub fn failure(error: &CompositorError) -> Self {
        Self {
            status: Status::Error,
            message: error.user_message(),
            output_path: None,
            duration: None,
            error_kind: Some(error.kind().to_string()),
            details: Map::new(),
        }
    }

    /// Add an operation-specific field
    pub fn with<K: Into<String>, V: Serialize>(mut self, key: K, value: V) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.details.insert(key.into(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    fn rendered<S: Into<String>>(message: S, result: &CompositeResult) -> Self {
        Self::success(message, &result.output_path, result.duration)
            .with("file_size", result.file_size)
            .with("resolution", result.resolution)
            .with("fps", result.fps)
            .with("effects_applied", &result.applied)
            .with("diagnostics", &result.diagnostics)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcatenateParams {
    #[serde(flatten)]
    pub request: ConcatRequest,
    pub output_path: PathBuf,
    #[serde(default)]
    pub export: ExportSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlideshowParams {
    #[serde(flatten)]
    pub request: SlideshowRequest,
    pub output_path: PathBuf,
    #[serde(default)]
    pub export: ExportSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddEffectsParams {
    pub video_path: PathBuf,
    pub output_path: PathBuf,
    pub effects: Vec<EffectSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtendParams {
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub segment_length: Option<f64>,
    #[serde(default)]
    pub fade_duration: Option<f64>,
    #[serde(default)]
    pub sync: SyncMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynchronizeParams {
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    /// `replace`, `overlay` or `mix`
    #[serde(default = "default_sync_method")]
    pub sync_method: String,
    /// Weight of the new track when mixing
    #[serde(default)]
    pub mix_weight: Option<f64>,
}

fn default_sync_method() -> String {
    "replace".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportParams {
    pub video_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub format_settings: ExportSettings,
}

/// Unit of the bounds in a [`ClipParams`] request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutMode {
    /// Seconds
    #[default]
    Time,
    /// Frame numbers at the source frame rate
    Frame,
    /// Percent of the source duration
    Percentage,
}

impl CutMode {
    /// Convert one bound to seconds
    pub fn to_seconds(self, value: f64, fps: Option<f64>, duration: f64) -> Result<f64> {
        match self {
            CutMode::Time => Ok(value),
            CutMode::Frame => {
                let fps = fps
                    .filter(|f| f.is_finite() && *f > 0.0)
                    .ok_or_else(|| CompositorError::invalid("frame cuts need a source with a known frame rate"))?;
                Ok(value / fps)
            }
            CutMode::Percentage => {
                if !(0.0..=100.0).contains(&value) {
                    return Err(CompositorError::invalid(format!(
                        "percentage bounds must lie in [0, 100], got {}",
                        value
                    )));
                }
                Ok(value / 100.0 * duration)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClipParams {
    pub video_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub end_time: Option<f64>,
    /// Several `[start, end]` windows joined with cuts
    #[serde(default)]
    pub segments: Option<Vec<(f64, f64)>>,
    #[serde(default, alias = "cut_mode")]
    pub mode: CutMode,
    #[serde(default)]
    pub quality: QualityPreset,
}

impl ClipParams {
    /// Requested windows in seconds
    ///
    /// Missing bounds default to the start and end of the source.
    pub fn windows(&self, fps: Option<f64>, duration: f64) -> Result<Vec<(f64, f64)>> {
        let convert = |value: f64| self.mode.to_seconds(value, fps, duration);
        match &self.segments {
            Some(windows) if windows.is_empty() => Err(CompositorError::invalid("segments must not be empty")),
            Some(windows) => windows
                .iter()
                .map(|&(start, end)| Ok((convert(start)?, convert(end)?)))
                .collect(),
            None => {
                let start = self.start_time.map(convert).transpose()?.unwrap_or(0.0);
                let end = self.end_time.map(convert).transpose()?.unwrap_or(duration);
                Ok(vec![(start, end)])
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractAudioParams {
    pub video_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub audio_format: Option<String>,
}

/// Request envelope: `{"operation": "...", "params": {...}}`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", content = "params", rename_all = "snake_case")]
pub enum OperationRequest {
    ConcatenateVideos(ConcatenateParams),
    CreateSlideshow(SlideshowParams),
    AddEffects(AddEffectsParams),
    ExtendToAudio(ExtendParams),
    SynchronizeAudio(SynchronizeParams),
    ExportVideo(ExportParams),
    ClipVideo(ClipParams),
    ExtractAudio(ExtractAudioParams),
}

impl OperationRequest {
    pub fn name(&self) -> &'static str {
        match self {
            OperationRequest::ConcatenateVideos(_) => "concatenate_videos",
            OperationRequest::CreateSlideshow(_) => "create_slideshow",
            OperationRequest::AddEffects(_) => "add_effects",
            OperationRequest::ExtendToAudio(_) => "extend_to_audio",
            OperationRequest::SynchronizeAudio(_) => "synchronize_audio",
            OperationRequest::ExportVideo(_) => "export_video",
            OperationRequest::ClipVideo(_) => "clip_video",
            OperationRequest::ExtractAudio(_) => "extract_audio",
        }
    }
}

/// Async entry points; each composition runs on a blocking worker
#[derive(Clone)]
pub struct Operations {
    config: Arc<Config>,
}

impl Operations {
    pub fn new(config: Config) -> Self {
        Self { config: Arc::new(config) }
    }

    /// Parse an envelope and run it
    pub async fn run_json(&self, json: &str) -> ToolResult {
        match serde_json::from_str::<OperationRequest>(json) {
            Ok(request) => self.run(request).await,
            Err(e) => ToolResult::failure(&CompositorError::invalid(format!("malformed request: {}", e))),
        }
    }

    pub async fn run(&self, request: OperationRequest) -> ToolResult {
        info!("🛠️  Operation {}", request.name());
        match request {
            OperationRequest::ConcatenateVideos(p) => self.concatenate_videos(p).await,
            OperationRequest::CreateSlideshow(p) => self.create_slideshow(p).await,
            OperationRequest::AddEffects(p) => self.add_effects(p).await,
            OperationRequest::ExtendToAudio(p) => self.extend_to_audio(p).await,
            OperationRequest::SynchronizeAudio(p) => self.synchronize_audio(p).await,
            OperationRequest::ExportVideo(p) => self.export_video(p).await,
            OperationRequest::ClipVideo(p) => self.clip_video(p).await,
            OperationRequest::ExtractAudio(p) => self.extract_audio(p).await,
        }
    }

    pub async fn concatenate_videos(&self, params: ConcatenateParams) -> ToolResult {
        self.blocking("concatenate_videos", move |engine| {
            let composite = engine.concatenate(&params.request)?;
            let result = engine.render(&composite, &params.output_path, &params.export)?;
            Ok(ToolResult::rendered(
                format!("Concatenated {} segments", params.request.segments.len()),
                &result,
            )
            .with("segments_count", params.request.segments.len()))
        })
        .await
    }

    pub async fn create_slideshow(&self, params: SlideshowParams) -> ToolResult {
        self.blocking("create_slideshow", move |engine| {
            let composite = engine.slideshow(&params.request)?;
            let mut export = params.export.clone();
            export.fps = export.fps.or(params.request.fps);
            let result = engine.render(&composite, &params.output_path, &export)?;
            Ok(ToolResult::rendered(
                format!("Created slideshow from {} images", params.request.images.len()),
                &result,
            )
            .with("images_count", params.request.images.len()))
        })
        .await
    }

    pub async fn add_effects(&self, params: AddEffectsParams) -> ToolResult {
        self.blocking("add_effects", move |engine| {
            let composite = engine.open(&params.video_path)?;
            let background = engine.config().composition.background_color;
            let composite = engine.apply_global_effects(composite, &params.effects, background)?;
            let result = engine.render(&composite, &params.output_path, &ExportSettings::default())?;
            Ok(ToolResult::rendered(format!("Applied {} effects", params.effects.len()), &result))
        })
        .await
    }

    pub async fn extend_to_audio(&self, params: ExtendParams) -> ToolResult {
        self.blocking("extend_to_audio", move |engine| {
            let composite = engine.open(&params.video_path)?;
            let original_duration = composite.duration();
            let track = engine.load_audio_track(&AudioSpec {
                path: params.audio_path.clone(),
                sync: params.sync,
                loop_to_fit: false,
            })?;

            let defaults = &engine.config().composition;
            let matcher = DurationMatcher::new(
                params.segment_length.unwrap_or(defaults.segment_length),
                params.fade_duration.unwrap_or(defaults.fade_duration),
                defaults.background_color,
            )
            .with_max_repeats(defaults.max_extension_repeats);
            let composite = engine.extend_using(composite, track.duration, matcher)?;
            let composite = engine.attach_audio(composite, &track)?;
            let result = engine.render(&composite, &params.output_path, &ExportSettings::default())?;

            Ok(ToolResult::rendered(
                format!("Extended video from {:.2}s to {:.2}s", original_duration, result.duration),
                &result,
            )
            .with("original_duration", original_duration)
            .with("target_duration", track.duration))
        })
        .await
    }

    pub async fn synchronize_audio(&self, params: SynchronizeParams) -> ToolResult {
        self.blocking("synchronize_audio", move |engine| {
            let mut sync = SyncMode::from_name(&params.sync_method).ok_or_else(|| {
                CompositorError::invalid(format!(
                    "unknown sync_method '{}' (expected replace, overlay or mix)",
                    params.sync_method
                ))
            })?;
            if let (SyncMode::Mix { weight }, Some(w)) = (&mut sync, params.mix_weight) {
                *weight = w;
            }

            let composite = engine.open(&params.video_path)?;
            let track = engine.load_audio_track(&AudioSpec {
                path: params.audio_path.clone(),
                sync,
                loop_to_fit: false,
            })?;
            let composite = engine.attach_audio(composite, &track)?;
            let result = engine.render(&composite, &params.output_path, &ExportSettings::default())?;

            Ok(ToolResult::rendered(format!("Synchronized audio ({})", sync.name()), &result)
                .with("sync_method", sync.name()))
        })
        .await
    }

    pub async fn export_video(&self, params: ExportParams) -> ToolResult {
        self.blocking("export_video", move |engine| {
            let composite = engine.open(&params.video_path)?;
            let result = engine.render(&composite, &params.output_path, &params.format_settings)?;
            let format = params
                .output_path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();

            Ok(ToolResult::rendered(format!("Exported video as {}", format), &result)
                .with("format", format)
                .with(
                    "settings_used",
                    json!({
                        "codec": result.codec,
                        "audio_codec": result.audio_codec,
                        "fps": result.fps,
                        "resolution": result.resolution,
                    }),
                ))
        })
        .await
    }

    pub async fn clip_video(&self, params: ClipParams) -> ToolResult {
        self.blocking("clip_video", move |engine| {
            let source = engine.open(&params.video_path)?;
            let original_duration = source.duration();
            let fps = engine.loader().probe(&params.video_path)?.fps;
            let windows = params.windows(fps, original_duration)?;

            // Each window decodes from its own position in the source
            let pieces = windows
                .iter()
                .map(|&(start, end)| SubClip::new(source.clip.fork(), start, end).map(|c| Arc::new(c) as ClipRef))
                .collect::<Result<Vec<_>>>()?;
            let clip: ClipRef = if pieces.len() == 1 {
                pieces.into_iter().next().ok_or_else(|| CompositorError::invalid("no clip windows"))?
            } else {
                let cuts = vec![TransitionSpec::cut(); pieces.len() - 1];
                let background = engine.config().composition.background_color;
                Arc::new(SequenceClip::build(pieces, cuts, background, 1.0)?.clip)
            };

            let export = ExportSettings {
                crf: params.quality.crf(),
                ..ExportSettings::default()
            };
            let result = engine.render(&Composite::new(clip), &params.output_path, &export)?;
            Ok(ToolResult::rendered(format!("Clipped {} window(s)", windows.len()), &result)
                .with("original_duration", original_duration)
                .with("quality", params.quality)
                .with("segments_count", windows.len()))
        })
        .await
    }

    pub async fn extract_audio(&self, params: ExtractAudioParams) -> ToolResult {
        self.blocking("extract_audio", move |engine| {
            let asset = engine.loader().probe(&params.video_path)?;
            if !asset.has_audio {
                return Err(CompositorError::NoAudioTrack {
                    path: params.video_path.display().to_string(),
                });
            }

            let requested = params.audio_format.clone().or_else(|| {
                params
                    .output_path
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
            });
            let (format, codec, output) = match requested.as_deref().and_then(|f| audio_codec_for(f).map(|c| (f, c))) {
                Some((format, codec)) => (format.to_string(), codec, params.output_path.clone()),
                None => {
                    warn!("Unknown audio format {:?}, falling back to mp3", requested);
                    ("mp3".to_string(), "libmp3lame", params.output_path.with_extension("mp3"))
                }
            };

            let file_size = engine.renderer().extract_audio(&params.video_path, &output, codec)?;
            let info = AudioLoader::probe(&output).or_else(|_| engine.loader().probe_audio(&output));
            let (duration, sample_rate) = match info {
                Ok(info) => (info.duration, info.sample_rate),
                Err(_) => (asset.duration.unwrap_or(0.0), None),
            };

            Ok(ToolResult::success(format!("Extracted audio as {}", format), &output, duration)
                .with("file_size", file_size)
                .with("sample_rate", sample_rate)
                .with("audio_format", format))
        })
        .await
    }

    async fn blocking<F>(&self, name: &'static str, job: F) -> ToolResult
    where
        F: FnOnce(&CompositionEngine) -> Result<ToolResult> + Send + 'static,
    {
        let config = Config::clone(&self.config);
        let outcome = tokio::task::spawn_blocking(move || {
            let engine = CompositionEngine::new(config);
            job(&engine)
        })
        .await;

        match outcome {
            Ok(Ok(result)) => {
                info!("✅ {} finished: {}", name, result.message);
                result
            }
            Ok(Err(e)) => {
                warn!("❌ {} failed: {}", name, e);
                ToolResult::failure(&e)
            }
            Err(e) => {
                warn!("❌ {} worker died: {}", name, e);
                ToolResult::failure(&CompositorError::codec(format!("{} worker failed: {}", name, e)))
            }
        }
    }
}
