use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audio::{AudioLoader, AudioSpan, AudioTrack, SyncMode};
use crate::composition::extender::DurationMatcher;
use crate::composition::overlay::OverlayClip;
use crate::composition::timeline::{AudioSpec, ConcatRequest, Segment, SegmentSpec, SlideshowRequest, Timeline};
use crate::config::Config;
use crate::effects::{apply_effects, validate_effects, EffectSpec};
use crate::error::{CompositorError, Result};
use crate::transitions::SequenceClip;
use crate::video::clip::{ClipRef, FitClip, MediaClip, ReleaseGuard, StillClip, WithAudio};
use crate::video::encoder::{ExportSettings, Renderer};
use crate::video::types::{MediaAsset, Rgb};
use crate::video::{FitPolicy, MediaLoader};

/// A composed clip plus the trace of how it was built
pub struct Composite {
    pub clip: ClipRef,

    /// Effects, fits and transitions in the order they were applied
    pub applied: Vec<String>,

    /// Non-fatal adjustments such as clamped transitions
    pub diagnostics: Vec<String>,
}

impl Composite {
    pub fn new(clip: ClipRef) -> Self {
        Self {
            clip,
            applied: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.clip.duration()
    }
}

/// What a finished render produced
#[derive(Debug, Clone, Serialize)]
pub struct CompositeResult {
    pub output_path: PathBuf,
    pub duration: f64,
    pub resolution: (u32, u32),
    pub fps: f64,
    pub file_size: u64,
    pub codec: String,
    pub audio_codec: String,
    pub applied: Vec<String>,
    pub diagnostics: Vec<String>,
    pub job_id: String,
}

/// Timeline composer: resolves sources, fits, applies effects, joins and renders
///
/// Every build step is lazy; nothing is decoded until [`CompositionEngine::render`]
/// pulls frames, and every decoder opened for a composite is released when the
/// render returns, whether it succeeded or not.
pub struct CompositionEngine {
    config: Config,
    loader: MediaLoader,
    renderer: Renderer,
}

impl CompositionEngine {
    pub fn new(config: Config) -> Self {
        let loader = MediaLoader::new(&config.render);
        let renderer = Renderer::new(config.video.clone(), config.render.clone());
        Self { config, loader, renderer }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn loader(&self) -> &MediaLoader {
        &self.loader
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Join video (or image) segments in the order given
    pub fn concatenate(&self, request: &ConcatRequest) -> Result<Composite> {
        info!("🎬 Starting concatenation of {} segments", request.segments.len());

        // Step 1: resolve every source before opening anything
        let assets = self.probe_all(&request.segments)?;
        let segments = request
            .segments
            .iter()
            .zip(assets)
            .map(|(spec, asset)| Segment::resolve(spec, asset, self.config.composition.image_duration))
            .collect::<Result<Vec<_>>>()?;
        let transitions = request
            .transitions
            .expand(segments.len().saturating_sub(1), self.config.composition.transition_duration)?;
        let timeline = Timeline::new(segments, transitions)?;

        let canvas = request
            .resolution
            .unwrap_or_else(|| timeline.segments()[0].asset.size);
        let fit = request.fit.unwrap_or(self.config.composition.fit_policy);
        let background = self.config.composition.background_color;
        info!(
            "   {} segments on a {}x{} canvas ({}), nominal {:.2}s",
            timeline.len(), canvas.0, canvas.1, fit.as_str(), timeline.nominal_duration()
        );

        // Step 2: validate effect lists against the shapes they will see
        for (i, segment) in timeline.segments().iter().enumerate() {
            validate_effects(&segment.effects, canvas, segment.display_duration).map_err(|e| {
                warn!("Segment {} ({}) rejected: {}", i, segment.asset.file_name(), e);
                e
            })?;
        }

        // Step 3: open, fit and decorate each segment
        info!("🎞️  Step 3: Building segment clips...");
        let mut applied = Vec::new();
        let mut clips = Vec::with_capacity(timeline.len());
        for segment in timeline.segments() {
            let clip = self.open_segment(segment)?;
            let clip = self.fit_clip(clip, canvas, fit, background, &mut applied);
            let (clip, effects) = apply_effects(clip, &segment.effects, background)?;
            applied.extend(effects);
            clips.push(clip);
        }

        // Step 4: stitch
        let composite = self.sequence(clips, &timeline, applied, background)?;
        let composite = self.apply_global_effects(composite, &request.effects, background)?;

        // Step 5: audio
        match &request.audio {
            Some(spec) => {
                let track = self.load_audio_track(spec)?;
                let composite = if request.extend_to_audio && track.duration > composite.duration() {
                    self.extend(composite, track.duration)?
                } else {
                    composite
                };
                self.attach_audio(composite, &track)
            }
            None => Ok(composite),
        }
    }

    /// Build an image slideshow
    pub fn slideshow(&self, request: &SlideshowRequest) -> Result<Composite> {
        info!("🖼️  Starting slideshow of {} images", request.images.len());

        let fps = request.fps.unwrap_or(self.config.video.fps);
        let canvas = request.resolution.unwrap_or(self.config.video.resolution);
        let fit = request.fit.unwrap_or(self.config.composition.fit_policy);
        let background = request
            .background_color
            .unwrap_or(self.config.composition.background_color);
        let default_duration = request
            .duration_per_image
            .unwrap_or(self.config.composition.image_duration);

        if !(fps.is_finite() && fps > 0.0) {
            return Err(CompositorError::invalid(format!("fps must be positive, got {}", fps)));
        }
        if canvas.0 == 0 || canvas.1 == 0 {
            return Err(CompositorError::invalid(format!(
                "resolution must be non-zero, got {}x{}",
                canvas.0, canvas.1
            )));
        }

        // Step 1: resolve every image first
        let assets = self.probe_all(&request.images)?;
        if let Some(video) = assets.iter().find(|a| a.is_video()) {
            return Err(CompositorError::invalid(format!(
                "{} is a video; slideshows take still images",
                video.file_name()
            )));
        }
        let segments = request
            .images
            .iter()
            .zip(assets)
            .map(|(spec, asset)| Segment::resolve(spec, asset, default_duration))
            .collect::<Result<Vec<_>>>()?;
        let transitions = request
            .transitions
            .expand(segments.len().saturating_sub(1), self.config.composition.transition_duration)?;
        let timeline = Timeline::new(segments, transitions)?;

        for overlay in &request.text_overlays {
            overlay.validate()?;
        }
        for segment in timeline.segments() {
            validate_effects(&segment.effects, canvas, segment.display_duration)?;
        }

        // Step 2: images are fitted one by one; aspect ratios may differ
        info!("📐 Step 2: Fitting images to {}x{} ({})", canvas.0, canvas.1, fit.as_str());
        let mut applied = Vec::new();
        let mut clips = Vec::with_capacity(timeline.len());
        for (index, segment) in timeline.segments().iter().enumerate() {
            let still: ClipRef = Arc::new(StillClip::new(&segment.asset, segment.display_duration, fps)?);
            let clip = self.fit_clip(still, canvas, fit, background, &mut applied);
            let (clip, effects) = apply_effects(clip, &segment.effects, background)?;
            applied.extend(effects);

            // Captions sit above the image and below the transition blend
            let (clip, captions) = OverlayClip::wrap(clip, index, &request.text_overlays, &self.config.overlay)?;
            applied.extend(captions);
            clips.push(clip);
        }

        // Step 3: transitions
        let composite = self.sequence(clips, &timeline, applied, background)?;
        let composite = self.apply_global_effects(composite, &request.effects, background)?;

        // Step 4: background music always loops to cover the slideshow
        match &request.audio {
            Some(spec) => {
                let track = self.load_audio_track(spec)?.looped(true);
                self.attach_audio(composite, &track)
            }
            None => Ok(composite),
        }
    }

    /// Open a single file as a composite, fitting nothing
    pub fn open(&self, path: &Path) -> Result<Composite> {
        let asset = self.loader.probe(path)?;
        let spec = SegmentSpec::new(path);
        let segment = Segment::resolve(&spec, asset, self.config.composition.image_duration)?;
        Ok(Composite::new(self.open_segment(&segment)?))
    }

    /// Apply an effect list to a whole composite
    pub fn apply_global_effects(&self, mut composite: Composite, effects: &[EffectSpec], background: Rgb) -> Result<Composite> {
        if effects.is_empty() {
            return Ok(composite);
        }
        info!("✨ Applying {} effects", effects.len());
        let (clip, applied) = apply_effects(composite.clip, effects, background)?;
        composite.clip = clip;
        composite.applied.extend(applied);
        Ok(composite)
    }

    /// Stretch a composite to `target` seconds with the configured duration matcher
    pub fn extend(&self, composite: Composite, target: f64) -> Result<Composite> {
        self.extend_using(composite, target, DurationMatcher::from_config(&self.config.composition))
    }

    /// Same as [`CompositionEngine::extend`] with explicit matcher settings
    pub fn extend_using(&self, mut composite: Composite, target: f64, matcher: DurationMatcher) -> Result<Composite> {
        info!("⏱️  Matching video length to {:.2}s", target);
        let extension = matcher.extend(composite.clip, target)?;
        info!("   ✅ Duration now {:.2}s", extension.clip.duration());

        composite.clip = extension.clip;
        composite.applied.extend(extension.applied);
        composite.diagnostics.extend(extension.diagnostics);
        Ok(composite)
    }

    /// Probe an audio file and pair it with a sync mode
    pub fn load_audio_track(&self, spec: &AudioSpec) -> Result<AudioTrack> {
        info!("🎵 Loading audio track {}", spec.path.display());
        if !spec.path.exists() {
            return Err(CompositorError::not_found(&spec.path));
        }

        let info = match AudioLoader::probe(&spec.path) {
            Ok(info) => info,
            Err(e) => {
                debug!("Native probe failed ({}), asking ffprobe", e);
                self.loader.probe_audio(&spec.path)?
            }
        };
        info!("   Loaded: {:.1}s ({})", info.duration, info.format);

        Ok(AudioTrack::new(&info, spec.sync).looped(spec.loop_to_fit))
    }

    /// Combine an external track with the composite's own audio
    pub fn attach_audio(&self, mut composite: Composite, track: &AudioTrack) -> Result<Composite> {
        let duration = composite.duration();
        if !(track.duration.is_finite() && track.duration > 0.0) {
            return Err(CompositorError::invalid(format!(
                "audio track {} has no playable duration",
                track.path.display()
            )));
        }

        let mut span = AudioSpan::new(&track.path, 0.0, track.duration.min(duration));
        if track.loop_to_fit && track.duration < duration {
            span.duration = duration;
            span.looped = true;
        }

        let existing = composite.clip.audio_spans();
        let spans = match track.sync {
            SyncMode::Replace => vec![span],
            SyncMode::Overlay => existing.into_iter().chain(std::iter::once(span)).collect(),
            SyncMode::Mix { weight } => {
                if !(0.0..=1.0).contains(&weight) {
                    return Err(CompositorError::invalid(format!(
                        "mix weight must be within [0, 1], got {}",
                        weight
                    )));
                }
                existing
                    .into_iter()
                    .map(|s| s.with_gain(1.0 - weight))
                    .chain(std::iter::once(span.with_gain(weight)))
                    .collect()
            }
        };

        debug!("Attached {} with {} audio spans", track.sync.name(), spans.len());
        composite.applied.push(format!("audio({}: {})", track.sync.name(), track.path.display()));
        composite.clip = Arc::new(WithAudio::new(composite.clip, spans));
        Ok(composite)
    }

    /// Render a composite, releasing every decoder it opened afterwards
    pub fn render(&self, composite: &Composite, output: &Path, settings: &ExportSettings) -> Result<CompositeResult> {
        let started = Instant::now();
        let guard = ReleaseGuard(composite.clip.clone());
        let outcome = self.renderer.render(&guard.0, output, settings)?;
        drop(guard);

        info!("🎉 Composition complete in {:.1}s: {}", started.elapsed().as_secs_f64(), output.display());
        Ok(CompositeResult {
            output_path: outcome.path,
            duration: outcome.duration,
            resolution: outcome.settings.resolution,
            fps: outcome.settings.fps,
            file_size: outcome.file_size,
            codec: outcome.settings.codec,
            audio_codec: outcome.settings.audio_codec,
            applied: composite.applied.clone(),
            diagnostics: composite.diagnostics.clone(),
            job_id: outcome.job_id,
        })
    }

    // ==========================================
    // HELPERS
    // ==========================================

    /// Probe every source, failing on the first missing or unreadable one
    fn probe_all(&self, specs: &[SegmentSpec]) -> Result<Vec<MediaAsset>> {
        info!("📹 Step 1: Resolving {} sources...", specs.len());
        if specs.is_empty() {
            return Err(CompositorError::invalid("no sources given"));
        }

        let assets = specs
            .iter()
            .map(|spec| {
                self.loader.probe(&spec.path).map_err(|e| {
                    warn!("Aborting: {}", e);
                    e
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for asset in &assets {
            debug!(
                "   {} {:?} {}x{} {}",
                asset.file_name(),
                asset.kind,
                asset.size.0,
                asset.size.1,
                asset.duration.map(|d| format!("{:.2}s", d)).unwrap_or_default()
            );
        }
        Ok(assets)
    }

    fn open_segment(&self, segment: &Segment) -> Result<ClipRef> {
        let fps = self.config.video.fps;
        if segment.asset.is_video() {
            Ok(Arc::new(MediaClip::open(
                &segment.asset,
                Some(segment.in_point),
                Some(segment.out_point),
                &self.config.render,
                fps,
            )?))
        } else {
            Ok(Arc::new(StillClip::new(&segment.asset, segment.display_duration, fps)?))
        }
    }

    fn fit_clip(&self, clip: ClipRef, canvas: (u32, u32), fit: FitPolicy, background: Rgb, applied: &mut Vec<String>) -> ClipRef {
        let (clip, transform) = FitClip::wrap(clip, canvas, fit, background);
        if !transform.is_identity() {
            applied.push(transform.describe());
        }
        clip
    }

    fn sequence(&self, clips: Vec<ClipRef>, timeline: &Timeline, mut applied: Vec<String>, background: Rgb) -> Result<Composite> {
        info!("🔗 Joining {} clips", clips.len());
        let sequenced = SequenceClip::build(
            clips,
            timeline.transitions().to_vec(),
            background,
            self.config.composition.zoom_transition_factor,
        )?;
        applied.extend(sequenced.applied);

        let clip: ClipRef = Arc::new(sequenced.clip);
        info!("   ✅ Composite length {:.2}s", clip.duration());
        Ok(Composite {
            clip,
            applied,
            diagnostics: sequenced.diagnostics,
        })
    }
}
