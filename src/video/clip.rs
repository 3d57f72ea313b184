//! # Clip Model
//!
//! A [`Clip`] is an immutable, lazily evaluated piece of timeline: it knows
//! its duration, canvas size and frame rate, produces a frame for any local
//! time on demand and reports the audio it carries as [`AudioSpan`]s.
//! Effects, fits, trims and transitions all wrap one clip into another, so a
//! composite is a tree of `Arc<dyn Clip>` that is only pulled frame by frame
//! at render time.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::audio::AudioSpan;
use crate::config::RenderConfig;
use crate::error::{CompositorError, Result};
use crate::video::geometry::{apply_fit, fit, FitPolicy, FitTransform};
use crate::video::loader::VideoDecoder;
use crate::video::types::{Frame, MediaAsset, Rgb};

/// Tolerance used when comparing timeline positions (seconds)
pub const TIME_EPSILON: f64 = 1e-6;

/// A lazily evaluated, thread-safe piece of video
pub trait Clip: Send + Sync {
    /// Length in seconds
    fn duration(&self) -> f64;

    /// Frame size (width, height)
    fn size(&self) -> (u32, u32);

    /// Nominal frame rate
    fn fps(&self) -> f64;

    /// Frame shown at local time `t`; `t` is clamped into `[0, duration)`
    fn frame_at(&self, t: f64) -> Result<Frame>;

    /// Audio carried by this clip on its local timeline
    fn audio_spans(&self) -> Vec<AudioSpan> {
        Vec::new()
    }

    /// Free decoder resources; the clip stays usable and reopens on demand
    fn release(&self) {}

    /// Same clip over fresh decoder state
    ///
    /// Used wherever one piece of footage is placed on the timeline more than
    /// once, so each placement seeks its own source instead of sharing one.
    fn fork(&self) -> ClipRef;
}

/// Shared handle to a clip
pub type ClipRef = Arc<dyn Clip>;

/// Clamp `t` into `[0, duration)`
pub fn clamp_time(t: f64, duration: f64) -> f64 {
    if !t.is_finite() || t <= 0.0 || duration <= 0.0 {
        return 0.0;
    }
    t.min((duration - TIME_EPSILON).max(0.0))
}

/// Trimmed range of a video file
pub struct MediaClip {
    asset: MediaAsset,
    decoder: VideoDecoder,
    in_point: f64,
    out_point: f64,
}

impl MediaClip {
    /// Open `asset` between `in_point` and `out_point` (defaults: whole file)
    pub fn open(
        asset: &MediaAsset,
        in_point: Option<f64>,
        out_point: Option<f64>,
        render: &RenderConfig,
        fallback_fps: f64,
    ) -> Result<Self> {
        let natural = asset.duration.ok_or_else(|| {
            CompositorError::invalid(format!("{} is not a video", asset.path.display()))
        })?;
        let in_point = in_point.unwrap_or(0.0);
        let out_point = out_point.unwrap_or(natural);

        if !(in_point.is_finite() && out_point.is_finite())
            || in_point < 0.0
            || in_point >= out_point
            || out_point > natural + TIME_EPSILON
        {
            return Err(CompositorError::invalid(format!(
                "segment {} must satisfy 0 <= in ({}) < out ({}) <= duration ({:.3})",
                asset.file_name(), in_point, out_point, natural
            )));
        }

        Ok(Self {
            asset: asset.clone(),
            decoder: VideoDecoder::new(asset, render, fallback_fps),
            in_point,
            out_point: out_point.min(natural),
        })
    }
}

impl Clip for MediaClip {
    fn duration(&self) -> f64 {
        self.out_point - self.in_point
    }

    fn size(&self) -> (u32, u32) {
        self.asset.size
    }

    fn fps(&self) -> f64 {
        self.decoder.fps()
    }

    fn frame_at(&self, t: f64) -> Result<Frame> {
        self.decoder.frame_at(self.in_point + clamp_time(t, self.duration()))
    }

    fn audio_spans(&self) -> Vec<AudioSpan> {
        if self.asset.has_audio {
            vec![AudioSpan::new(&self.asset.path, self.in_point, self.duration())]
        } else {
            Vec::new()
        }
    }

    fn release(&self) {
        self.decoder.release();
    }

    fn fork(&self) -> ClipRef {
        Arc::new(Self {
            asset: self.asset.clone(),
            decoder: self.decoder.fork(),
            in_point: self.in_point,
            out_point: self.out_point,
        })
    }
}

/// A still image held for a fixed duration
pub struct StillClip {
    path: PathBuf,
    size: (u32, u32),
    duration: f64,
    fps: f64,
    image: Mutex<Option<Frame>>,
}

impl StillClip {
    pub fn new(asset: &MediaAsset, duration: f64, fps: f64) -> Result<Self> {
        if !(duration.is_finite() && duration > 0.0) {
            return Err(CompositorError::invalid(format!(
                "display duration for {} must be positive, got {}",
                asset.file_name(),
                duration
            )));
        }
        Ok(Self {
            path: asset.path.clone(),
            size: asset.size,
            duration,
            fps,
            image: Mutex::new(None),
        })
    }

    fn load(&self) -> Result<Frame> {
        let image = image::open(&self.path)
            .map_err(|e| CompositorError::codec(format!("{}: {}", self.path.display(), e)))?;
        Ok(Frame::new(image.to_rgb8()))
    }
}

impl Clip for StillClip {
    fn duration(&self) -> f64 {
        self.duration
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_at(&self, _t: f64) -> Result<Frame> {
        let mut slot = self
            .image
            .lock()
            .map_err(|_| CompositorError::codec("image lock poisoned"))?;
        if slot.is_none() {
            *slot = Some(self.load()?);
        }
        slot.clone()
            .ok_or_else(|| CompositorError::codec(format!("{} could not be loaded", self.path.display())))
    }

    fn release(&self) {
        if let Ok(mut slot) = self.image.lock() {
            *slot = None;
        }
    }

    fn fork(&self) -> ClipRef {
        Arc::new(Self {
            path: self.path.clone(),
            size: self.size,
            duration: self.duration,
            fps: self.fps,
            image: Mutex::new(None),
        })
    }
}

/// Solid colour
pub struct ColorClip {
    size: (u32, u32),
    color: Rgb,
    duration: f64,
    fps: f64,
}

impl ColorClip {
    pub fn new(size: (u32, u32), color: Rgb, duration: f64, fps: f64) -> Self {
        Self { size, color, duration, fps }
    }
}

impl Clip for ColorClip {
    fn duration(&self) -> f64 {
        self.duration
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_at(&self, _t: f64) -> Result<Frame> {
        Ok(Frame::new_filled(self.size.0, self.size.1, self.color))
    }

    fn fork(&self) -> ClipRef {
        Arc::new(Self::new(self.size, self.color, self.duration, self.fps))
    }
}

/// Window `[start, end)` of another clip
pub struct SubClip {
    inner: ClipRef,
    start: f64,
    end: f64,
}

impl SubClip {
    pub fn new(inner: ClipRef, start: f64, end: f64) -> Result<Self> {
        let duration = inner.duration();
        if !(start.is_finite() && end.is_finite())
            || start < 0.0
            || start >= end
            || end > duration + TIME_EPSILON
        {
            return Err(CompositorError::invalid(format!(
                "sub-clip [{}, {}) is outside [0, {:.3}]",
                start, end, duration
            )));
        }
        Ok(Self {
            inner,
            start,
            end: end.min(duration),
        })
    }
}

impl Clip for SubClip {
    fn duration(&self) -> f64 {
        self.end - self.start
    }

    fn size(&self) -> (u32, u32) {
        self.inner.size()
    }

    fn fps(&self) -> f64 {
        self.inner.fps()
    }

    fn frame_at(&self, t: f64) -> Result<Frame> {
        self.inner.frame_at(self.start + clamp_time(t, self.duration()))
    }

    fn audio_spans(&self) -> Vec<AudioSpan> {
        self.inner
            .audio_spans()
            .iter()
            .filter_map(|span| span.window(self.start, self.end))
            .collect()
    }

    fn release(&self) {
        self.inner.release();
    }

    fn fork(&self) -> ClipRef {
        Arc::new(Self {
            inner: self.inner.fork(),
            start: self.start,
            end: self.end,
        })
    }
}

/// Another clip placed on a canvas by the geometry fitter
pub struct FitClip {
    inner: ClipRef,
    transform: FitTransform,
    background: Rgb,
}

impl FitClip {
    /// Fit `inner` onto `target`; returns `inner` untouched when it already matches
    pub fn wrap(inner: ClipRef, target: (u32, u32), policy: FitPolicy, background: Rgb) -> (ClipRef, FitTransform) {
        let transform = fit(inner.size(), target, policy);
        if transform.is_identity() && inner.size() == target {
            return (inner, transform);
        }
        let clip = Arc::new(Self { inner, transform, background });
        (clip, transform)
    }
}

impl Clip for FitClip {
    fn duration(&self) -> f64 {
        self.inner.duration()
    }

    fn size(&self) -> (u32, u32) {
        self.transform.target
    }

    fn fps(&self) -> f64 {
        self.inner.fps()
    }

    fn frame_at(&self, t: f64) -> Result<Frame> {
        let frame = self.inner.frame_at(t)?;
        Ok(apply_fit(&frame, &self.transform, self.background))
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
            transform: self.transform,
            background: self.background,
        })
    }
}

/// Another clip with its audio replaced
pub struct WithAudio {
    inner: ClipRef,
    spans: Vec<AudioSpan>,
}

impl WithAudio {
    pub fn new(inner: ClipRef, spans: Vec<AudioSpan>) -> Self {
        Self { inner, spans }
    }
}

impl Clip for WithAudio {
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
        self.inner.frame_at(t)
    }

    fn audio_spans(&self) -> Vec<AudioSpan> {
        self.spans.clone()
    }

    fn release(&self) {
        self.inner.release();
    }

    fn fork(&self) -> ClipRef {
        Arc::new(Self::new(self.inner.fork(), self.spans.clone()))
    }
}

/// Releases a clip tree when dropped, on success and failure paths alike
pub struct ReleaseGuard(pub ClipRef);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_clamp_time() {
        assert_eq!(clamp_time(-1.0, 5.0), 0.0);
        assert_eq!(clamp_time(f64::NAN, 5.0), 0.0);
        assert!(clamp_time(5.0, 5.0) < 5.0);
        assert_eq!(clamp_time(2.5, 5.0), 2.5);
    }

    #[test]
    fn test_sub_clip_windows_frames_and_audio() {
        let base = TimeCodeClip::new(10.0, 1).with_audio("a.wav").shared();
        let sub = SubClip::new(base, 2.0, 5.0).unwrap();

        assert_eq!(sub.duration(), 3.0);
        assert_eq!(sub.frame_at(0.5).unwrap().get_pixel(0, 0), code(1, 2.5));

        let spans = sub.audio_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].source_start, 2.0);
        assert_eq!(spans[0].duration, 3.0);
    }

    #[test]
    fn test_sub_clip_rejects_bad_ranges() {
        let base = TimeCodeClip::new(4.0, 1).shared();
        assert!(SubClip::new(base.clone(), 3.0, 2.0).is_err());
        assert!(SubClip::new(base.clone(), 0.0, 4.5).is_err());
        assert!(SubClip::new(base, -1.0, 2.0).is_err());
    }

    #[test]
    fn test_fit_clip_letterboxes_onto_canvas() {
        let square = TimeCodeClip::new(1.0, 200).sized((10, 10)).shared();
        let (fitted, transform) = FitClip::wrap(square, (20, 10), FitPolicy::Contain, Rgb::BLACK);

        assert_eq!(fitted.size(), (20, 10));
        assert_eq!(transform.placed_rect(), (5, 0, 10, 10));
        let frame = fitted.frame_at(0.0).unwrap();
        assert_eq!(frame.get_pixel(0, 5), [0, 0, 0]);
        assert_eq!(frame.get_pixel(10, 5)[0], 200);
    }

    #[test]
    fn test_fit_clip_identity_returns_same_clip() {
        let clip = TimeCodeClip::new(1.0, 1).sized((8, 8)).shared();
        let (fitted, _) = FitClip::wrap(clip.clone(), (8, 8), FitPolicy::Cover, Rgb::BLACK);
        assert!(Arc::ptr_eq(&clip, &fitted));
    }

    struct CountingClip(AtomicUsize);

    impl Clip for CountingClip {
        fn duration(&self) -> f64 {
            1.0
        }

        fn size(&self) -> (u32, u32) {
            (1, 1)
        }

        fn fps(&self) -> f64 {
            1.0
        }

        fn frame_at(&self, _t: f64) -> Result<Frame> {
            Err(CompositorError::codec("unused"))
        }

        fn release(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn fork(&self) -> ClipRef {
            Arc::new(CountingClip(AtomicUsize::new(0)))
        }
    }

    #[test]
    fn test_release_guard_releases_through_wrappers() {
        let counter = Arc::new(CountingClip(AtomicUsize::new(0)));
        {
            let wrapped: ClipRef = Arc::new(WithAudio::new(counter.clone(), Vec::new()));
            let _guard = ReleaseGuard(wrapped);
        }
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fork_rebuilds_wrappers_over_independent_sources() {
        let base = TimeCodeClip::new(10.0, 4).with_audio("a.wav").shared();
        let sub: ClipRef = Arc::new(SubClip::new(base, 2.0, 6.0).unwrap());
        let (fitted, _) = FitClip::wrap(sub, (32, 18), FitPolicy::Contain, Rgb::BLACK);

        let forked = fitted.fork();
        assert!(!Arc::ptr_eq(&fitted, &forked));
        assert_eq!(forked.duration(), fitted.duration());
        assert_eq!(forked.size(), (32, 18));
        assert_eq!(forked.frame_at(1.0).unwrap(), fitted.frame_at(1.0).unwrap());
        assert_eq!(forked.audio_spans(), fitted.audio_spans());
    }

    #[test]
    fn test_fork_does_not_share_release_state() {
        let counter = Arc::new(CountingClip(AtomicUsize::new(0)));
        let wrapped: ClipRef = Arc::new(WithAudio::new(counter.clone(), Vec::new()));
        wrapped.fork().release();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_still_clip_requires_positive_duration() {
        let asset = MediaAsset {
            path: PathBuf::from("x.png"),
            kind: crate::video::types::MediaKind::StillImage,
            duration: None,
            size: (4, 4),
            fps: None,
            has_audio: false,
            codec: None,
        };
        assert!(StillClip::new(&asset, 0.0, 30.0).is_err());
        assert!(StillClip::new(&asset, 2.0, 30.0).is_ok());
    }
}
