use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::CompositionConfig;
use crate::effects::{apply_effects, EffectSpec};
use crate::error::{CompositorError, Result};
use crate::transitions::{SequenceClip, TransitionSpec};
use crate::video::clip::{ClipRef, SubClip, TIME_EPSILON};
use crate::video::types::Rgb;

/// Default ceiling on appended tail copies
pub const DEFAULT_MAX_REPEATS: usize = 1000;

/// Stretches a video to a longer target by replaying its tail with crossfades
///
/// The base footage plays untouched. The first tail copy follows it with a
/// hard join and fades in from the background; later copies crossfade into
/// each other. Every copy reads its own forked source.
#[derive(Debug, Clone, Copy)]
pub struct DurationMatcher {
    /// Nominal length of the repeated tail window (seconds)
    pub segment_length: f64,

    /// Crossfade between consecutive copies (seconds)
    pub fade_duration: f64,

    pub background: Rgb,

    /// Extensions needing more copies than this are refused
    pub max_repeats: usize,
}

/// Result of a duration match
pub struct Extension {
    pub clip: ClipRef,

    /// Number of tail copies appended (0 when nothing was extended)
    pub repeats: usize,

    pub applied: Vec<String>,
    pub diagnostics: Vec<String>,
}

impl DurationMatcher {
    pub fn new(segment_length: f64, fade_duration: f64, background: Rgb) -> Self {
        Self {
            segment_length,
            fade_duration,
            background,
            max_repeats: DEFAULT_MAX_REPEATS,
        }
    }

    pub fn from_config(config: &CompositionConfig) -> Self {
        Self::new(config.segment_length, config.fade_duration, config.background_color)
            .with_max_repeats(config.max_extension_repeats)
    }

    pub fn with_max_repeats(mut self, max_repeats: usize) -> Self {
        self.max_repeats = max_repeats;
        self
    }

    /// Copies needed to cover `deficit` seconds
    ///
    /// The first copy adds a whole window; each later one loses `fade` to its
    /// crossfade.
    fn repeats_for(deficit: f64, window: f64, fade: f64) -> f64 {
        if deficit <= window + TIME_EPSILON {
            1.0
        } else {
            1.0 + ((deficit - window) / (window - fade)).ceil()
        }
    }

    /// Produce a clip lasting exactly `target` seconds
    ///
    /// When `target` does not exceed the base duration the base clip itself
    /// is returned.
    pub fn extend(&self, base: ClipRef, target: f64) -> Result<Extension> {
        if !(self.segment_length.is_finite() && self.segment_length > 0.0) {
            return Err(CompositorError::invalid(format!(
                "segment_length must be positive, got {}",
                self.segment_length
            )));
        }
        if !(self.fade_duration.is_finite() && self.fade_duration >= 0.0) {
            return Err(CompositorError::invalid(format!(
                "fade_duration must not be negative, got {}",
                self.fade_duration
            )));
        }
        if !target.is_finite() {
            return Err(CompositorError::invalid(format!("target duration must be finite, got {}", target)));
        }

        let base_duration = base.duration();
        let deficit = target - base_duration;
        if deficit <= TIME_EPSILON {
            debug!(
                "No extension needed: video {:.3}s already covers target {:.3}s",
                base_duration, target
            );
            return Ok(Extension {
                clip: base,
                repeats: 0,
                applied: Vec::new(),
                diagnostics: Vec::new(),
            });
        }
        if base_duration <= TIME_EPSILON {
            return Err(CompositorError::invalid("cannot extend an empty video"));
        }

        let mut diagnostics = Vec::new();

        // Whole base video when it is shorter than the nominal window
        let window = self.segment_length.min(base_duration);
        let mut fade = self.fade_duration;
        if fade > window / 2.0 {
            let message = format!(
                "extension crossfade shortened from {:.3}s to {:.3}s (half of the {:.3}s repeat window)",
                fade,
                window / 2.0,
                window
            );
            warn!("{}", message);
            diagnostics.push(message);
            fade = window / 2.0;
        }

        let needed = Self::repeats_for(deficit, window, fade);
        if needed > self.max_repeats as f64 {
            return Err(CompositorError::invalid(format!(
                "extending {:.2}s to {:.2}s needs {} copies of a {:.2}s window (limit {})",
                base_duration, target, needed, window, self.max_repeats
            )));
        }
        let repeats = needed as usize;

        info!(
            "🔁 Extending {:.2}s video to {:.2}s: {} x {:.2}s tail copies, {:.2}s crossfades",
            base_duration, target, repeats, window, fade
        );

        let mut clips = Vec::with_capacity(repeats + 1);
        let mut transitions = Vec::with_capacity(repeats);
        for i in 0..repeats {
            let tail: ClipRef = Arc::new(SubClip::new(base.fork(), base_duration - window, base_duration)?);
            if i == 0 {
                let entrance = if fade > 0.0 {
                    apply_effects(
                        tail,
                        &[EffectSpec::FadeIn { duration: fade }, EffectSpec::AudioFadeIn { duration: fade }],
                        self.background,
                    )?
                    .0
                } else {
                    tail
                };
                clips.push(entrance);
                transitions.push(TransitionSpec::cut());
            } else {
                clips.push(tail);
                transitions.push(TransitionSpec::crossfade(fade));
            }
        }
        clips.insert(0, base);

        let sequenced = SequenceClip::build(clips, transitions, self.background, 1.0)?;
        diagnostics.extend(sequenced.diagnostics);

        let assembled: ClipRef = Arc::new(sequenced.clip);
        debug!("Assembled {:.3}s before trimming to {:.3}s", assembled.duration(), target);

        let clip: ClipRef = Arc::new(SubClip::new(assembled, 0.0, target)?);

        Ok(Extension {
            clip,
            repeats,
            applied: vec![format!("extend({:.2}s -> {:.2}s, {} repeats)", base_duration, target, repeats)],
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::clip::testing::{code, TimeCodeClip};
    use crate::video::clip::Clip;
    use crate::video::types::Frame;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn matcher(segment: f64, fade: f64) -> DurationMatcher {
        DurationMatcher::new(segment, fade, Rgb::BLACK)
    }

    #[test]
    fn test_forty_to_hundred_seconds() {
        let base = TimeCodeClip::new(40.0, 7).shared();
        let extension = matcher(10.0, 1.0).extend(base, 100.0).unwrap();

        let duration = extension.clip.duration();
        assert!((99.9..=100.1).contains(&duration), "duration {}", duration);
        assert_eq!(extension.repeats, 7);
        assert!(extension.diagnostics.is_empty());
    }

    #[test]
    fn test_base_footage_is_untouched() {
        let base = TimeCodeClip::new(40.0, 7).shared();
        let extension = matcher(10.0, 1.0).extend(base, 100.0).unwrap();

        for t in [0.0, 5.5, 20.0, 38.9, 39.0, 39.5, 39.9] {
            assert_eq!(extension.clip.frame_at(t).unwrap().get_pixel(0, 0), code(7, t), "t = {}", t);
        }
    }

    #[test]
    fn test_tail_is_replayed() {
        let base = TimeCodeClip::new(40.0, 7).shared();
        let extension = matcher(10.0, 1.0).extend(base, 100.0).unwrap();

        // First copy starts at 40s, fades in over 1s and plays source 30s..40s
        let entering = extension.clip.frame_at(40.5).unwrap().get_pixel(0, 0);
        assert!(entering[0] < 7, "expected a fade from black, got {:?}", entering);
        assert_eq!(extension.clip.frame_at(42.5).unwrap().get_pixel(0, 0), code(7, 32.5));

        // Second copy starts at 49s behind a 1s crossfade
        assert_eq!(extension.clip.frame_at(51.0).unwrap().get_pixel(0, 0), code(7, 32.0));
    }

    #[test]
    fn test_no_extension_returns_same_clip() {
        let base = TimeCodeClip::new(40.0, 1).shared();
        for target in [40.0, 12.0] {
            let extension = matcher(10.0, 1.0).extend(base.clone(), target).unwrap();
            assert!(Arc::ptr_eq(&base, &extension.clip));
            assert_eq!(extension.repeats, 0);
        }
    }

    #[test]
    fn test_short_deficit_needs_one_copy() {
        let base = TimeCodeClip::new(40.0, 7).shared();
        let extension = matcher(10.0, 1.0).extend(base, 45.0).unwrap();
        assert_eq!(extension.repeats, 1);
        assert!((extension.clip.duration() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_base_uses_whole_video_and_clamps_fade() {
        let base = TimeCodeClip::new(3.0, 2).shared();
        let extension = matcher(10.0, 2.0).extend(base, 9.0).unwrap();

        assert!((extension.clip.duration() - 9.0).abs() < 1e-9);
        assert_eq!(extension.diagnostics.len(), 1);
    }

    #[test]
    fn test_audio_follows_extension() {
        let base = TimeCodeClip::new(8.0, 1).with_audio("v.wav").shared();
        let extension = matcher(4.0, 1.0).extend(base, 14.0).unwrap();

        let spans = extension.clip.audio_spans();
        assert!(spans.len() >= 2);
        assert_eq!(spans[0].fade_out, 0.0);
        let end = spans.iter().map(|s| s.end()).fold(0.0, f64::max);
        assert!((end - 14.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_bad_settings() {
        let base = TimeCodeClip::new(8.0, 1).shared();
        assert!(matcher(0.0, 1.0).extend(base.clone(), 20.0).is_err());
        assert!(matcher(5.0, -1.0).extend(base, 20.0).is_err());
    }

    #[test]
    fn test_refuses_more_copies_than_the_ceiling() {
        let base = TimeCodeClip::new(0.5, 1).shared();
        let err = matcher(10.0, 0.1)
            .with_max_repeats(20)
            .extend(base.clone(), 3600.0)
            .err()
            .unwrap();
        assert!(err.is_invalid_parameters());

        assert!(matcher(10.0, 0.1).with_max_repeats(20).extend(base, 5.0).is_ok());
    }

    /// Counts how many independent sources were opened from it
    struct ForkCounter {
        inner: ClipRef,
        forks: Arc<AtomicUsize>,
    }

    impl Clip for ForkCounter {
        fn duration(&self) -> f64 {
            self.inner.duration()
        }

        fn size(&self) -> (u32, u32) {
            self.inner.size()
        }

        fn fps(&self) -> f64 {
            self.inner.fps()
        }

        fn frame_at(&self, t: f64) -> crate::error::Result<Frame> {
            self.inner.frame_at(t)
        }

        fn fork(&self) -> ClipRef {
            self.forks.fetch_add(1, Ordering::SeqCst);
            Arc::new(ForkCounter {
                inner: self.inner.fork(),
                forks: self.forks.clone(),
            })
        }
    }

    #[test]
    fn test_every_copy_reads_its_own_source() {
        let forks = Arc::new(AtomicUsize::new(0));
        let base: ClipRef = Arc::new(ForkCounter {
            inner: TimeCodeClip::new(40.0, 7).shared(),
            forks: forks.clone(),
        });
        let extension = matcher(10.0, 1.0).extend(base, 100.0).unwrap();
        assert_eq!(forks.load(Ordering::SeqCst), extension.repeats);
    }

    proptest! {
        #[test]
        fn prop_extension_hits_target(
            base in 0.5f64..60.0,
            extra in 0.01f64..120.0,
            segment in 0.5f64..20.0,
            fade in 0.0f64..3.0,
        ) {
            let clip = TimeCodeClip::new(base, 1).shared();
            let target = base + extra;
            let extension = matcher(segment, fade).extend(clip, target).unwrap();
            prop_assert!((extension.clip.duration() - target).abs() < 1.0 / 30.0);
        }
    }
}
