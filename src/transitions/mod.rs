//! # Transition Engine
//!
//! Joins clips end to end. Each boundary carries a [`TransitionSpec`] whose
//! duration is an overlap: the incoming clip starts `d` seconds before the
//! outgoing one ends, so a sequence of clips `d1..dn` with transitions
//! `t1..t(n-1)` lasts `Σd − Σt`.

use std::sync::Arc;

use image::imageops;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::AudioSpan;
use crate::effects::pixel;
use crate::error::{CompositorError, Result};
use crate::video::clip::{Clip, ClipRef, TIME_EPSILON};
use crate::video::types::{Frame, Rgb};

/// Blend function used at a boundary
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionKind {
    /// Instantaneous switch
    #[default]
    Cut,
    /// Same linear alpha ramp as `Crossfade`
    Fade,
    Crossfade,
    /// Incoming clip enters from the left edge, both clips move rightwards
    SlideLeft,
    /// Incoming clip enters from the right edge, both clips move leftwards
    SlideRight,
    /// Incoming clip enters from the top edge, both clips move downwards
    SlideUp,
    /// Incoming clip enters from the bottom edge, both clips move upwards
    SlideDown,
    /// Incoming clip scales from `factor` down to 1.0 while the outgoing one scales up
    Zoom {
        #[serde(default)]
        factor: Option<f64>,
    },
}

impl TransitionKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransitionKind::Cut => "cut",
            TransitionKind::Fade => "fade",
            TransitionKind::Crossfade => "crossfade",
            TransitionKind::SlideLeft => "slide_left",
            TransitionKind::SlideRight => "slide_right",
            TransitionKind::SlideUp => "slide_up",
            TransitionKind::SlideDown => "slide_down",
            TransitionKind::Zoom { .. } => "zoom",
        }
    }

    /// Parse the plain names accepted by the tool surface
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "cut" | "none" => Ok(TransitionKind::Cut),
            "fade" => Ok(TransitionKind::Fade),
            "crossfade" => Ok(TransitionKind::Crossfade),
            "slide_left" => Ok(TransitionKind::SlideLeft),
            "slide_right" => Ok(TransitionKind::SlideRight),
            "slide_up" => Ok(TransitionKind::SlideUp),
            "slide_down" => Ok(TransitionKind::SlideDown),
            "zoom" => Ok(TransitionKind::Zoom { factor: None }),
            other => Err(CompositorError::invalid(format!("unknown transition type '{}'", other))),
        }
    }
}

/// A transition at one segment boundary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    #[serde(flatten)]
    pub kind: TransitionKind,

    /// Overlap window in seconds
    #[serde(default)]
    pub duration: f64,
}

impl TransitionSpec {
    pub fn new(kind: TransitionKind, duration: f64) -> Self {
        Self { kind, duration }
    }

    pub fn cut() -> Self {
        Self::new(TransitionKind::Cut, 0.0)
    }

    pub fn crossfade(duration: f64) -> Self {
        Self::new(TransitionKind::Crossfade, duration)
    }

    /// Effective overlap; cuts never overlap
    pub fn overlap(&self) -> f64 {
        match self.kind {
            TransitionKind::Cut => 0.0,
            _ => self.duration,
        }
    }

    pub fn describe(&self) -> String {
        match self.kind {
            TransitionKind::Cut => "cut".to_string(),
            _ => format!("{}({}s)", self.kind.name(), self.duration),
        }
    }
}

/// Opacity of (outgoing, incoming) at time `t` into a window of length `d`
pub fn crossfade_alphas(t: f64, d: f64) -> (f64, f64) {
    if d <= 0.0 {
        return (0.0, 1.0);
    }
    let incoming = (t / d).clamp(0.0, 1.0);
    (1.0 - incoming, incoming)
}

/// Frame at progress `p` in `[0, 1]` of a transition from `outgoing` to `incoming`
pub fn blend(
    kind: TransitionKind,
    outgoing: &Frame,
    incoming: &Frame,
    p: f64,
    zoom_factor: f64,
    background: Rgb,
) -> Frame {
    let p = p.clamp(0.0, 1.0);
    let (w, h) = (outgoing.width() as f64, outgoing.height() as f64);

    let slide = |ox: f64, oy: f64, ix: f64, iy: f64| {
        let mut canvas = Frame::new_filled(outgoing.width(), outgoing.height(), background);
        imageops::replace(canvas.as_image_mut(), outgoing.as_image(), ox.round() as i64, oy.round() as i64);
        imageops::replace(canvas.as_image_mut(), incoming.as_image(), ix.round() as i64, iy.round() as i64);
        canvas
    };

    match kind {
        TransitionKind::Cut => incoming.clone(),
        TransitionKind::Fade | TransitionKind::Crossfade => outgoing.mix(incoming, p),
        TransitionKind::SlideLeft => slide(p * w, 0.0, (p - 1.0) * w, 0.0),
        TransitionKind::SlideRight => slide(-p * w, 0.0, (1.0 - p) * w, 0.0),
        TransitionKind::SlideUp => slide(0.0, p * h, 0.0, (p - 1.0) * h),
        TransitionKind::SlideDown => slide(0.0, -p * h, 0.0, (1.0 - p) * h),
        TransitionKind::Zoom { factor } => {
            let factor = factor.unwrap_or(zoom_factor);
            let out_scale = 1.0 + (factor - 1.0) * p;
            let in_scale = factor + (1.0 - factor) * p;
            let out_frame = pixel::zoom_center(outgoing, out_scale, background);
            let in_frame = pixel::zoom_center(incoming, in_scale, background);
            out_frame.mix(&in_frame, p)
        }
    }
}

/// Clips joined end to end with transitions at each boundary
pub struct SequenceClip {
    clips: Vec<ClipRef>,
    transitions: Vec<TransitionSpec>,
    starts: Vec<f64>,
    duration: f64,
    background: Rgb,
    zoom_factor: f64,
}

/// A built sequence plus what happened while building it
pub struct Sequenced {
    pub clip: SequenceClip,
    pub applied: Vec<String>,
    pub diagnostics: Vec<String>,
}

impl SequenceClip {
    /// Join `clips` with `transitions` (one per boundary)
    ///
    /// All clips must share one canvas size. Transitions longer than half of
    /// either neighbour are shortened to that limit and reported as a
    /// diagnostic.
    pub fn build(
        clips: Vec<ClipRef>,
        transitions: Vec<TransitionSpec>,
        background: Rgb,
        zoom_factor: f64,
    ) -> Result<Sequenced> {
        let first = clips
            .first()
            .ok_or_else(|| CompositorError::invalid("cannot sequence an empty clip list"))?;
        if transitions.len() + 1 != clips.len() {
            return Err(CompositorError::invalid(format!(
                "{} clips need {} transitions, got {}",
                clips.len(),
                clips.len() - 1,
                transitions.len()
            )));
        }

        let size = first.size();
        if let Some((i, clip)) = clips.iter().enumerate().find(|(_, c)| c.size() != size) {
            return Err(CompositorError::invalid(format!(
                "clip {} is {}x{} but the sequence canvas is {}x{}",
                i, clip.size().0, clip.size().1, size.0, size.1
            )));
        }

        let mut diagnostics = Vec::new();
        let mut applied = Vec::new();
        let mut clamped = Vec::with_capacity(transitions.len());

        for (i, spec) in transitions.into_iter().enumerate() {
            if !(spec.duration.is_finite() && spec.duration >= 0.0) {
                return Err(CompositorError::invalid(format!(
                    "transition {} has invalid duration {}",
                    i, spec.duration
                )));
            }
            if let TransitionKind::Zoom { factor: Some(f) } = spec.kind {
                if !(f.is_finite() && f > 0.0) {
                    return Err(CompositorError::invalid(format!("zoom transition factor must be positive, got {}", f)));
                }
            }

            let limit = clips[i].duration().min(clips[i + 1].duration()) / 2.0;
            let mut spec = spec;
            if spec.overlap() > limit + TIME_EPSILON {
                let message = format!(
                    "transition {} ({}) shortened from {:.3}s to {:.3}s (half of the shorter neighbour)",
                    i, spec.kind.name(), spec.duration, limit
                );
                warn!("{}", message);
                diagnostics.push(message);
                spec.duration = limit;
            }
            applied.push(spec.describe());
            clamped.push(spec);
        }

        let mut starts = Vec::with_capacity(clips.len());
        let mut cursor = 0.0;
        for (i, clip) in clips.iter().enumerate() {
            starts.push(cursor);
            cursor += clip.duration() - clamped.get(i).map(|t| t.overlap()).unwrap_or(0.0);
        }
        let duration = cursor;

        debug!("Sequenced {} clips into {:.3}s", clips.len(), duration);

        Ok(Sequenced {
            clip: SequenceClip {
                clips,
                transitions: clamped,
                starts,
                duration,
                background,
                zoom_factor,
            },
            applied,
            diagnostics,
        })
    }

    /// Start of each clip on the sequence timeline
    pub fn starts(&self) -> &[f64] {
        &self.starts
    }

    /// Transitions after clamping
    pub fn transitions(&self) -> &[TransitionSpec] {
        &self.transitions
    }

    fn index_at(&self, t: f64) -> usize {
        self.starts
            .iter()
            .rposition(|&s| t >= s - TIME_EPSILON)
            .unwrap_or(0)
    }
}

impl Clip for SequenceClip {
    fn duration(&self) -> f64 {
        self.duration
    }

    fn size(&self) -> (u32, u32) {
        self.clips[0].size()
    }

    fn fps(&self) -> f64 {
        self.clips[0].fps()
    }

    fn frame_at(&self, t: f64) -> Result<Frame> {
        let t = crate::video::clip::clamp_time(t, self.duration);
        let idx = self.index_at(t);
        let local = (t - self.starts[idx]).max(0.0);

        if idx > 0 {
            let spec = self.transitions[idx - 1];
            let d = spec.overlap();
            if d > 0.0 && local < d {
                let outgoing = self.clips[idx - 1].frame_at(t - self.starts[idx - 1])?;
                let incoming = self.clips[idx].frame_at(local)?;
                let (_, p) = crossfade_alphas(local, d);
                return Ok(blend(spec.kind, &outgoing, &incoming, p, self.zoom_factor, self.background));
            }
        }

        self.clips[idx].frame_at(local)
    }

    fn audio_spans(&self) -> Vec<AudioSpan> {
        let mut spans = Vec::new();
        for (i, clip) in self.clips.iter().enumerate() {
            let fade_in = if i > 0 { self.transitions[i - 1].overlap() } else { 0.0 };
            let fade_out = self.transitions.get(i).map(|t| t.overlap()).unwrap_or(0.0);
            let end = clip.duration();

            for mut span in clip.audio_spans() {
                if fade_in > 0.0 && span.start < TIME_EPSILON {
                    span.fade_in = span.fade_in.max(fade_in).min(span.duration);
                }
                if fade_out > 0.0 && span.end() > end - TIME_EPSILON {
                    span.fade_out = span.fade_out.max(fade_out).min(span.duration);
                }
                spans.push(span.shifted(self.starts[i]));
            }
        }
        spans
    }

    fn release(&self) {
        for clip in &self.clips {
            clip.release();
        }
    }

    fn fork(&self) -> ClipRef {
        Arc::new(Self {
            clips: self.clips.iter().map(|c| c.fork()).collect(),
            transitions: self.transitions.clone(),
            starts: self.starts.clone(),
            duration: self.duration,
            background: self.background,
            zoom_factor: self.zoom_factor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::clip::testing::{code, TimeCodeClip};
    use crate::video::clip::ColorClip;
    use proptest::prelude::*;

    fn color(c: [u8; 3], duration: f64) -> ClipRef {
        Arc::new(ColorClip::new((10, 4), Rgb(c), duration, 10.0))
    }

    #[test]
    fn test_total_duration_subtracts_overlaps() {
        let clips = vec![color([0; 3], 4.0), color([0; 3], 3.0), color([0; 3], 5.0)];
        let transitions = vec![TransitionSpec::crossfade(1.0), TransitionSpec::new(TransitionKind::SlideLeft, 0.5)];
        let seq = SequenceClip::build(clips, transitions, Rgb::BLACK, 1.3).unwrap();

        assert!((seq.clip.duration() - (12.0 - 1.5)).abs() < 1e-9);
        assert_eq!(seq.clip.starts(), &[0.0, 3.0, 5.5]);
        assert!(seq.diagnostics.is_empty());
        assert_eq!(seq.applied, vec!["crossfade(1s)", "slide_left(0.5s)"]);
    }

    #[test]
    fn test_cut_adds_no_overlap() {
        let clips = vec![color([0; 3], 2.0), color([0; 3], 2.0)];
        let seq = SequenceClip::build(clips, vec![TransitionSpec::new(TransitionKind::Cut, 1.0)], Rgb::BLACK, 1.3).unwrap();
        assert_eq!(seq.clip.duration(), 4.0);
    }

    #[test]
    fn test_long_transition_is_clamped_with_diagnostic() {
        let clips = vec![color([0; 3], 2.0), color([0; 3], 6.0)];
        let seq = SequenceClip::build(clips, vec![TransitionSpec::crossfade(3.0)], Rgb::BLACK, 1.3).unwrap();

        assert_eq!(seq.clip.transitions()[0].duration, 1.0);
        assert_eq!(seq.diagnostics.len(), 1);
        assert!((seq.clip.duration() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_crossfade_blends_midpoint() {
        let clips = vec![color([200, 0, 0], 2.0), color([0, 0, 200], 2.0)];
        let seq = SequenceClip::build(clips, vec![TransitionSpec::crossfade(1.0)], Rgb::BLACK, 1.3).unwrap();

        assert_eq!(seq.clip.frame_at(0.5).unwrap().get_pixel(0, 0), [200, 0, 0]);
        assert_eq!(seq.clip.frame_at(1.5).unwrap().get_pixel(0, 0), [100, 0, 100]);
        assert_eq!(seq.clip.frame_at(2.5).unwrap().get_pixel(0, 0), [0, 0, 200]);
    }

    #[test]
    fn test_slide_left_enters_from_left() {
        let clips = vec![color([255, 0, 0], 2.0), color([0, 255, 0], 2.0)];
        let seq = SequenceClip::build(
            clips,
            vec![TransitionSpec::new(TransitionKind::SlideLeft, 1.0)],
            Rgb::BLACK,
            1.3,
        ).unwrap();

        // Halfway: incoming occupies the left half, outgoing the right half
        let frame = seq.clip.frame_at(1.5).unwrap();
        assert_eq!(frame.get_pixel(1, 1), [0, 255, 0]);
        assert_eq!(frame.get_pixel(8, 1), [255, 0, 0]);
    }

    #[test]
    fn test_frames_map_to_local_time() {
        let clips = vec![TimeCodeClip::new(3.0, 1).shared(), TimeCodeClip::new(3.0, 2).shared()];
        let seq = SequenceClip::build(clips, vec![TransitionSpec::cut()], Rgb::BLACK, 1.3).unwrap();

        assert_eq!(seq.clip.frame_at(1.0).unwrap().get_pixel(0, 0), code(1, 1.0));
        assert_eq!(seq.clip.frame_at(4.5).unwrap().get_pixel(0, 0), code(2, 1.5));
    }

    #[test]
    fn test_audio_spans_shift_and_fade_across_crossfade() {
        let clips = vec![
            TimeCodeClip::new(4.0, 1).with_audio("a.wav").shared(),
            TimeCodeClip::new(4.0, 2).with_audio("b.wav").shared(),
        ];
        let seq = SequenceClip::build(clips, vec![TransitionSpec::crossfade(1.0)], Rgb::BLACK, 1.3).unwrap();
        let spans = seq.clip.audio_spans();

        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].fade_out, 1.0);
        assert_eq!(spans[0].fade_in, 0.0);
        assert_eq!(spans[1].start, 3.0);
        assert_eq!(spans[1].fade_in, 1.0);
    }

    #[test]
    fn test_mismatched_sizes_and_counts_rejected() {
        let a = color([0; 3], 2.0);
        let b: ClipRef = Arc::new(ColorClip::new((4, 4), Rgb::BLACK, 2.0, 10.0));
        assert!(SequenceClip::build(vec![a.clone(), b], vec![TransitionSpec::cut()], Rgb::BLACK, 1.3).is_err());
        assert!(SequenceClip::build(vec![a.clone(), a], vec![], Rgb::BLACK, 1.3).is_err());
        assert!(SequenceClip::build(vec![], vec![], Rgb::BLACK, 1.3).is_err());
    }

    #[test]
    fn test_transition_spec_json() {
        let spec: TransitionSpec = serde_json::from_str(r#"{"type":"zoom","factor":1.5,"duration":0.8}"#).unwrap();
        assert_eq!(spec.kind, TransitionKind::Zoom { factor: Some(1.5) });
        assert_eq!(spec.duration, 0.8);
        assert_eq!(TransitionKind::from_name("slide_down").unwrap(), TransitionKind::SlideDown);
        assert!(TransitionKind::from_name("wipe").is_err());
    }

    proptest! {
        #[test]
        fn crossfade_alphas_sum_to_one(d in 0.01f64..10.0, frac in 0.0f64..=1.0) {
            let (out_a, in_a) = crossfade_alphas(frac * d, d);
            prop_assert!((out_a + in_a - 1.0).abs() < 1e-12);
            prop_assert!((0.0..=1.0).contains(&out_a));
        }

        #[test]
        fn sequence_duration_is_sum_minus_overlaps(
            durations in prop::collection::vec(0.5f64..20.0, 1..6),
            fracs in prop::collection::vec(0.0f64..0.5, 5),
        ) {
            let clips: Vec<ClipRef> = durations.iter().map(|&d| color([0; 3], d)).collect();
            let transitions: Vec<TransitionSpec> = (0..clips.len() - 1)
                .map(|i| TransitionSpec::crossfade(durations[i].min(durations[i + 1]) * fracs[i]))
                .collect();
            let expected: f64 = durations.iter().sum::<f64>()
                - transitions.iter().map(|t| t.duration).sum::<f64>();

            let seq = SequenceClip::build(clips, transitions, Rgb::BLACK, 1.3).unwrap();
            prop_assert!((seq.clip.duration() - expected).abs() < 1e-9);
            prop_assert!(seq.diagnostics.is_empty());
        }
    }
}
