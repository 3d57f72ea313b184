use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::audio::SyncMode;
use crate::effects::EffectSpec;
use crate::error::{CompositorError, Result};
use crate::transitions::{TransitionKind, TransitionSpec};
use crate::video::clip::TIME_EPSILON;
use crate::video::types::MediaAsset;
use crate::video::FitPolicy;

/// A source file placed on a timeline, as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub path: PathBuf,

    /// Trim start for videos (seconds)
    #[serde(default)]
    pub in_point: Option<f64>,

    /// Trim end for videos (seconds)
    #[serde(default)]
    pub out_point: Option<f64>,

    /// Display duration for still images (seconds)
    #[serde(default)]
    pub duration: Option<f64>,

    /// Effects applied to this segment only
    #[serde(default)]
    pub effects: Vec<EffectSpec>,
}

impl SegmentSpec {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            in_point: None,
            out_point: None,
            duration: None,
            effects: Vec::new(),
        }
    }

    pub fn trimmed(mut self, in_point: f64, out_point: f64) -> Self {
        self.in_point = Some(in_point);
        self.out_point = Some(out_point);
        self
    }

    pub fn lasting(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// One resolved unit of the timeline
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub asset: MediaAsset,
    pub in_point: f64,
    pub out_point: f64,
    pub display_duration: f64,
    pub effects: Vec<EffectSpec>,
}

impl Segment {
    /// Resolve a caller descriptor against probed metadata
    ///
    /// Videos: `0 <= in < out <= duration`. Images: display duration > 0,
    /// falling back to `default_image_duration`.
    pub fn resolve(spec: &SegmentSpec, asset: MediaAsset, default_image_duration: f64) -> Result<Self> {
        match asset.duration {
            Some(natural) => {
                let in_point = spec.in_point.unwrap_or(0.0);
                let out_point = spec.out_point.unwrap_or(natural);
                if !(in_point.is_finite() && out_point.is_finite())
                    || in_point < 0.0
                    || in_point >= out_point
                    || out_point > natural + TIME_EPSILON
                {
                    return Err(CompositorError::invalid(format!(
                        "segment {}: need 0 <= in_point ({}) < out_point ({}) <= duration ({:.3})",
                        asset.file_name(), in_point, out_point, natural
                    )));
                }
                let out_point = out_point.min(natural);
                Ok(Self {
                    asset,
                    in_point,
                    out_point,
                    display_duration: out_point - in_point,
                    effects: spec.effects.clone(),
                })
            }
            None => {
                let duration = spec.duration.unwrap_or(default_image_duration);
                if !(duration.is_finite() && duration > 0.0) {
                    return Err(CompositorError::invalid(format!(
                        "image {}: display duration must be positive, got {}",
                        asset.file_name(),
                        duration
                    )));
                }
                Ok(Self {
                    asset,
                    in_point: 0.0,
                    out_point: duration,
                    display_duration: duration,
                    effects: spec.effects.clone(),
                })
            }
        }
    }
}

/// Ordered segments plus one transition per boundary
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    segments: Vec<Segment>,
    transitions: Vec<TransitionSpec>,
}

impl Timeline {
    pub fn new(segments: Vec<Segment>, transitions: Vec<TransitionSpec>) -> Result<Self> {
        if segments.is_empty() {
            return Err(CompositorError::invalid("timeline needs at least one segment"));
        }
        if transitions.len() + 1 != segments.len() {
            return Err(CompositorError::invalid(format!(
                "{} segments need {} transitions, got {}",
                segments.len(),
                segments.len() - 1,
                transitions.len()
            )));
        }
        Ok(Self { segments, transitions })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn transitions(&self) -> &[TransitionSpec] {
        &self.transitions
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// `Σ display durations − Σ transition overlaps`, before any clamping
    pub fn nominal_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.display_duration).sum::<f64>()
            - self.transitions.iter().map(|t| t.overlap()).sum::<f64>()
    }
}

/// Transitions requested either once for every boundary or per boundary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionPlan {
    /// Applied at every boundary; a bare name such as `"crossfade"` is accepted
    #[serde(default, alias = "transition_type", deserialize_with = "de::transition")]
    pub transition: Option<TransitionSpec>,

    /// Explicit list, one per boundary; wins over `transition`
    #[serde(default)]
    pub transitions: Option<Vec<TransitionSpec>>,

    /// Overlap used when `transition` is given by name only
    #[serde(default)]
    pub transition_duration: Option<f64>,
}

impl TransitionPlan {
    /// Expand to exactly `boundaries` transitions
    pub fn expand(&self, boundaries: usize, default_duration: f64) -> Result<Vec<TransitionSpec>> {
        if let Some(list) = &self.transitions {
            if list.len() != boundaries {
                return Err(CompositorError::invalid(format!(
                    "expected {} transitions, got {}",
                    boundaries,
                    list.len()
                )));
            }
            return Ok(list.clone());
        }

        let spec = match self.transition {
            Some(mut spec) => {
                if spec.duration <= 0.0 {
                    spec.duration = self.transition_duration.unwrap_or(default_duration);
                }
                spec
            }
            None => TransitionSpec::cut(),
        };
        Ok(vec![spec; boundaries])
    }
}

/// External audio to attach to a composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub path: PathBuf,

    #[serde(default)]
    pub sync: SyncMode,

    /// Loop the track when it is shorter than the composite
    #[serde(default)]
    pub loop_to_fit: bool,
}

/// Video concatenation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatRequest {
    /// Segments in playback order; the engine never reorders them
    pub segments: Vec<SegmentSpec>,

    #[serde(flatten)]
    pub transitions: TransitionPlan,

    #[serde(default)]
    pub audio: Option<AudioSpec>,

    /// Stretch the video with the duration matcher when the audio is longer
    #[serde(default)]
    pub extend_to_audio: bool,

    /// Canvas size; defaults to the first segment's size
    #[serde(default)]
    pub resolution: Option<(u32, u32)>,

    #[serde(default)]
    pub fit: Option<FitPolicy>,

    /// Effects applied to the joined result
    #[serde(default)]
    pub effects: Vec<EffectSpec>,
}

/// Image slideshow request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideshowRequest {
    pub images: Vec<SegmentSpec>,

    /// Display duration for images that do not set one
    #[serde(default)]
    pub duration_per_image: Option<f64>,

    #[serde(flatten)]
    pub transitions: TransitionPlan,

    #[serde(default)]
    pub resolution: Option<(u32, u32)>,

    #[serde(default)]
    pub fps: Option<f64>,

    #[serde(default, alias = "fit_mode")]
    pub fit: Option<FitPolicy>,

    #[serde(default)]
    pub background_color: Option<crate::video::Rgb>,

    #[serde(default)]
    pub audio: Option<AudioSpec>,

    #[serde(default)]
    pub text_overlays: Vec<crate::composition::overlay::TextOverlay>,

    /// Effects applied to the whole slideshow
    #[serde(default)]
    pub effects: Vec<EffectSpec>,
}

mod de {
    use serde::{Deserialize, Deserializer};

    use crate::transitions::{TransitionKind, TransitionSpec};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NameOrSpec {
        Name(String),
        Spec(TransitionSpec),
    }

    pub fn transition<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<TransitionSpec>, D::Error> {
        match Option::<NameOrSpec>::deserialize(deserializer)? {
            None => Ok(None),
            Some(NameOrSpec::Spec(spec)) => Ok(Some(spec)),
            Some(NameOrSpec::Name(name)) => TransitionKind::from_name(&name)
                .map(|kind| Some(TransitionSpec::new(kind, 0.0)))
                .map_err(serde::de::Error::custom),
        }
    }
}

impl From<TransitionKind> for TransitionPlan {
    fn from(kind: TransitionKind) -> Self {
        Self {
            transition: Some(TransitionSpec::new(kind, 0.0)),
            ..Default::default()
        }
    }
}
