use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Basic properties of an audio stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub path: PathBuf,

    /// Duration in seconds
    pub duration: f64,

    /// Sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Number of channels
    pub channels: Option<u16>,

    /// Codec or container hint
    pub format: String,
}

/// How an external audio track is combined with a composite's own audio
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncMode {
    /// Discard clip audio, use the new track only
    #[default]
    Replace,
    /// Layer the new track over clip audio without attenuation
    Overlay,
    /// Attenuate both and sum: new track at `weight`, clip audio at `1 - weight`
    Mix {
        #[serde(default = "default_mix_weight")]
        weight: f64,
    },
}

fn default_mix_weight() -> f64 {
    0.5
}

impl SyncMode {
    pub fn name(&self) -> &'static str {
        match self {
            SyncMode::Replace => "replace",
            SyncMode::Overlay => "overlay",
            SyncMode::Mix { .. } => "mix",
        }
    }

    /// Parse the plain method names accepted by the tool surface
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "replace" => Some(SyncMode::Replace),
            "overlay" => Some(SyncMode::Overlay),
            "mix" => Some(SyncMode::Mix { weight: default_mix_weight() }),
            _ => None,
        }
    }
}

/// An audio file to attach to a composite
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub path: PathBuf,

    /// Duration in seconds
    pub duration: f64,

    pub sync: SyncMode,

    /// Loop the track when it is shorter than the composite
    pub loop_to_fit: bool,
}

impl AudioTrack {
    pub fn new(info: &AudioInfo, sync: SyncMode) -> Self {
        Self {
            path: info.path.clone(),
            duration: info.duration,
            sync,
            loop_to_fit: false,
        }
    }

    pub fn looped(mut self, loop_to_fit: bool) -> Self {
        self.loop_to_fit = loop_to_fit;
        self
    }
}

/// A piece of source audio placed on a clip's local timeline
///
/// Audio is never decoded by the engine; spans are carried through the clip
/// tree and turned into an encoder filter graph at render time.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSpan {
    pub path: PathBuf,

    /// Where playback starts inside the source file (source seconds)
    pub source_start: f64,

    /// Where the span starts on the clip timeline (seconds)
    pub start: f64,

    /// Length on the clip timeline (seconds)
    pub duration: f64,

    /// Playback rate; 2.0 plays the source twice as fast
    pub tempo: f64,

    /// Linear gain
    pub gain: f64,

    pub fade_in: f64,
    pub fade_out: f64,

    /// Source loops when exhausted
    pub looped: bool,
}

impl AudioSpan {
    pub fn new<P: Into<PathBuf>>(path: P, source_start: f64, duration: f64) -> Self {
        Self {
            path: path.into(),
            source_start,
            start: 0.0,
            duration,
            tempo: 1.0,
            gain: 1.0,
            fade_in: 0.0,
            fade_out: 0.0,
            looped: false,
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Source seconds consumed by this span
    pub fn source_duration(&self) -> f64 {
        self.duration * self.tempo
    }

    pub fn shifted(mut self, offset: f64) -> Self {
        self.start += offset;
        self
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain *= gain;
        self
    }

    /// Part of this span inside `[from, to)`, re-based so `from` becomes 0
    pub fn window(&self, from: f64, to: f64) -> Option<AudioSpan> {
        let start = self.start.max(from);
        let end = self.end().min(to);
        if end - start <= 1e-9 {
            return None;
        }

        let mut span = self.clone();
        let cut_head = start - self.start;
        span.source_start += cut_head * self.tempo;
        span.start = start - from;
        span.duration = end - start;
        if cut_head > 1e-9 {
            span.fade_in = 0.0;
        }
        if end < self.end() - 1e-9 {
            span.fade_out = 0.0;
        }
        span.fade_in = span.fade_in.min(span.duration);
        span.fade_out = span.fade_out.min(span.duration);
        Some(span)
    }

    /// Time-scale for a speed change of `factor`
    pub fn sped_up(mut self, factor: f64) -> Self {
        self.start /= factor;
        self.duration /= factor;
        self.fade_in /= factor;
        self.fade_out /= factor;
        self.tempo *= factor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_trims_and_rebases() {
        let mut span = AudioSpan::new("a.wav", 2.0, 10.0).shifted(5.0);
        span.fade_in = 1.0;
        span.fade_out = 1.0;

        let w = span.window(7.0, 20.0).unwrap();
        assert_eq!(w.start, 0.0);
        assert_eq!(w.duration, 8.0);
        assert_eq!(w.source_start, 4.0);
        assert_eq!(w.fade_in, 0.0);
        assert_eq!(w.fade_out, 1.0);

        assert!(span.window(0.0, 5.0).is_none());
    }

    #[test]
    fn speed_scales_timeline_not_source() {
        let span = AudioSpan::new("a.wav", 0.0, 10.0).shifted(4.0).sped_up(2.0);
        assert_eq!(span.start, 2.0);
        assert_eq!(span.duration, 5.0);
        assert_eq!(span.source_duration(), 10.0);
    }

    #[test]
    fn sync_mode_parses_tool_names_and_json() {
        assert_eq!(SyncMode::from_name("overlay"), Some(SyncMode::Overlay));
        assert_eq!(SyncMode::from_name("mix"), Some(SyncMode::Mix { weight: 0.5 }));
        assert_eq!(SyncMode::from_name("shuffle"), None);

        let parsed: SyncMode = serde_json::from_str(r#"{"mode":"mix","weight":0.25}"#).unwrap();
        assert_eq!(parsed, SyncMode::Mix { weight: 0.25 });
        let parsed: SyncMode = serde_json::from_str(r#"{"mode":"replace"}"#).unwrap();
        assert_eq!(parsed, SyncMode::Replace);
    }
}
