//! # Video Module
//!
//! Media probing, the lazy clip model, canvas fitting and ffmpeg-backed
//! decoding and encoding.

pub mod clip;
pub mod encoder;
pub mod geometry;
pub mod loader;
pub mod types;

pub use clip::{Clip, ClipRef, ColorClip, FitClip, MediaClip, ReleaseGuard, StillClip, SubClip, WithAudio};
pub use encoder::{ExportSettings, QualityPreset, RenderOutcome, Renderer, ResolvedSettings};
pub use geometry::{fit, FitPolicy, FitTransform};
pub use loader::{MediaLoader, VideoDecoder};
pub use types::{Frame, MediaAsset, MediaKind, Rgb, VideoParams};
