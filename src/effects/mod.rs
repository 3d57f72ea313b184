//! # Effects Pipeline
//!
//! Effects are a closed set of tagged records ([`EffectSpec`]) applied in list
//! order. Each one wraps the previous clip in an [`EffectClip`], so effects
//! compose: `crop` then `resize` differs from `resize` then `crop`.
//!
//! ```rust
//! use std::sync::Arc;
//! use timeline_compositor::effects::{apply_effects, EffectSpec};
//! use timeline_compositor::video::{Clip, ColorClip, Rgb};
//!
//! # fn main() -> timeline_compositor::Result<()> {
//! let clip = Arc::new(ColorClip::new((640, 360), Rgb::WHITE, 4.0, 30.0));
//! let effects = vec![
//!     EffectSpec::FadeIn { duration: 1.0 },
//!     EffectSpec::Speed { factor: 2.0 },
//! ];
//! let (clip, applied) = apply_effects(clip, &effects, Rgb::BLACK)?;
//! assert_eq!(clip.duration(), 2.0);
//! assert_eq!(applied, vec!["fade_in(1s)", "speed(2x)"]);
//! # Ok(())
//! # }
//! ```

pub mod pipeline;
pub mod pixel;
pub mod spec;

pub use pipeline::{apply_effects, validate_effects, EffectClip};
pub use spec::{EffectSpec, PanDirection, ZoomDirection};
