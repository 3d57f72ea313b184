//! # Timeline Compositor
//!
//! Compose video clips, still images and an audio track into a single
//! rendered timeline with transitions, effects and exact duration matching.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use timeline_compositor::{
//!     composition::{CompositionEngine, SegmentSpec, SlideshowRequest, TransitionPlan},
//!     config::Config,
//!     transitions::TransitionKind,
//!     video::ExportSettings,
//! };
//!
//! # fn main() -> timeline_compositor::Result<()> {
//! let engine = CompositionEngine::new(Config::default());
//! let request = SlideshowRequest {
//!     images: vec![SegmentSpec::new("01.jpg"), SegmentSpec::new("02.png").lasting(5.0)],
//!     duration_per_image: Some(3.0),
//!     transitions: TransitionPlan::from(TransitionKind::Crossfade),
//!     resolution: Some((1920, 1080)),
//!     fps: None,
//!     fit: None,
//!     background_color: None,
//!     audio: None,
//!     text_overlays: Vec::new(),
//!     effects: Vec::new(),
//! };
//!
//! let composite = engine.slideshow(&request)?;
//! let result = engine.render(&composite, "slides.mp4".as_ref(), &ExportSettings::default())?;
//! println!("{:.2}s, {} bytes", result.duration, result.file_size);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`video`] - clip model, media loading, geometry fitting and export
//! - [`effects`] - ordered per-clip effects
//! - [`transitions`] - boundary blends and clip sequencing
//! - [`composition`] - timeline composer, duration matcher and captions
//! - [`audio`] - audio probing and symbolic audio spans
//! - [`ops`] - JSON tool-call surface
//! - [`config`] - configuration management

pub mod audio;
pub mod composition;
pub mod config;
pub mod effects;
pub mod error;
pub mod ops;
pub mod transitions;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    composition::{Composite, CompositeResult, CompositionEngine},
    config::Config,
    error::{CompositorError, Result},
    ops::{Operations, ToolResult},
    video::{Clip, ClipRef},
};
