//! # Timeline Composer
//!
//! Builds composites from caller-ordered sources. Two modes share one path:
//! concatenation of video (or image) segments and image slideshows with
//! captions. Each source is probed up front, fitted onto a common canvas,
//! decorated with its effects, then joined by the transition engine. An
//! external audio track is attached last, optionally after stretching the
//! video with the [`DurationMatcher`].

pub mod engine;
pub mod extender;
pub mod overlay;
pub mod timeline;

pub use engine::{Composite, CompositeResult, CompositionEngine};
pub use extender::{DurationMatcher, Extension};
pub use overlay::{OverlayClip, OverlayPosition, TextOverlay};
pub use timeline::{AudioSpec, ConcatRequest, Segment, SegmentSpec, SlideshowRequest, Timeline, TransitionPlan};
