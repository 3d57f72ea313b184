//! # Audio Module
//!
//! Audio tracks are never decoded by the engine. They are probed for their
//! duration and then carried symbolically as [`AudioSpan`]s through the clip
//! tree, so that effects, trims and transitions can re-time them. The encoder
//! turns the final span list into a mixing graph.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use timeline_compositor::audio::{AudioLoader, AudioTrack, SyncMode};
//!
//! # fn main() -> timeline_compositor::Result<()> {
//! let info = AudioLoader::probe("narration.wav")?;
//! let track = AudioTrack::new(&info, SyncMode::Mix { weight: 0.7 });
//! println!("{:.1}s of audio", track.duration);
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod types;
pub use loader::AudioLoader;
pub use types::{AudioInfo, AudioSpan, AudioTrack, SyncMode};
