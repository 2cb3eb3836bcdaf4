//! Shared types for the segue playback engine.
//!
//! Contains everything both the engine and its callers need to agree on:
//! the error taxonomy, the asynchronous event (callback) surface, ms/frame
//! timing conversions, and the tuning parameter block.

pub mod error;
pub mod events;
pub mod params;
pub mod timing;

pub use error::{ErrorKind, PlayerError, Result};
pub use events::{EventBus, PlaybackState, PlayerEvent};
pub use params::{Tuning, TuningOverrides};
pub use timing::{frames_to_ms, frames_to_samples, ms_to_frames, samples_to_frames};
