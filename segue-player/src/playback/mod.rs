//! The playback engine: frame accounting, the cross-thread action protocol,
//! and the engine thread that owns the sink and decoder slots.

pub mod actions;
pub mod clock;
pub mod engine;

pub use actions::{Action, ActionPort, ActionRequest};
pub use clock::PlaybackClock;
pub use engine::PlaybackEngine;
