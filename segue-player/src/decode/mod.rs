//! Decoding: the backend trait with its local and stream implementations,
//! and the per-track decoder lifecycle.

pub mod backend;
pub mod local;
pub mod stream;
pub mod track;

pub use backend::{BackendRead, DecodeBackend, MAX_SAMPLE_RATE};
pub use local::LocalBackend;
pub use stream::StreamBackend;
pub use track::{DecoderState, DecoderStatus, TrackDecoder};
