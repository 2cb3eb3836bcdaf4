//! Audio output layer: buffer types, the sink abstraction, and the cpal
//! production sink.

pub mod cpal_sink;
pub mod sink;
pub mod types;

pub use cpal_sink::CpalSink;
pub use sink::{queue_frames_for, AudioSink, SinkFactory};
pub use types::OutputBuffer;
