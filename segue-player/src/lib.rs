//! segue-player: gapless audio playback engine
//!
//! A single dedicated engine thread drives the audio sink, coordinating a
//! current and a staged next decoder so adjacent tracks hand off without an
//! audible gap. Callers control it through a synchronous action protocol
//! and observe it through an asynchronous event bus.
//!
//! The main seams:
//! - [`playback::PlaybackEngine`]: the caller-facing handle and the engine
//!   thread behind it.
//! - [`decode::TrackDecoder`]: per-track decode lifecycle over local files
//!   and network streams.
//! - [`audio::AudioSink`]: the output device abstraction (cpal in
//!   production, simulated in tests).
//! - [`stream::StreamRingBuffer`]: backpressured byte transport from the
//!   network receiver into the stream decode path.

pub mod audio;
pub mod config;
pub mod decode;
pub mod playback;
pub mod stream;

pub use audio::{AudioSink, CpalSink, OutputBuffer, SinkFactory};
pub use config::Config;
pub use decode::{DecoderState, TrackDecoder};
pub use playback::PlaybackEngine;

use std::sync::{Arc, Mutex};

/// Production sink factory: opens a [`CpalSink`] on the requested device at
/// whatever rate the engine asks for, sharing one volume cell.
pub fn cpal_sink_factory(
    device: Option<String>,
    volume: Arc<Mutex<f32>>,
) -> SinkFactory {
    Box::new(move |sample_rate| {
        let sink = CpalSink::open(device.as_deref(), sample_rate, Arc::clone(&volume))?;
        Ok(Box::new(sink) as Box<dyn AudioSink>)
    })
}
