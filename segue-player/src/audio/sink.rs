//! Audio sink abstraction
//!
//! The feed loop talks to the output device through this trait so the engine
//! can be exercised against a simulated sink in tests. The production
//! implementation is [`crate::audio::cpal_sink::CpalSink`].
//!
//! Contract: fixed-format interleaved 16-bit stereo frames. The sink owns a
//! bounded queue; `write` accepts as many samples as currently fit and
//! returns the accepted count, leaving the caller to track partial writes.
//! The playback head advances only for frames actually consumed by the
//! device, so `playback_head_frames` can never run ahead of what was written.

use segue_common::Result;

/// Low-level audio output device abstraction.
///
/// Implementations are created and used exclusively on the engine thread;
/// `cpal::Stream` in particular is not `Send`, so sinks are constructed by a
/// [`SinkFactory`] invoked on that thread rather than passed across it.
pub trait AudioSink {
    /// Configured output sample rate
    fn sample_rate(&self) -> u32;

    /// Total queue capacity in frames
    fn capacity_frames(&self) -> u64;

    /// Frames the device has actually played since the sink was opened
    fn playback_head_frames(&self) -> u64;

    /// Free queue space in interleaved samples
    fn free_space_samples(&self) -> usize;

    /// Queue interleaved stereo samples; returns the count accepted.
    /// Never blocks.
    fn write(&mut self, samples: &[i16]) -> usize;

    /// Suspend the device without dropping queued audio
    fn pause(&mut self) -> Result<()>;

    /// Resume after `pause`
    fn resume(&mut self) -> Result<()>;

    /// Discard all queued-but-unplayed audio (seek path).
    /// Discarded frames do not advance the playback head.
    fn flush(&mut self);

    /// False once the underlying output subsystem has died
    fn healthy(&self) -> bool {
        true
    }
}

/// Factory invoked on the engine thread to open a sink at a given rate.
pub type SinkFactory = Box<dyn FnMut(u32) -> Result<Box<dyn AudioSink>> + Send>;

/// Sink queue sizing: whole hardware periods, rounded up to cover at least
/// one second of audio. Bounds latency while avoiding starvation on slow
/// wakeups.
pub fn queue_frames_for(sample_rate: u32, period_frames: u32) -> usize {
    let period = period_frames.max(1) as usize;
    let rate = sample_rate as usize;
    let periods = (rate + period - 1) / period;
    periods * period
}
