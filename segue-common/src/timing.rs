//! Millisecond / frame conversions
//!
//! A *frame* is one sample period across all channels (one interleaved
//! stereo sample pair). All position arithmetic in the engine is done in
//! frames at the track's sample rate; milliseconds only appear at the API
//! boundary (seek targets, progress events).

/// Convert milliseconds to frames at the given sample rate.
///
/// Rounds down: 1 ms @ 44100 Hz = 44 frames.
pub fn ms_to_frames(ms: u64, sample_rate: u32) -> u64 {
    ms * sample_rate as u64 / 1000
}

/// Convert frames to milliseconds at the given sample rate.
///
/// Rounds down, so a round trip may lose up to one frame of precision.
pub fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames * 1000 / sample_rate as u64
}

/// Interleaved i16 stereo samples for the given frame count.
pub fn frames_to_samples(frames: u64) -> u64 {
    frames * 2
}

/// Frame count for the given interleaved i16 stereo sample count.
pub fn samples_to_frames(samples: u64) -> u64 {
    samples / 2
}
