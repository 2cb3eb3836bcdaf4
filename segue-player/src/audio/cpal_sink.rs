//! Audio output using cpal
//!
//! Production [`AudioSink`] implementation: a cpal output stream fed through
//! a lock-free frame queue. The engine thread pushes decoded frames into the
//! producer half; the real-time audio callback pops from the consumer half,
//! applies volume, and advances the playback head counter for every frame it
//! actually plays. Underruns output silence without advancing the head and
//! without crashing.

use crate::audio::sink::{queue_frames_for, AudioSink};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::{traits::*, HeapProd, HeapRb};
use segue_common::{PlayerError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Fallback period when the device reports only a default buffer size
const DEFAULT_PERIOD_FRAMES: u32 = 512;

/// State shared with the real-time audio callback
struct SinkShared {
    /// Frames actually played by the device since open
    played: AtomicU64,

    /// Frames the callback must drop before playing (set by `flush`).
    /// Discarded frames advance neither the head nor the output.
    discard: AtomicU64,

    /// Set by the cpal error callback; the engine treats it as ServerDied
    error_flag: AtomicBool,

    /// Underrun counter, logged rate-limited from the callback
    underruns: AtomicU64,
}

/// cpal-backed audio sink
pub struct CpalSink {
    config: StreamConfig,
    stream: Option<Stream>,
    producer: HeapProd<[i16; 2]>,
    shared: Arc<SinkShared>,
    volume: Arc<Mutex<f32>>,
    capacity_frames: usize,
}

impl CpalSink {
    /// List available output device names.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| PlayerError::ServerDied(format!("failed to enumerate devices: {e}")))?
            .filter_map(|d| d.name().ok())
            .collect::<Vec<_>>();
        debug!("found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device at the given rate.
    ///
    /// If the requested device cannot be found the default device is used as
    /// a fallback. The frame queue is sized to whole hardware periods
    /// covering at least one second of audio.
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        volume: Arc<Mutex<f32>>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host.output_devices().map_err(|e| {
                    PlayerError::ServerDied(format!("failed to enumerate devices: {e}"))
                })?;
                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(dev) => {
                        info!("using requested audio device: {}", name);
                        dev
                    }
                    None => {
                        warn!("device '{}' not found, falling back to default", name);
                        host.default_output_device().ok_or_else(|| {
                            PlayerError::ServerDied(format!(
                                "device '{name}' not found and no default device available"
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| PlayerError::ServerDied("no default output device".into()))?,
        };

        let (config, sample_format, period) = Self::pick_config(&device, sample_rate)?;
        let capacity_frames = queue_frames_for(sample_rate, period);

        debug!(
            "audio config: rate={}, channels={}, format={:?}, queue={} frames",
            config.sample_rate.0, config.channels, sample_format, capacity_frames
        );

        let ring = HeapRb::<[i16; 2]>::new(capacity_frames);
        let (producer, consumer) = ring.split();

        let shared = Arc::new(SinkShared {
            played: AtomicU64::new(0),
            discard: AtomicU64::new(0),
            error_flag: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
        });

        let mut sink = Self {
            config,
            stream: None,
            producer,
            shared,
            volume,
            capacity_frames,
        };
        sink.start(&device, sample_format, consumer)?;
        Ok(sink)
    }

    /// Pick a stereo output configuration at the requested rate.
    fn pick_config(
        device: &Device,
        sample_rate: u32,
    ) -> Result<(StreamConfig, SampleFormat, u32)> {
        let supported = device
            .supported_output_configs()
            .map_err(|e| PlayerError::ServerDied(format!("failed to get device configs: {e}")))?
            .find(|c| {
                c.channels() == 2
                    && c.min_sample_rate().0 <= sample_rate
                    && c.max_sample_rate().0 >= sample_rate
                    && matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16)
            });

        let supported = match supported {
            Some(c) => c.with_sample_rate(cpal::SampleRate(sample_rate)),
            None => {
                // Fall back to the device default; rate mismatch is rejected
                // rather than resampled.
                let default = device.default_output_config().map_err(|e| {
                    PlayerError::ServerDied(format!("failed to get default config: {e}"))
                })?;
                if default.sample_rate().0 != sample_rate || default.channels() != 2 {
                    return Err(PlayerError::UnsupportedFormat(format!(
                        "device does not support {sample_rate} Hz stereo output"
                    )));
                }
                default
            }
        };

        let sample_format = supported.sample_format();
        let period = match supported.buffer_size() {
            cpal::SupportedBufferSize::Range { min, .. } => (*min).max(DEFAULT_PERIOD_FRAMES),
            cpal::SupportedBufferSize::Unknown => DEFAULT_PERIOD_FRAMES,
        };
        Ok((supported.config(), sample_format, period))
    }

    fn start(
        &mut self,
        device: &Device,
        sample_format: SampleFormat,
        consumer: ringbuf::HeapCons<[i16; 2]>,
    ) -> Result<()> {
        let stream = match sample_format {
            SampleFormat::F32 => self.build_stream_f32(device, consumer)?,
            SampleFormat::I16 => self.build_stream_i16(device, consumer)?,
            other => {
                return Err(PlayerError::UnsupportedFormat(format!(
                    "unsupported device sample format: {other:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| PlayerError::ServerDied(format!("failed to start stream: {e}")))?;
        self.stream = Some(stream);
        info!("audio stream started");
        Ok(())
    }

    fn build_stream_f32(
        &self,
        device: &Device,
        mut consumer: ringbuf::HeapCons<[i16; 2]>,
    ) -> Result<Stream> {
        let channels = self.config.channels as usize;
        let shared = Arc::clone(&self.shared);
        let err_shared = Arc::clone(&self.shared);
        let volume = Arc::clone(&self.volume);

        device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let gain = *volume.lock().unwrap();
                    for out in data.chunks_mut(channels) {
                        match next_frame(&mut consumer, &shared) {
                            Some([left, right]) => {
                                out[0] = (left as f32 / i16::MAX as f32 * gain).clamp(-1.0, 1.0);
                                if channels > 1 {
                                    out[1] =
                                        (right as f32 / i16::MAX as f32 * gain).clamp(-1.0, 1.0);
                                }
                            }
                            None => out.fill(0.0),
                        }
                    }
                },
                move |err| {
                    error!("audio stream error: {err} - marking sink dead");
                    err_shared.error_flag.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| PlayerError::ServerDied(format!("failed to build stream: {e}")))
    }

    fn build_stream_i16(
        &self,
        device: &Device,
        mut consumer: ringbuf::HeapCons<[i16; 2]>,
    ) -> Result<Stream> {
        let channels = self.config.channels as usize;
        let shared = Arc::clone(&self.shared);
        let err_shared = Arc::clone(&self.shared);
        let volume = Arc::clone(&self.volume);

        device
            .build_output_stream(
                &self.config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let gain = *volume.lock().unwrap();
                    for out in data.chunks_mut(channels) {
                        match next_frame(&mut consumer, &shared) {
                            Some([left, right]) => {
                                out[0] = scale_i16(left, gain);
                                if channels > 1 {
                                    out[1] = scale_i16(right, gain);
                                }
                            }
                            None => out.fill(0),
                        }
                    }
                },
                move |err| {
                    error!("audio stream error: {err} - marking sink dead");
                    err_shared.error_flag.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| PlayerError::ServerDied(format!("failed to build stream: {e}")))
    }
}

/// Pop one frame for the callback, honoring pending discards.
///
/// Returns None on underrun; the counter is logged every 1000th occurrence
/// to avoid spamming from the real-time thread.
fn next_frame(
    consumer: &mut ringbuf::HeapCons<[i16; 2]>,
    shared: &SinkShared,
) -> Option<[i16; 2]> {
    // Frames queued before a flush are consumed silently.
    while shared.discard.load(Ordering::Acquire) > 0 {
        if consumer.try_pop().is_none() {
            shared.discard.store(0, Ordering::Release);
            break;
        }
        shared.discard.fetch_sub(1, Ordering::AcqRel);
    }

    match consumer.try_pop() {
        Some(frame) => {
            shared.played.fetch_add(1, Ordering::Release);
            Some(frame)
        }
        None => {
            let count = shared.underruns.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 0 {
                warn!("audio callback underrun (total: {count})");
            }
            None
        }
    }
}

fn scale_i16(sample: i16, gain: f32) -> i16 {
    (sample as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

impl AudioSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn capacity_frames(&self) -> u64 {
        self.capacity_frames as u64
    }

    fn playback_head_frames(&self) -> u64 {
        self.shared.played.load(Ordering::Acquire)
    }

    fn free_space_samples(&self) -> usize {
        self.producer.vacant_len() * 2
    }

    fn write(&mut self, samples: &[i16]) -> usize {
        let mut accepted = 0;
        for pair in samples.chunks_exact(2) {
            if self.producer.try_push([pair[0], pair[1]]).is_err() {
                break;
            }
            accepted += 2;
        }
        accepted
    }

    fn pause(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .pause()
                .map_err(|e| PlayerError::ServerDied(format!("failed to pause stream: {e}")))?;
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| PlayerError::ServerDied(format!("failed to resume stream: {e}")))?;
        }
        Ok(())
    }

    fn flush(&mut self) {
        let queued = self.producer.occupied_len() as u64;
        if queued > 0 {
            self.shared.discard.fetch_add(queued, Ordering::AcqRel);
            debug!("flushing {queued} queued frames");
        }
    }

    fn healthy(&self) -> bool {
        !self.shared.error_flag.load(Ordering::SeqCst)
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_does_not_panic() {
        // Needs audio hardware to return anything useful; either outcome is
        // acceptable in CI.
        let result = CpalSink::list_devices();
        assert!(result.is_ok() || result.is_err());
    }

    #[test]
    fn test_volume_scaling() {
        assert_eq!(scale_i16(1000, 0.5), 500);
        assert_eq!(scale_i16(-1000, 0.5), -500);
        assert_eq!(scale_i16(i16::MAX, 1.0), i16::MAX);
        // gain above 1.0 clamps instead of wrapping
        assert_eq!(scale_i16(i16::MAX, 2.0), i16::MAX);
    }
}
