//! Decode backend abstraction
//!
//! Local files and network streams share one demux/decode pipeline
//! ([`SymphoniaCore`]) but differ in how input arrives and what operations
//! are legal (streams cannot seek, and may legitimately have no input ready).
//! The [`DecodeBackend`] trait captures exactly that split, chosen once at
//! prepare time.

use segue_common::{PlayerError, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, warn};

/// Highest sample rate the output path supports
pub const MAX_SAMPLE_RATE: u32 = 48_000;

/// Result of pulling one chunk from a backend.
///
/// Every arm carries the caller's storage vector back so buffer allocations
/// are recycled across the decode loop.
pub enum BackendRead {
    /// Interleaved stereo i16 samples decoded into the provided storage
    Samples(Vec<i16>),
    /// Input not yet framed (stream path); try again later, not an error
    NotReady(Vec<i16>),
    /// No more packets will ever be produced
    EndOfStream(Vec<i16>),
}

/// One decode path, selected at prepare time.
pub trait DecodeBackend: Send {
    fn sample_rate(&self) -> u32;

    /// Channel count of the source (output is always stereo)
    fn channels(&self) -> u16;

    /// Total track length in frames, when the container knows it.
    /// Unknown for live streams.
    fn total_frames(&self) -> Option<u64>;

    /// Frame position of the most recently decoded packet
    fn position_frames(&self) -> u64;

    /// Whether enough input is buffered to attempt a packet read without
    /// stalling. Local files are always ready.
    fn input_ready(&self) -> bool {
        true
    }

    /// Decode the next chunk into `storage` (cleared first).
    fn next_output(&mut self, storage: Vec<i16>) -> Result<BackendRead>;

    /// Seek to the given position, returning the actually-located frame.
    fn seek(&mut self, ms: u64) -> Result<u64>;

    /// Drop any internal decoder state (pre-seek flush).
    fn flush(&mut self);
}

/// Shared symphonia demux + decode machinery.
///
/// Owns the format reader and codec decoder for one track and converts all
/// decoded packets to the engine's fixed interleaved i16 stereo format.
pub struct SymphoniaCore {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    time_base: Option<TimeBase>,
    total_frames: Option<u64>,
    position_frames: u64,
    sample_buf: Option<SampleBuffer<i16>>,
}

impl SymphoniaCore {
    /// Probe a media source, select the first audio track, and validate the
    /// format against the output path's capabilities.
    pub fn probe(
        source: Box<dyn MediaSource>,
        extension: Option<&str>,
        context: &str,
    ) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                PlayerError::UnsupportedFormat(format!("failed to probe {context}: {e}"))
            })?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                PlayerError::UnsupportedFormat(format!("no audio track in {context}"))
            })?;

        let track_id = track.id;
        let params = &track.codec_params;

        let sample_rate = params.sample_rate.ok_or_else(|| {
            PlayerError::UnsupportedFormat(format!("{context}: sample rate unknown"))
        })?;
        let channels = params.channels.map(|c| c.count() as u16).ok_or_else(|| {
            PlayerError::UnsupportedFormat(format!("{context}: channel layout unknown"))
        })?;

        if channels == 0 || channels > 2 {
            return Err(PlayerError::UnsupportedFormat(format!(
                "{context}: {channels} channels (only mono and stereo supported)"
            )));
        }
        if sample_rate > MAX_SAMPLE_RATE {
            return Err(PlayerError::UnsupportedFormat(format!(
                "{context}: {sample_rate} Hz exceeds {MAX_SAMPLE_RATE} Hz"
            )));
        }

        let time_base = params.time_base;
        let total_frames = params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| {
                PlayerError::UnsupportedFormat(format!("{context}: failed to create decoder: {e}"))
            })?;

        debug!("probed {context}: rate={sample_rate}, channels={channels}, frames={total_frames:?}");

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            time_base,
            total_frames,
            position_frames: 0,
            sample_buf: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub fn position_frames(&self) -> u64 {
        self.position_frames
    }

    /// Decode the next packet for our track into `storage` as interleaved
    /// stereo i16. Retries transparently through decoder rebuilds and single
    /// corrupt packets.
    pub fn decode_next(&mut self, mut storage: Vec<i16>) -> Result<BackendRead> {
        storage.clear();

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(BackendRead::EndOfStream(storage));
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.rebuild_decoder()?;
                    continue;
                }
                Err(SymphoniaError::IoError(e)) => {
                    return Err(PlayerError::from_io("demuxer read", e));
                }
                Err(e) => {
                    return Err(PlayerError::Unknown(format!("demuxer error: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            self.position_frames = self.ts_to_frames(packet.ts());

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if self.sample_buf.is_none() {
                        let spec = *decoded.spec();
                        let duration = decoded.capacity() as u64;
                        self.sample_buf = Some(SampleBuffer::new(duration, spec));
                    }
                    let sample_buf = self.sample_buf.as_mut().unwrap();
                    sample_buf.copy_interleaved_ref(decoded);

                    let samples = sample_buf.samples();
                    if self.channels == 1 {
                        storage.reserve(samples.len() * 2);
                        for &s in samples {
                            storage.push(s);
                            storage.push(s);
                        }
                    } else {
                        storage.extend_from_slice(samples);
                    }
                    return Ok(BackendRead::Samples(storage));
                }
                Err(SymphoniaError::ResetRequired) => {
                    // Format change mid-stream; rebuild and keep pulling.
                    self.rebuild_decoder()?;
                    continue;
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Single corrupt packet, skip it.
                    warn!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => {
                    return Err(PlayerError::Unknown(format!("decoder error: {e}")));
                }
            }
        }
    }

    /// Relocate the demuxer to the nearest sync point at or before `ms` and
    /// reset the decoder. Returns the actually-located frame position.
    pub fn seek(&mut self, ms: u64) -> Result<u64> {
        let time = Time::new(ms / 1000, (ms % 1000) as f64 / 1000.0);
        let seeked = self
            .format
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| PlayerError::Unknown(format!("seek failed: {e}")))?;

        self.decoder.reset();
        self.sample_buf = None;
        self.position_frames = self.ts_to_frames(seeked.actual_ts);
        Ok(self.position_frames)
    }

    /// Drop decoder-internal state without moving the demuxer.
    pub fn flush(&mut self) {
        self.decoder.reset();
        self.sample_buf = None;
    }

    fn rebuild_decoder(&mut self) -> Result<()> {
        debug!("rebuilding decoder after reset-required signal");
        let track = self
            .format
            .tracks()
            .iter()
            .find(|t| t.id == self.track_id)
            .ok_or_else(|| PlayerError::Unknown("track vanished during decode".into()))?;
        self.decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| PlayerError::Unknown(format!("decoder rebuild failed: {e}")))?;
        self.sample_buf = None;
        Ok(())
    }

    fn ts_to_frames(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                time.seconds * self.sample_rate as u64
                    + (time.frac * self.sample_rate as f64) as u64
            }
            // Without a time base, timestamps are already in frames.
            None => ts,
        }
    }
}
