//! Track decoder lifecycle
//!
//! One [`TrackDecoder`] per queued track. It owns the source, the decode
//! backend chosen at prepare time, and for network sources the receiver
//! thread. Decode calls (`next_output`, `seek`) are issued only by the
//! engine thread; outside threads observe progress through the lock-free
//! [`DecoderStatus`] handle.
//!
//! State machine:
//!
//! ```text
//! Idle -> SourceAttached -> Preparing -> Prepared -> Started <-> Paused
//!                                            |           \___ Seeking ___/
//! any state -> Error;  Prepared|Started|Paused|Error -> End
//! ```
//!
//! Errors from decode or seek are terminal for the decoder instance; it
//! moves to `Error` and must be released before the slot is reused.

use crate::decode::backend::{BackendRead, DecodeBackend};
use crate::decode::local::LocalBackend;
use crate::decode::stream::StreamBackend;
use crate::audio::OutputBuffer;
use crate::stream::{is_network_url, NetworkStreamReceiver, StreamRingBuffer};
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use segue_common::{EventBus, PlayerError, PlayerEvent, Result, Tuning};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long async prepare waits for stream headers to arrive
const PREBUFFER_TIMEOUT: Duration = Duration::from_secs(30);

/// Recycled output storage kept per decoder
const FREE_STORAGE_LIMIT: usize = 8;

/// Initial per-chunk sample storage
const STORAGE_CAPACITY: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    SourceAttached,
    Preparing,
    Prepared,
    Started,
    Paused,
    Seeking,
    Error,
    End,
}

/// Progress fields safe to read from any thread without locking.
/// Written only by the engine thread (or the prepare worker, once).
#[derive(Debug, Default)]
pub struct DecoderStatus {
    pub position_frames: AtomicU64,
    pub end_of_stream: AtomicBool,
    pub prepared: AtomicBool,
    pub errored: AtomicBool,
}

type PreparedParts = (Box<dyn DecodeBackend>, Option<NetworkStreamReceiver>);

pub struct TrackDecoder {
    id: Uuid,
    source: Option<String>,
    network: bool,
    state: DecoderState,
    backend: Option<Box<dyn DecodeBackend>>,
    receiver: Option<NetworkStreamReceiver>,
    prepare_rx: Option<Receiver<Result<PreparedParts>>>,
    status: Arc<DecoderStatus>,
    /// True once any output buffer was produced; a lookahead decoder with
    /// consumed state cannot be rewound and must be rebuilt on promotion
    produced_output: bool,
    next_index: u64,
    free_storage: Vec<Vec<i16>>,
    events: EventBus,
    generation: u64,
    tuning: Tuning,
}

impl TrackDecoder {
    pub fn new(events: EventBus, generation: u64, tuning: Tuning) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: None,
            network: false,
            state: DecoderState::Idle,
            backend: None,
            receiver: None,
            prepare_rx: None,
            status: Arc::new(DecoderStatus::default()),
            produced_output: false,
            next_index: 0,
            free_storage: Vec::new(),
            events,
            generation,
            tuning,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn is_network(&self) -> bool {
        self.network
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Lock-free progress handle for outside observers.
    pub fn status_handle(&self) -> Arc<DecoderStatus> {
        Arc::clone(&self.status)
    }

    /// Retag events from this decoder after the engine adopts it.
    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Attach a source path or URL. Local paths are validated up front so a
    /// dead playlist entry fails here rather than deep inside prepare.
    pub fn attach_source(&mut self, source: &str) -> Result<()> {
        self.require_state(DecoderState::Idle, "attach_source")?;

        if is_network_url(source) {
            self.network = true;
        } else {
            let path = Path::new(source);
            let meta = std::fs::metadata(path)
                .map_err(|e| PlayerError::from_io(source, e))?;
            if !meta.is_file() || meta.len() == 0 {
                return Err(PlayerError::NotFound(format!(
                    "{source} is not a playable file"
                )));
            }
        }

        self.source = Some(source.to_string());
        self.state = DecoderState::SourceAttached;
        debug!(decoder = %self.id, network = self.network, "source attached: {source}");
        Ok(())
    }

    /// Synchronous prepare, local sources only.
    ///
    /// Network sources must go through `prepare_async`: their headers arrive
    /// from the network and blocking the caller on that is never acceptable.
    pub fn prepare(&mut self) -> Result<()> {
        self.require_state(DecoderState::SourceAttached, "prepare")?;
        if self.network {
            return Err(PlayerError::InvalidState(
                "network sources must be prepared asynchronously".into(),
            ));
        }

        self.state = DecoderState::Preparing;
        let source = self.source.clone().unwrap_or_default();
        match LocalBackend::open(Path::new(&source)) {
            Ok(backend) => {
                self.finish_prepare(Box::new(backend), None);
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Asynchronous prepare on a worker thread.
    ///
    /// For network sources this starts the receiver, waits for the prebuffer
    /// threshold, then probes headers out of the ring. The worker reports
    /// back over a channel that the engine drains via `poll_prepare`; the
    /// metadata event doubles as the "prepared" notification to callers.
    pub fn prepare_async(&mut self) -> Result<()> {
        self.require_state(DecoderState::SourceAttached, "prepare_async")?;
        self.state = DecoderState::Preparing;

        let (tx, rx) = bounded::<Result<PreparedParts>>(1);
        self.prepare_rx = Some(rx);

        let source = self.source.clone().unwrap_or_default();
        let network = self.network;
        let tuning = self.tuning.clone();
        let events = self.events.clone();
        let status = Arc::clone(&self.status);
        let id = self.id;
        let generation = self.generation;

        thread::Builder::new()
            .name("decoder-prep".into())
            .spawn(move || {
                let result = if network {
                    prepare_stream(&source, &tuning)
                } else {
                    LocalBackend::open(Path::new(&source))
                        .map(|b| (Box::new(b) as Box<dyn DecodeBackend>, None))
                };

                match result {
                    Ok((backend, receiver)) => {
                        status.prepared.store(true, Ordering::Release);
                        if let Some(url) = receiver.as_ref().and_then(|r| r.final_url()) {
                            events.emit_lossy(PlayerEvent::UrlUpdated {
                                track_id: id,
                                url,
                                generation,
                                timestamp: chrono::Utc::now(),
                            });
                        }
                        events.emit_lossy(PlayerEvent::MetadataUpdate {
                            track_id: id,
                            sample_rate: backend.sample_rate(),
                            channels: backend.channels(),
                            duration_ms: backend.total_frames().map(|f| {
                                segue_common::frames_to_ms(f, backend.sample_rate())
                            }),
                            generation,
                            timestamp: chrono::Utc::now(),
                        });
                        let _ = tx.send(Ok((backend, receiver)));
                    }
                    Err(e) => {
                        status.errored.store(true, Ordering::Release);
                        let _ = tx.send(Err(e));
                    }
                }
            })
            .expect("failed to spawn prepare thread");

        Ok(())
    }

    /// Integrate a finished async prepare, if any. Returns true once the
    /// decoder is prepared. Called from the engine thread.
    pub fn poll_prepare(&mut self) -> Result<bool> {
        if self.state != DecoderState::Preparing {
            return Ok(self.status.prepared.load(Ordering::Acquire));
        }
        let Some(rx) = &self.prepare_rx else {
            return Ok(false);
        };

        match rx.try_recv() {
            Ok(Ok((backend, receiver))) => {
                self.prepare_rx = None;
                self.finish_prepare_quiet(backend, receiver);
                Ok(true)
            }
            Ok(Err(e)) => {
                self.prepare_rx = None;
                self.fail(&e);
                Err(e)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => {
                self.prepare_rx = None;
                let e = PlayerError::Unknown("prepare worker vanished".into());
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn finish_prepare(&mut self, backend: Box<dyn DecodeBackend>, receiver: Option<NetworkStreamReceiver>) {
        let sample_rate = backend.sample_rate();
        let channels = backend.channels();
        let duration_ms = backend
            .total_frames()
            .map(|f| segue_common::frames_to_ms(f, sample_rate));

        self.finish_prepare_quiet(backend, receiver);

        self.events.emit_lossy(PlayerEvent::MetadataUpdate {
            track_id: self.id,
            sample_rate,
            channels,
            duration_ms,
            generation: self.generation,
            timestamp: chrono::Utc::now(),
        });
    }

    // Async prepare already emitted the metadata event from the worker.
    fn finish_prepare_quiet(
        &mut self,
        backend: Box<dyn DecodeBackend>,
        receiver: Option<NetworkStreamReceiver>,
    ) {
        info!(
            decoder = %self.id,
            rate = backend.sample_rate(),
            "prepared ({} frames known)",
            backend
                .total_frames()
                .map(|f| f.to_string())
                .unwrap_or_else(|| "no".into())
        );
        self.backend = Some(backend);
        self.receiver = receiver;
        self.status.prepared.store(true, Ordering::Release);
        self.state = DecoderState::Prepared;
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.backend.as_ref().map(|b| b.sample_rate())
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.backend.as_ref().and_then(|b| b.total_frames())
    }

    pub fn position_frames(&self) -> u64 {
        self.status.position_frames.load(Ordering::Acquire)
    }

    pub fn end_of_stream(&self) -> bool {
        self.status.end_of_stream.load(Ordering::Acquire)
    }

    pub fn produced_output(&self) -> bool {
        self.produced_output
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            DecoderState::Prepared | DecoderState::Paused => {
                self.state = DecoderState::Started;
                Ok(())
            }
            other => Err(PlayerError::InvalidState(format!(
                "cannot start from {other:?}"
            ))),
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require_state(DecoderState::Started, "pause")?;
        self.state = DecoderState::Paused;
        Ok(())
    }

    /// Whether enough input is buffered for `next_output` to make progress.
    /// A false return after an unpause or while a stream refills is normal.
    pub fn fill_input(&mut self) -> Result<bool> {
        self.require_active("fill_input")?;
        Ok(self
            .backend
            .as_ref()
            .map(|b| b.input_ready())
            .unwrap_or(false))
    }

    /// Pull the next decoded buffer. Engine thread only.
    ///
    /// `Ok(None)` means input is not yet framed (stream path); end of stream
    /// is delivered as a buffer with the end flag set, after which no
    /// further output will be produced.
    pub fn next_output(&mut self) -> Result<Option<OutputBuffer>> {
        self.require_active("next_output")?;
        let backend = self.backend.as_mut().ok_or_else(|| {
            PlayerError::InvalidState("next_output before prepare finished".into())
        })?;

        let storage = self
            .free_storage
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(STORAGE_CAPACITY));

        match backend.next_output(storage) {
            Ok(BackendRead::Samples(samples)) => {
                self.produced_output = true;
                self.status
                    .position_frames
                    .store(backend.position_frames(), Ordering::Release);
                let index = self.next_index;
                self.next_index += 1;
                Ok(Some(OutputBuffer::new(index, samples, false)))
            }
            Ok(BackendRead::NotReady(storage)) => {
                self.recycle(storage);
                Ok(None)
            }
            Ok(BackendRead::EndOfStream(storage)) => {
                self.status.end_of_stream.store(true, Ordering::Release);
                let index = self.next_index;
                self.next_index += 1;
                debug!(decoder = %self.id, "end of stream after {index} buffers");
                Ok(Some(OutputBuffer::end_marker(index, storage)))
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Seek to `ms`. Returns the actually-located position in frames.
    ///
    /// The settle delay before the flush is a deliberate workaround: some
    /// decoder backends stall indefinitely when flushed mid-packet. Tuned
    /// via [`Tuning::seek_settle`], not load-bearing logic.
    pub fn seek(&mut self, ms: u64) -> Result<u64> {
        let resume_to = match self.state {
            DecoderState::Prepared | DecoderState::Started | DecoderState::Paused => self.state,
            other => {
                return Err(PlayerError::InvalidState(format!(
                    "cannot seek from {other:?}"
                )))
            }
        };
        if self.network {
            return Err(PlayerError::InvalidState(
                "cannot seek a network stream".into(),
            ));
        }

        self.state = DecoderState::Seeking;
        thread::sleep(self.tuning.seek_settle);

        let backend = self.backend.as_mut().ok_or_else(|| {
            PlayerError::InvalidState("seek before prepare finished".into())
        })?;
        backend.flush();

        match backend.seek(ms) {
            Ok(frames) => {
                self.status.position_frames.store(frames, Ordering::Release);
                self.status.end_of_stream.store(false, Ordering::Release);
                self.state = resume_to;
                Ok(frames)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Rebuild a lookahead decoder that already produced output.
    ///
    /// When a staged "next" decoder is promoted through a user skip rather
    /// than natural completion, any output it already produced was written
    /// toward the previous crossfade point and cannot be rewound. Tear the
    /// backend down and re-prepare from the same source.
    pub fn reset_if_used_as_lookahead(&mut self) -> Result<()> {
        if !self.produced_output {
            return Ok(());
        }
        let source = self.source.clone().ok_or_else(|| {
            PlayerError::InvalidState("lookahead reset without a source".into())
        })?;
        // Staged decoders are never network streams (crossfade eligibility),
        // so the rebuild is a synchronous local open.
        debug!(decoder = %self.id, "rebuilding consumed lookahead decoder");
        self.backend = None;
        self.produced_output = false;
        self.next_index = 0;
        self.status.position_frames.store(0, Ordering::Release);
        self.status.end_of_stream.store(false, Ordering::Release);

        match LocalBackend::open(Path::new(&source)) {
            Ok(backend) => {
                self.backend = Some(Box::new(backend));
                self.state = DecoderState::Prepared;
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Mark this decoder failed. Terminal until released.
    pub fn fail(&mut self, err: &PlayerError) {
        warn!(decoder = %self.id, "decoder failed: {err}");
        self.status.errored.store(true, Ordering::Release);
        self.state = DecoderState::Error;
    }

    /// Tear down the backend and receiver. Terminal.
    pub fn release(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.shutdown();
        }
        self.backend = None;
        self.prepare_rx = None;
        self.state = DecoderState::End;
    }

    /// Return exhausted buffer storage for reuse.
    pub fn recycle(&mut self, storage: Vec<i16>) {
        if self.free_storage.len() < FREE_STORAGE_LIMIT {
            self.free_storage.push(storage);
        }
    }

    fn require_state(&self, expected: DecoderState, op: &str) -> Result<()> {
        if self.state != expected {
            return Err(PlayerError::InvalidState(format!(
                "{op} requires {expected:?}, decoder is {:?}",
                self.state
            )));
        }
        Ok(())
    }

    /// Decode operations are legal only while started or paused; `Error`
    /// and `End` decoders must never be touched again.
    fn require_active(&self, op: &str) -> Result<()> {
        match self.state {
            DecoderState::Started | DecoderState::Paused => Ok(()),
            other => Err(PlayerError::InvalidState(format!(
                "{op} illegal in {other:?}"
            ))),
        }
    }
}

impl Drop for TrackDecoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Network prepare: receiver first, then probe headers out of the ring.
fn prepare_stream(url: &str, tuning: &Tuning) -> Result<PreparedParts> {
    let ring = Arc::new(StreamRingBuffer::new(tuning.stream_ring_bytes));
    let receiver = NetworkStreamReceiver::spawn(url.to_string(), Arc::clone(&ring));

    receiver.wait_for_prebuffer(tuning.stream_prebuffer_bytes, PREBUFFER_TIMEOUT)?;

    let backend = StreamBackend::probe(ring, url, tuning.stream_min_framing_bytes)?;
    Ok((Box::new(backend), Some(receiver)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> TrackDecoder {
        TrackDecoder::new(EventBus::default(), 1, Tuning::default())
    }

    fn write_wav(path: &Path, frames: u32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample((i % 512) as i16).unwrap();
            writer.write_sample((i % 512) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_attach_missing_file_fails_not_found() {
        let mut dec = decoder();
        let err = dec.attach_source("/no/such/file.flac").unwrap_err();
        assert!(matches!(err, PlayerError::NotFound(_)));
        assert_eq!(dec.state(), DecoderState::Idle);
    }

    #[test]
    fn test_attach_network_url_skips_local_validation() {
        let mut dec = decoder();
        dec.attach_source("http://example.com/radio.mp3").unwrap();
        assert!(dec.is_network());
        assert_eq!(dec.state(), DecoderState::SourceAttached);
    }

    #[test]
    fn test_network_source_rejects_sync_prepare() {
        let mut dec = decoder();
        dec.attach_source("http://example.com/radio.mp3").unwrap();
        let err = dec.prepare().unwrap_err();
        assert!(matches!(err, PlayerError::InvalidState(_)));
    }

    #[test]
    fn test_lifecycle_on_local_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        write_wav(&path, 2205);

        let mut dec = decoder();
        dec.attach_source(path.to_str().unwrap()).unwrap();
        dec.prepare().unwrap();
        assert_eq!(dec.state(), DecoderState::Prepared);
        assert_eq!(dec.sample_rate(), Some(44_100));
        assert_eq!(dec.total_frames(), Some(2205));

        dec.start().unwrap();
        let mut frames = 0u64;
        loop {
            let buf = dec.next_output().unwrap().expect("local always ready");
            frames += (buf.remaining() / 2) as u64;
            let eos = buf.end_of_stream;
            dec.recycle(buf.into_storage());
            if eos {
                break;
            }
        }
        assert_eq!(frames, 2205);
        assert!(dec.end_of_stream());
    }

    #[test]
    fn test_decode_illegal_before_start_and_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        write_wav(&path, 441);

        let mut dec = decoder();
        dec.attach_source(path.to_str().unwrap()).unwrap();
        dec.prepare().unwrap();

        // Prepared but not Started
        assert!(matches!(
            dec.next_output().unwrap_err(),
            PlayerError::InvalidState(_)
        ));

        dec.release();
        assert_eq!(dec.state(), DecoderState::End);
        assert!(dec.next_output().is_err());
        assert!(dec.fill_input().is_err());
    }

    #[test]
    fn test_pause_resume_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        write_wav(&path, 441);

        let mut dec = decoder();
        dec.attach_source(path.to_str().unwrap()).unwrap();
        dec.prepare().unwrap();
        dec.start().unwrap();
        dec.pause().unwrap();
        assert_eq!(dec.state(), DecoderState::Paused);
        // decode calls stay legal while paused (feed loop drains the tail)
        assert!(dec.fill_input().unwrap());
        dec.start().unwrap();
        assert_eq!(dec.state(), DecoderState::Started);
    }

    #[test]
    fn test_seek_returns_to_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        write_wav(&path, 44_100);

        let mut dec = decoder();
        dec.attach_source(path.to_str().unwrap()).unwrap();
        dec.prepare().unwrap();
        dec.start().unwrap();

        let frames = dec.seek(500).unwrap();
        assert!(frames <= 22_050);
        assert_eq!(dec.state(), DecoderState::Started);
        assert_eq!(dec.position_frames(), frames);
    }

    #[test]
    fn test_lookahead_reset_reprepares() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        write_wav(&path, 2205);

        let mut dec = decoder();
        dec.attach_source(path.to_str().unwrap()).unwrap();
        dec.prepare().unwrap();
        dec.start().unwrap();

        // consume some output, as a staged next decoder would
        let buf = dec.next_output().unwrap().unwrap();
        assert!(dec.produced_output());
        dec.recycle(buf.into_storage());

        dec.reset_if_used_as_lookahead().unwrap();
        assert_eq!(dec.state(), DecoderState::Prepared);
        assert!(!dec.produced_output());
        assert_eq!(dec.position_frames(), 0);

        // decodes the full track again from the top
        dec.start().unwrap();
        let mut frames = 0u64;
        loop {
            let buf = dec.next_output().unwrap().unwrap();
            frames += (buf.remaining() / 2) as u64;
            let eos = buf.end_of_stream;
            dec.recycle(buf.into_storage());
            if eos {
                break;
            }
        }
        assert_eq!(frames, 2205);
    }

    #[test]
    fn test_untouched_lookahead_reset_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        write_wav(&path, 441);

        let mut dec = decoder();
        dec.attach_source(path.to_str().unwrap()).unwrap();
        dec.prepare().unwrap();
        dec.reset_if_used_as_lookahead().unwrap();
        assert_eq!(dec.state(), DecoderState::Prepared);
    }

    #[test]
    fn test_async_prepare_local() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        write_wav(&path, 441);

        let mut dec = decoder();
        dec.attach_source(path.to_str().unwrap()).unwrap();
        dec.prepare_async().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !dec.poll_prepare().unwrap() {
            assert!(std::time::Instant::now() < deadline, "prepare timed out");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(dec.state(), DecoderState::Prepared);
        assert_eq!(dec.sample_rate(), Some(44_100));
    }
}
