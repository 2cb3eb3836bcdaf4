//! Network stream playback tests against a local single-shot HTTP server.
//!
//! The server drips a WAV body: an initial burst to satisfy the prebuffer,
//! a deliberate stall long enough to starve the decoder, then the rest.
//! The engine must treat the starvation as a buffering blip, recover, and
//! complete the track when the stream ends.

use segue_common::{ErrorKind, EventBus, PlaybackState, PlayerEvent, Tuning, TuningOverrides};
use segue_player::audio::{AudioSink, SinkFactory};
use segue_player::{PlaybackEngine, TrackDecoder};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct SimShared {
    played: AtomicU64,
    queued: AtomicU64,
    paused: AtomicBool,
    last_drain: Mutex<Instant>,
}

struct SimSink {
    rate: u32,
    shared: Arc<SimShared>,
}

impl AudioSink for SimSink {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn capacity_frames(&self) -> u64 {
        4096
    }

    fn playback_head_frames(&self) -> u64 {
        let mut last = self.shared.last_drain.lock().unwrap();
        let now = Instant::now();
        let budget = (now.duration_since(*last).as_secs_f64() * self.rate as f64) as u64;
        *last = now;
        if !self.shared.paused.load(Ordering::Acquire) && budget > 0 {
            let queued = self.shared.queued.load(Ordering::Acquire);
            let drain = budget.min(queued);
            self.shared.queued.fetch_sub(drain, Ordering::AcqRel);
            self.shared.played.fetch_add(drain, Ordering::AcqRel);
        }
        self.shared.played.load(Ordering::Acquire)
    }

    fn free_space_samples(&self) -> usize {
        let queued = self.shared.queued.load(Ordering::Acquire);
        ((4096u64.saturating_sub(queued)) * 2) as usize
    }

    fn write(&mut self, samples: &[i16]) -> usize {
        let accepted = samples.len().min(self.free_space_samples()) & !1;
        self.shared
            .queued
            .fetch_add((accepted / 2) as u64, Ordering::AcqRel);
        accepted
    }

    fn pause(&mut self) -> Result<(), segue_common::PlayerError> {
        self.shared.paused.store(true, Ordering::Release);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), segue_common::PlayerError> {
        self.shared.paused.store(false, Ordering::Release);
        Ok(())
    }

    fn flush(&mut self) {
        self.shared.queued.store(0, Ordering::Release);
    }
}

fn sim_factory() -> SinkFactory {
    Box::new(|rate| {
        Ok(Box::new(SimSink {
            rate,
            shared: Arc::new(SimShared {
                played: AtomicU64::new(0),
                queued: AtomicU64::new(0),
                paused: AtomicBool::new(false),
                last_drain: Mutex::new(Instant::now()),
            }),
        }))
    })
}

fn test_tuning() -> Tuning {
    Tuning::resolve(&TuningOverrides {
        seek_settle_ms: Some(1),
        flush_settle_ms: Some(1),
        underrun_grace_ms: Some(150),
        feed_poll_ms: Some(2),
        action_timeout_secs: Some(15),
        stream_prebuffer_bytes: Some(2048),
        stream_min_framing_bytes: Some(512),
        stream_ring_bytes: Some(16 * 1024),
        progress_interval_ms: Some(100),
        ..Default::default()
    })
}

fn wav_bytes(rate: u32, frames: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            writer.write_sample((i % 128) as i16).unwrap();
            writer.write_sample((i % 128) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Serve `body` once over HTTP: `initial` bytes immediately, then a stall,
/// then the remainder. Returns the URL.
fn serve_once(body: Vec<u8>, initial: usize, stall: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/stream.wav", listener.local_addr().unwrap());

    std::thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();

        // drain the request head
        let mut buf = [0u8; 1024];
        let mut head = Vec::new();
        loop {
            let n = conn.read(&mut buf).unwrap_or(0);
            if n == 0 {
                return;
            }
            head.extend_from_slice(&buf[..n]);
            if head.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: audio/wav\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        conn.write_all(header.as_bytes()).unwrap();

        let split = initial.min(body.len());
        conn.write_all(&body[..split]).unwrap();
        conn.flush().unwrap();

        std::thread::sleep(stall);

        for chunk in body[split..].chunks(8 * 1024) {
            if conn.write_all(chunk).is_err() {
                return;
            }
        }
        let _ = conn.flush();
    });

    url
}

struct Harness {
    engine: PlaybackEngine,
    events: EventBus,
    rx: tokio::sync::broadcast::Receiver<PlayerEvent>,
    tuning: Tuning,
}

impl Harness {
    fn new() -> Self {
        let events = EventBus::default();
        let rx = events.subscribe();
        let tuning = test_tuning();
        let engine = PlaybackEngine::start(
            sim_factory(),
            events.clone(),
            tuning.clone(),
            Arc::new(Mutex::new(1.0)),
        );
        Self {
            engine,
            events,
            rx,
            tuning,
        }
    }

    fn wait_for(
        &mut self,
        timeout: Duration,
        mut pred: impl FnMut(&PlayerEvent) -> bool,
    ) -> PlayerEvent {
        let deadline = Instant::now() + timeout;
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if pred(&event) {
                        return event;
                    }
                }
                Err(tokio::sync::broadcast::error::TryRecvError::Empty) => {
                    assert!(
                        Instant::now() < deadline,
                        "timed out waiting for expected event"
                    );
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::TryRecvError::Closed) => {
                    panic!("event bus closed");
                }
            }
        }
    }
}

#[test]
fn stream_underrun_is_a_buffering_blip_not_an_error() {
    // Half a second of audio; the first burst carries roughly the first
    // tenth, then the server goes quiet well past the grace period.
    let body = wav_bytes(44_100, 22_050);
    let url = serve_once(body, 16 * 1024, Duration::from_millis(600));

    let mut h = Harness::new();
    let mut decoder = TrackDecoder::new(h.events.clone(), h.engine.generation(), h.tuning.clone());
    decoder.attach_source(&url).unwrap();
    decoder.prepare_async().unwrap();
    assert!(h.engine.play(decoder));

    h.wait_for(Duration::from_secs(10), |e| {
        matches!(e, PlayerEvent::BufferingStart { .. })
    });
    h.wait_for(Duration::from_secs(10), |e| {
        matches!(e, PlayerEvent::BufferingEnd { .. })
    });
    h.wait_for(Duration::from_secs(15), |e| {
        matches!(e, PlayerEvent::Completion { .. })
    });
    assert_eq!(h.engine.state(), PlaybackState::Idle);
}

#[test]
fn stream_cannot_seek() {
    let body = wav_bytes(44_100, 44_100);
    let url = serve_once(body, usize::MAX, Duration::from_millis(0));

    let mut h = Harness::new();
    let mut decoder = TrackDecoder::new(h.events.clone(), h.engine.generation(), h.tuning.clone());
    decoder.attach_source(&url).unwrap();
    decoder.prepare_async().unwrap();
    assert!(h.engine.play(decoder));

    assert!(!h.engine.seek(500));
    let error = h.wait_for(Duration::from_secs(5), |e| {
        matches!(e, PlayerEvent::Error { .. })
    });
    match error {
        PlayerEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::InvalidState),
        _ => unreachable!(),
    }

    assert!(h.engine.reset());
}

#[test]
fn missing_stream_fails_play_with_not_found() {
    // a listener that immediately 404s
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/gone.mp3", listener.local_addr().unwrap());
    std::thread::spawn(move || {
        if let Ok((mut conn, _)) = listener.accept() {
            let mut buf = [0u8; 1024];
            let _ = conn.read(&mut buf);
            let _ = conn.write_all(
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
        }
    });

    let mut h = Harness::new();
    let mut decoder = TrackDecoder::new(h.events.clone(), h.engine.generation(), h.tuning.clone());
    decoder.attach_source(&url).unwrap();
    decoder.prepare_async().unwrap();

    assert!(!h.engine.play(decoder));
    let error = h.wait_for(Duration::from_secs(10), |e| {
        matches!(e, PlayerEvent::Error { .. })
    });
    match error {
        PlayerEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::NotFound),
        _ => unreachable!(),
    }
}
