//! Playback engine
//!
//! One dedicated thread owns the audio sink and the current/next decoder
//! slots. Outside threads never touch a decoder directly: they submit
//! actions through [`ActionPort`] and the engine thread applies exactly one
//! at a time, which is the data-race-avoidance invariant the whole design
//! rests on. Between actions the thread runs the feed loop, pulling decoded
//! buffers and writing them to the sink with low-water backpressure.
//!
//! Gapless handoff: when the current decoder's stream ends while a staged
//! next decoder is eligible, the feed loop switches its byte source to the
//! next decoder without interrupting the sink. Once the device has played
//! everything written from the current track, the counters are carried
//! forward exactly and the next decoder becomes current.

use crate::audio::{AudioSink, OutputBuffer, SinkFactory};
use crate::decode::{DecoderState, TrackDecoder};
use crate::playback::actions::{Action, ActionPort, ActionRequest};
use crate::playback::clock::PlaybackClock;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use segue_common::{
    frames_to_ms, EventBus, PlaybackState, PlayerError, PlayerEvent, Result, Tuning,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long `Play` waits for an async prepare still in flight
const PREPARE_WAIT: Duration = Duration::from_secs(30);

/// State shared between the engine thread and its handle
struct EngineShared {
    alive: AtomicBool,
    generation: AtomicU64,
    state: AtomicU8,
    /// Last known playback position, for cheap snapshot queries
    position_ms: AtomicU64,
}

impl EngineShared {
    fn set_state(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> PlaybackState {
        match self.state.load(Ordering::Acquire) {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            _ => PlaybackState::Idle,
        }
    }
}

/// Caller-facing engine handle.
///
/// Cheap to share behind an `Arc`; every control method is synchronous and
/// returns `true` on success. Failures return `false` and additionally
/// surface as an asynchronous [`PlayerEvent::Error`], matching how callers
/// are expected to consume engine errors.
pub struct PlaybackEngine {
    port: ActionPort,
    events: EventBus,
    tuning: Tuning,
    volume: Arc<Mutex<f32>>,
    shared: Arc<EngineShared>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Spawn the engine thread.
    ///
    /// The sink factory runs on the engine thread whenever a sink must be
    /// (re)opened; `cpal` streams are not `Send`, so this is the only place
    /// sinks are ever constructed. `volume` is the cell the factory's sinks
    /// read from, shared here so [`set_volume`](Self::set_volume) reaches
    /// the live output path.
    pub fn start(
        sink_factory: SinkFactory,
        events: EventBus,
        tuning: Tuning,
        volume: Arc<Mutex<f32>>,
    ) -> Self {
        let (port, rx) = ActionPort::new(tuning.action_timeout);
        let shared = Arc::new(EngineShared {
            alive: AtomicBool::new(true),
            generation: AtomicU64::new(1),
            state: AtomicU8::new(PlaybackState::Idle as u8),
            position_ms: AtomicU64::new(0),
        });

        let core_events = events.clone();
        let core_tuning = tuning.clone();
        let core_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("playback-engine".into())
            .spawn(move || {
                EngineCore::new(rx, sink_factory, core_events, core_tuning, core_shared).run();
            })
            .expect("failed to spawn engine thread");

        Self {
            port,
            events,
            tuning,
            volume,
            shared,
            thread: Some(thread),
        }
    }

    /// Create a decoder wired to this engine's event bus and tuning.
    pub fn new_decoder(&self) -> TrackDecoder {
        TrackDecoder::new(self.events.clone(), self.generation(), self.tuning.clone())
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Generation of the current playback session; events from earlier
    /// generations are stale.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    /// Last known playback position within the current track. Updated on
    /// every progress tick and seek; zero while idle.
    pub fn position_ms(&self) -> u64 {
        self.shared.position_ms.load(Ordering::Acquire)
    }

    /// Shared volume cell, for wiring into a sink factory.
    pub fn volume_handle(&self) -> Arc<Mutex<f32>> {
        Arc::clone(&self.volume)
    }

    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap() = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    pub fn play(&self, decoder: TrackDecoder) -> bool {
        let track_id = decoder.id();
        self.submit(
            Action::Play {
                decoder: Box::new(decoder),
            },
            Some(track_id),
        )
    }

    /// Skip to the staged next track immediately.
    pub fn play_next(&self, track_id: Uuid) -> bool {
        self.submit(Action::PlayNext { track_id }, Some(track_id))
    }

    pub fn pause(&self) -> bool {
        self.submit(Action::Pause, None)
    }

    pub fn resume(&self) -> bool {
        self.submit(Action::Resume, None)
    }

    pub fn seek(&self, ms: u64) -> bool {
        self.submit(Action::Seek { ms }, None)
    }

    /// Stage (or clear) the gapless follow-up. Rejected when the next
    /// track's sample rate differs from the active sink or either side is a
    /// network stream.
    pub fn set_next(&self, next: Option<TrackDecoder>) -> bool {
        self.submit(
            Action::SetNext {
                next: next.map(Box::new),
            },
            None,
        )
    }

    pub fn reset(&self) -> bool {
        self.submit(Action::Reset, None)
    }

    /// Stop the engine thread and release everything it owns.
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.port.submit(Action::Shutdown);
            self.shared.alive.store(false, Ordering::Release);
            let _ = thread.join();
        }
    }

    fn submit(&self, action: Action, track_id: Option<Uuid>) -> bool {
        match self.port.submit(action) {
            Ok(()) => true,
            Err(e) => {
                // Synchronous boolean plus an asynchronous typed error event.
                self.events.emit_lossy(PlayerEvent::Error {
                    track_id,
                    kind: (&e).into(),
                    message: e.to_string(),
                    generation: self.generation(),
                    timestamp: chrono::Utc::now(),
                });
                false
            }
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Engine-thread state. Everything here is owned by the engine thread;
/// nothing escapes except through events and the shared atomics.
struct EngineCore {
    rx: Receiver<ActionRequest>,
    sink_factory: SinkFactory,
    events: EventBus,
    tuning: Tuning,
    shared: Arc<EngineShared>,

    sink: Option<Box<dyn AudioSink>>,
    current: Option<TrackDecoder>,
    next: Option<TrackDecoder>,
    /// Partially-written buffer carried across feed iterations
    pending: Option<OutputBuffer>,
    /// True once the feed loop switched its byte source to the next decoder
    feeding_next: bool,
    clock: PlaybackClock,
    /// Frame position of the current track at the last seek (or zero)
    position_base: u64,
    playing: bool,
    buffering_since: Option<Instant>,
    grace_logged: bool,
    /// One automatic revive after a sink death; the second is fatal
    revived: bool,
    last_progress: Instant,
}

impl EngineCore {
    fn new(
        rx: Receiver<ActionRequest>,
        sink_factory: SinkFactory,
        events: EventBus,
        tuning: Tuning,
        shared: Arc<EngineShared>,
    ) -> Self {
        Self {
            rx,
            sink_factory,
            events,
            tuning,
            shared,
            sink: None,
            current: None,
            next: None,
            pending: None,
            feeding_next: false,
            clock: PlaybackClock::new(),
            position_base: 0,
            playing: false,
            buffering_since: None,
            grace_logged: false,
            revived: false,
            last_progress: Instant::now(),
        }
    }

    fn run(mut self) {
        info!("engine thread started");
        loop {
            if !self.shared.alive.load(Ordering::Acquire) {
                break;
            }

            if self.playing && self.current.is_some() {
                // Actions interleave with feed iterations without blocking.
                match self.rx.try_recv() {
                    Ok(request) => {
                        if self.handle(request) {
                            break;
                        }
                        continue;
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => break,
                }
                self.feed_iteration();
            } else {
                // Idle or paused: park on the action channel.
                match self.rx.recv_timeout(self.tuning.feed_poll * 10) {
                    Ok(request) => {
                        if self.handle(request) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }
        self.teardown();
        info!("engine thread stopped");
    }

    /// Apply one action atomically. Returns true on shutdown.
    fn handle(&mut self, request: ActionRequest) -> bool {
        let name = request.action.name();
        debug!("applying action: {name}");

        let (result, shutdown) = match request.action {
            Action::Play { decoder } => (self.apply_play(*decoder), false),
            Action::PlayNext { track_id } => (self.apply_play_next(track_id), false),
            Action::Pause => (self.apply_pause(), false),
            Action::Resume => (self.apply_resume(), false),
            Action::Seek { ms } => (self.apply_seek(ms), false),
            Action::SetNext { next } => (self.apply_set_next(next.map(|b| *b)), false),
            Action::Reset => (self.apply_reset(), false),
            Action::Shutdown => (Ok(()), true),
        };

        if let Err(e) = &result {
            warn!("action '{name}' failed: {e}");
        }
        let _ = request.reply.send(result);
        shutdown
    }

    fn apply_play(&mut self, mut decoder: TrackDecoder) -> Result<()> {
        self.wait_prepared(&mut decoder)?;

        // Replace whatever was playing; a fresh generation marks everything
        // emitted before this point as stale.
        self.release_playback();
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        decoder.set_generation(generation);

        let rate = decoder
            .sample_rate()
            .ok_or_else(|| PlayerError::InvalidState("decoder has no sample rate".into()))?;
        self.ensure_sink(rate)?;

        decoder.start()?;
        self.position_base = 0;
        self.clock.reset();
        self.current = Some(decoder);
        self.playing = true;
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    fn apply_play_next(&mut self, track_id: Uuid) -> Result<()> {
        let mut next = self
            .next
            .take()
            .ok_or_else(|| PlayerError::InvalidState("no next track staged".into()))?;
        if next.id() != track_id {
            let e = PlayerError::InvalidState(format!(
                "staged next is {}, not {track_id}",
                next.id()
            ));
            self.next = Some(next);
            return Err(e);
        }

        // A skip is not a gapless handoff: the staged decoder may already
        // have produced output toward the old crossfade point and must be
        // rebuilt before it can start from the top.
        next.reset_if_used_as_lookahead()?;

        if let Some(sink) = &mut self.sink {
            sink.flush();
        }
        if let Some(mut old) = self.current.take() {
            old.release();
        }
        self.drop_pending();
        self.feeding_next = false;

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        next.set_generation(generation);
        let rate = next
            .sample_rate()
            .ok_or_else(|| PlayerError::InvalidState("decoder has no sample rate".into()))?;
        self.ensure_sink(rate)?;

        next.start()?;
        self.position_base = 0;
        self.clock.reset();
        self.current = Some(next);
        self.playing = true;
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    fn apply_pause(&mut self) -> Result<()> {
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| PlayerError::InvalidState("nothing to pause".into()))?;
        current.pause()?;
        if let Some(sink) = &mut self.sink {
            sink.pause()?;
        }
        self.playing = false;
        self.set_state(PlaybackState::Paused);
        Ok(())
    }

    fn apply_resume(&mut self) -> Result<()> {
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| PlayerError::InvalidState("nothing to resume".into()))?;
        current.start()?;
        if let Some(sink) = &mut self.sink {
            sink.resume()?;
        }
        self.playing = true;
        self.buffering_since = None;
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    fn apply_seek(&mut self, ms: u64) -> Result<()> {
        let track_id = self
            .current
            .as_ref()
            .ok_or_else(|| PlayerError::InvalidState("nothing to seek".into()))?
            .id();

        // Queued-but-unplayed audio from the old position is discarded; the
        // flushed frames never advance the head, so the clock restarts from
        // the located position instead of waiting for them. The settle delay
        // lets the output callback finish any in-flight period first.
        thread::sleep(self.tuning.flush_settle);
        if let Some(sink) = &mut self.sink {
            sink.flush();
        }
        self.drop_pending();

        let frames = self
            .current
            .as_mut()
            .ok_or_else(|| PlayerError::InvalidState("nothing to seek".into()))?
            .seek(ms)?;

        // If the crossfade switch had already happened, the staged decoder
        // has consumed state pointing at the old boundary; rebuild it.
        if self.feeding_next {
            self.feeding_next = false;
            if let Some(next) = self.next.as_mut() {
                next.reset_if_used_as_lookahead()?;
            }
        }

        self.position_base = frames;
        self.clock.reset();
        self.buffering_since = None;

        let rate = self.current.as_ref().and_then(|c| c.sample_rate());
        let position_ms = rate.map(|r| frames_to_ms(frames, r)).unwrap_or(0);
        self.shared.position_ms.store(position_ms, Ordering::Release);
        self.events.emit_lossy(PlayerEvent::SeekComplete {
            track_id,
            position_ms,
            generation: self.shared.generation.load(Ordering::Acquire),
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    fn apply_set_next(&mut self, next: Option<TrackDecoder>) -> Result<()> {
        let Some(mut next) = next else {
            // Clearing the slot mid-crossfade abandons the switched source.
            if self.feeding_next {
                self.feeding_next = false;
                self.drop_pending();
            }
            if let Some(mut old) = self.next.take() {
                old.release();
            }
            return Ok(());
        };

        let current = self
            .current
            .as_ref()
            .ok_or_else(|| PlayerError::InvalidState("cannot stage next without a current track".into()))?;

        if next.state() != DecoderState::Prepared {
            let e = PlayerError::InvalidState(format!(
                "next decoder must be prepared, is {:?}",
                next.state()
            ));
            next.release();
            return Err(e);
        }

        // Gapless eligibility: equal rates, no live streams on either side.
        // Ineligible pairs fall back to an ordinary stop/start transition
        // driven by the caller; silently corrupting playback is worse than
        // a gap.
        let sink_rate = self.sink.as_ref().map(|s| s.sample_rate());
        if next.sample_rate() != sink_rate {
            let e = PlayerError::InvalidState(format!(
                "next track rate {:?} does not match sink rate {:?}",
                next.sample_rate(),
                sink_rate
            ));
            next.release();
            return Err(e);
        }
        if current.is_network() || next.is_network() {
            let e = PlayerError::InvalidState(
                "network streams are not eligible for gapless handoff".into(),
            );
            next.release();
            return Err(e);
        }

        next.set_generation(self.shared.generation.load(Ordering::Acquire));
        if let Some(mut old) = self.next.replace(next) {
            old.release();
        }
        debug!("next track staged for gapless handoff");
        Ok(())
    }

    fn apply_reset(&mut self) -> Result<()> {
        self.release_playback();
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.set_state(PlaybackState::Idle);
        Ok(())
    }

    /// One pass of the feed loop: head sample, backpressure check, pull,
    /// write, handoff/underrun checks.
    fn feed_iteration(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            self.playing = false;
            return;
        };

        if !sink.healthy() {
            self.handle_sink_death();
            return;
        }

        let head = sink.playback_head_frames();
        self.clock.advance_from_head(head);

        let capacity_samples = (sink.capacity_frames() * 2) as usize;
        let free = sink.free_space_samples();
        let low_water = (capacity_samples as f32 * self.tuning.sink_low_water) as usize;

        if free < low_water {
            // Sink comfortably full; nothing to do but wait.
            self.emit_progress();
            thread::sleep(self.tuning.feed_poll);
            return;
        }

        if self.pending.is_none() {
            self.pull_next_buffer();
        }

        let mut wrote = false;
        if let Some(buffer) = self.pending.as_mut() {
            let sink = self.sink.as_mut().unwrap();
            let accepted = sink.write(buffer.as_slice());
            if accepted > 0 {
                wrote = true;
                buffer.advance(accepted);
                self.clock.note_written((accepted / 2) as u64, self.feeding_next);
                if self.buffering_since.take().is_some() {
                    self.emit_buffering(false);
                }
            }
            if self.pending.as_ref().is_some_and(|b| b.is_exhausted()) {
                self.recycle_pending();
            }
        }

        self.check_handoff_or_underrun();
        self.emit_progress();

        // Any iteration that moved no audio (sink full, decoder starved,
        // draining toward completion) waits a bounded poll, never busy.
        if !wrote {
            thread::sleep(self.tuning.feed_poll);
        }
    }

    /// Pull one buffer from the active byte source (next decoder once the
    /// crossfade switch has happened, current before it).
    fn pull_next_buffer(&mut self) {
        let from_next = self.feeding_next;
        let decoder = if from_next {
            self.next.as_mut()
        } else {
            self.current.as_mut()
        };
        let Some(decoder) = decoder else { return };

        if decoder.end_of_stream() {
            // Current ended and a staged next is eligible: switch the byte
            // source without interrupting the sink.
            if !from_next && self.next.is_some() {
                self.begin_crossfade();
            }
            return;
        }

        match decoder.fill_input() {
            Ok(true) => {}
            Ok(false) => {
                // Stream input not framed yet; underrun logic picks this up.
                return;
            }
            Err(e) => {
                self.fatal_error(e);
                return;
            }
        }

        match decoder.next_output() {
            Ok(Some(buffer)) => {
                if buffer.end_of_stream {
                    debug!(
                        "decoder {} reached end of stream",
                        if from_next { "next" } else { "current" }
                    );
                    // End markers are empty; the final tail arrived in the
                    // preceding samples buffer.
                    decoder.recycle(buffer.into_storage());
                    if !from_next && self.next.is_some() {
                        self.begin_crossfade();
                    }
                } else {
                    self.pending = Some(buffer);
                }
            }
            Ok(None) => {
                // Input drained between the readiness check and the pull.
            }
            Err(e) => {
                self.fatal_error(e);
            }
        }
    }

    /// Switch the feed's byte source to the staged next decoder.
    fn begin_crossfade(&mut self) {
        let Some(next) = self.next.as_mut() else { return };
        match next.start() {
            Ok(()) => {
                info!("crossfade point reached, feeding next track");
                self.feeding_next = true;
            }
            Err(e) => {
                warn!("staged next failed to start: {e}");
                if let Some(mut bad) = self.next.take() {
                    bad.release();
                }
            }
        }
    }

    /// Completion, handoff, and underrun detection once the device has
    /// caught up with everything written from the current track.
    fn check_handoff_or_underrun(&mut self) {
        if !self.clock.caught_up() {
            return;
        }
        let Some(current) = self.current.as_ref() else { return };
        let track_id = current.id();
        let current_eos = current.end_of_stream();

        if current_eos && self.pending.is_none() {
            let generation = self.shared.generation.load(Ordering::Acquire);
            self.events.emit_lossy(PlayerEvent::Completion {
                track_id,
                generation,
                timestamp: chrono::Utc::now(),
            });

            if self.feeding_next && self.next.is_some() {
                // Natural gapless handoff: carry the counters forward
                // exactly and promote without touching the sink.
                self.clock.handoff();
                self.position_base = 0;
                if let Some(mut old) = self.current.take() {
                    old.release();
                }
                let mut promoted = self.next.take().unwrap();
                let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
                promoted.set_generation(generation);
                self.current = Some(promoted);
                self.feeding_next = false;
                info!("gapless handoff complete");
            } else {
                info!("track complete, engine idle");
                self.release_playback();
                self.set_state(PlaybackState::Idle);
            }
        } else if !current_eos && self.pending.is_none() {
            // Underrun: the decoder fell behind the device. Buffering blip,
            // never fatal; give it the grace period and keep polling.
            match self.buffering_since {
                None => {
                    self.buffering_since = Some(Instant::now());
                    self.grace_logged = false;
                    self.emit_buffering(true);
                }
                Some(since) => {
                    if since.elapsed() > self.tuning.underrun_grace && !self.grace_logged {
                        warn!(
                            "underrun persisting past {:?} grace period",
                            self.tuning.underrun_grace
                        );
                        self.grace_logged = true;
                    }
                }
            }
        }
    }

    /// One automatic revive after the output subsystem dies; a second death
    /// in the same session is surfaced to the caller.
    fn handle_sink_death(&mut self) {
        if self.revived {
            self.fatal_error(PlayerError::ServerDied(
                "audio output died again after revive".into(),
            ));
            return;
        }
        self.revived = true;
        warn!("audio output died, attempting one revive");

        let rate = match self.current.as_ref().and_then(|c| c.sample_rate()) {
            Some(rate) => rate,
            None => {
                self.fatal_error(PlayerError::ServerDied("output died with no track".into()));
                return;
            }
        };

        self.sink = None;
        match (self.sink_factory)(rate) {
            Ok(sink) => {
                // Frames queued in the dead sink are gone; settle the ledger
                // so completion logic keys off the new sink's head.
                self.clock.on_sink_rebuilt();
                self.sink = Some(sink);
                info!("audio output revived at {rate} Hz");
            }
            Err(e) => {
                self.fatal_error(PlayerError::ServerDied(format!("revive failed: {e}")));
            }
        }
    }

    /// Fatal errors tear down all playback state and surface exactly one
    /// error event; the caller decides whether to retry.
    fn fatal_error(&mut self, e: PlayerError) {
        error!("fatal playback error: {e}");
        let track_id = self.current.as_ref().map(|c| c.id());
        self.events.emit_lossy(PlayerEvent::Error {
            track_id,
            kind: (&e).into(),
            message: e.to_string(),
            generation: self.shared.generation.load(Ordering::Acquire),
            timestamp: chrono::Utc::now(),
        });
        self.release_playback();
        self.set_state(PlaybackState::Idle);
    }

    fn ensure_sink(&mut self, rate: u32) -> Result<()> {
        let rebuild = match self.sink.as_ref() {
            Some(sink) => sink.sample_rate() != rate || !sink.healthy(),
            None => true,
        };
        if rebuild {
            self.sink = None;
            self.sink = Some((self.sink_factory)(rate)?);
            self.clock.on_sink_rebuilt();
            debug!("sink opened at {rate} Hz");
        } else if let Some(sink) = self.sink.as_mut() {
            sink.flush();
            sink.resume()?;
        }
        Ok(())
    }

    /// Block (bounded) for a decoder whose async prepare is still running.
    fn wait_prepared(&mut self, decoder: &mut TrackDecoder) -> Result<()> {
        let deadline = Instant::now() + PREPARE_WAIT;
        loop {
            match decoder.state() {
                DecoderState::Prepared => return Ok(()),
                DecoderState::Preparing => {
                    if decoder.poll_prepare()? {
                        return Ok(());
                    }
                    if Instant::now() >= deadline {
                        return Err(PlayerError::Timeout("prepare did not finish".into()));
                    }
                    thread::sleep(self.tuning.feed_poll);
                }
                other => {
                    return Err(PlayerError::InvalidState(format!(
                        "play requires a prepared decoder, got {other:?}"
                    )));
                }
            }
        }
    }

    fn drop_pending(&mut self) {
        if let Some(buffer) = self.pending.take() {
            let storage = buffer.into_storage();
            let owner = if self.feeding_next {
                self.next.as_mut()
            } else {
                self.current.as_mut()
            };
            if let Some(owner) = owner {
                owner.recycle(storage);
            }
        }
    }

    fn recycle_pending(&mut self) {
        self.drop_pending();
    }

    fn release_playback(&mut self) {
        self.drop_pending();
        if let Some(sink) = &mut self.sink {
            sink.flush();
        }
        if let Some(mut current) = self.current.take() {
            current.release();
        }
        if let Some(mut next) = self.next.take() {
            next.release();
        }
        self.feeding_next = false;
        self.playing = false;
        self.buffering_since = None;
        self.revived = false;
        self.position_base = 0;
        self.shared.position_ms.store(0, Ordering::Release);
        self.clock.reset();
    }

    fn set_state(&self, state: PlaybackState) {
        self.shared.set_state(state);
        self.events.emit_lossy(PlayerEvent::StateChanged {
            state,
            generation: self.shared.generation.load(Ordering::Acquire),
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit_buffering(&self, start: bool) {
        let Some(current) = self.current.as_ref() else { return };
        let generation = self.shared.generation.load(Ordering::Acquire);
        let timestamp = chrono::Utc::now();
        let event = if start {
            PlayerEvent::BufferingStart {
                track_id: current.id(),
                generation,
                timestamp,
            }
        } else {
            PlayerEvent::BufferingEnd {
                track_id: current.id(),
                generation,
                timestamp,
            }
        };
        self.events.emit_lossy(event);
    }

    fn emit_progress(&mut self) {
        if self.last_progress.elapsed() < self.tuning.progress_interval {
            return;
        }
        self.last_progress = Instant::now();
        let Some(current) = self.current.as_ref() else { return };
        let Some(rate) = current.sample_rate() else { return };

        let position = self.position_base + self.clock.frames_played();
        let position_ms = frames_to_ms(position, rate);
        self.shared.position_ms.store(position_ms, Ordering::Release);
        self.events.emit_lossy(PlayerEvent::Progress {
            track_id: current.id(),
            position_ms,
            duration_ms: current.total_frames().map(|f| frames_to_ms(f, rate)),
            generation: self.shared.generation.load(Ordering::Acquire),
            timestamp: chrono::Utc::now(),
        });
    }

    /// Engine-thread teardown: decoders and sink are released here, never
    /// on a caller's thread.
    fn teardown(&mut self) {
        self.release_playback();
        self.sink = None;
        self.shared.alive.store(false, Ordering::Release);
        self.shared.set_state(PlaybackState::Idle);
    }
}
