//! Cross-thread action protocol
//!
//! Callers drive the engine thread through a rendezvous channel: a
//! zero-capacity send hands the request directly to the engine, so at most
//! one action is ever outstanding and a second caller blocks until the
//! previous action has been picked up. Each request carries its own one-shot
//! reply channel; the caller waits on it with a bounded timeout measured in
//! minutes, so a wedged audio layer fails the caller visibly instead of
//! hanging it forever.

use crate::decode::TrackDecoder;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use segue_common::{PlayerError, Result};
use std::time::Duration;
use uuid::Uuid;

/// Commands applied atomically by the engine thread.
pub enum Action {
    /// Adopt a prepared decoder as current and start playing
    Play { decoder: Box<TrackDecoder> },
    /// Promote the staged next decoder now (user skip, not natural end)
    PlayNext { track_id: Uuid },
    Pause,
    Resume,
    Seek { ms: u64 },
    /// Stage (or clear) the gapless follow-up track
    SetNext { next: Option<Box<TrackDecoder>> },
    /// Stop playback and release all decoders
    Reset,
    /// Terminate the engine thread
    Shutdown,
}

impl Action {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Play { .. } => "play",
            Action::PlayNext { .. } => "play_next",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Seek { .. } => "seek",
            Action::SetNext { .. } => "set_next",
            Action::Reset => "reset",
            Action::Shutdown => "shutdown",
        }
    }
}

/// One in-flight request: the action plus its reply slot.
pub struct ActionRequest {
    pub action: Action,
    pub reply: Sender<Result<()>>,
}

impl ActionRequest {
    /// Acknowledge the caller. A vanished caller (timed out and gone) is
    /// not the engine's problem.
    pub fn finish(self, result: Result<()>) {
        let _ = self.reply.send(result);
    }
}

/// Caller-side handle to the engine's action channel.
#[derive(Clone)]
pub struct ActionPort {
    tx: Sender<ActionRequest>,
    timeout: Duration,
}

impl ActionPort {
    /// Create a port and the engine-side receiver.
    pub fn new(timeout: Duration) -> (Self, Receiver<ActionRequest>) {
        let (tx, rx) = bounded(0);
        (Self { tx, timeout }, rx)
    }

    /// Submit one action and block until the engine has applied it.
    ///
    /// Errors: `Timeout` if the engine does not pick up or acknowledge the
    /// action in time, `ServerDied` if the engine thread is gone, otherwise
    /// whatever the action itself produced.
    pub fn submit(&self, action: Action) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        let name = action.name();
        let request = ActionRequest {
            action,
            reply: reply_tx,
        };

        match self.tx.send_timeout(request, self.timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                return Err(PlayerError::Timeout(format!(
                    "engine did not accept '{name}' within {:?}",
                    self.timeout
                )));
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(PlayerError::ServerDied(
                    "engine thread is not running".into(),
                ));
            }
        }

        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(_) => Err(PlayerError::Timeout(format!(
                "engine did not acknowledge '{name}' within {:?}",
                self.timeout
            ))),
        }
    }
}
