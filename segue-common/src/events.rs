//! Event system for the segue playback engine
//!
//! The engine delivers all completion/error/progress notifications
//! asynchronously over an [`EventBus`] (tokio broadcast). Callers subscribe
//! and react; the engine never blocks on a slow subscriber.
//!
//! # Generations
//!
//! Every event carries the engine **generation** that produced it. The
//! generation is bumped whenever playback is (re)started or reset, so a
//! callback that arrives after the engine has moved on can be recognized as
//! stale and dropped instead of acting on dead state. Use
//! [`PlayerEvent::generation`] against the engine's current generation.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Playback state visible to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// Events emitted by the playback engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Current track played to its natural end (exactly one per track)
    Completion {
        track_id: Uuid,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A fatal error tore down playback for this track
    Error {
        track_id: Option<Uuid>,
        kind: ErrorKind,
        message: String,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A requested seek finished; position is the located frame-accurate time
    SeekComplete {
        track_id: Uuid,
        position_ms: u64,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The feed loop ran dry while the decoder still has data to produce
    BufferingStart {
        track_id: Uuid,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Decoded data is flowing again after an underrun
    BufferingEnd {
        track_id: Uuid,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Track properties became known (after prepare)
    MetadataUpdate {
        track_id: Uuid,
        sample_rate: u32,
        channels: u16,
        duration_ms: Option<u64>,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A network source resolved to a different final URL
    UrlUpdated {
        track_id: Uuid,
        url: String,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Engine playback state changed
    StateChanged {
        state: PlaybackState,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic position update while playing
    Progress {
        track_id: Uuid,
        position_ms: u64,
        duration_ms: Option<u64>,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// Engine generation this event belongs to.
    ///
    /// Compare against the engine's current generation to drop stale
    /// callbacks delivered after a reset or track change.
    pub fn generation(&self) -> u64 {
        match self {
            PlayerEvent::Completion { generation, .. }
            | PlayerEvent::Error { generation, .. }
            | PlayerEvent::SeekComplete { generation, .. }
            | PlayerEvent::BufferingStart { generation, .. }
            | PlayerEvent::BufferingEnd { generation, .. }
            | PlayerEvent::MetadataUpdate { generation, .. }
            | PlayerEvent::UrlUpdated { generation, .. }
            | PlayerEvent::StateChanged { generation, .. }
            | PlayerEvent::Progress { generation, .. } => *generation,
        }
    }
}

/// One-to-many event broadcaster.
///
/// Thin wrapper over `tokio::sync::broadcast` so the engine can emit from
/// blocking threads (`broadcast::Sender::send` is synchronous) while callers
/// consume from async or blocking contexts.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns the subscriber count, or `Err` if nobody is listening.
    pub fn emit(&self, event: PlayerEvent) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit without caring whether anyone is listening.
    ///
    /// Used for periodic progress events where a missing subscriber is
    /// normal, not an error.
    pub fn emit_lossy(&self, event: PlayerEvent) {
        if self.tx.send(event).is_err() {
            trace!("event dropped: no subscribers");
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(generation: u64) -> PlayerEvent {
        PlayerEvent::Completion {
            track_id: Uuid::new_v4(),
            generation,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(64);
        assert_eq!(bus.capacity(), 64);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(8);
        assert!(bus.emit(completion(1)).is_err());
        // emit_lossy must not panic
        bus.emit_lossy(completion(1));
    }

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(completion(7)).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.generation(), 7);
        assert!(matches!(event, PlayerEvent::Completion { .. }));
    }

    #[test]
    fn test_generation_accessor_covers_all_variants() {
        let ts = chrono::Utc::now();
        let id = Uuid::new_v4();
        let events = vec![
            PlayerEvent::Error {
                track_id: Some(id),
                kind: ErrorKind::Unknown,
                message: "m".into(),
                generation: 3,
                timestamp: ts,
            },
            PlayerEvent::SeekComplete {
                track_id: id,
                position_ms: 10,
                generation: 3,
                timestamp: ts,
            },
            PlayerEvent::BufferingStart {
                track_id: id,
                generation: 3,
                timestamp: ts,
            },
            PlayerEvent::StateChanged {
                state: PlaybackState::Playing,
                generation: 3,
                timestamp: ts,
            },
        ];
        for event in events {
            assert_eq!(event.generation(), 3);
        }
    }
}
