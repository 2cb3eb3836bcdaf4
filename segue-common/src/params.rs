//! Tuning parameters for the playback engine
//!
//! Every empirically-derived delay and threshold lives here instead of being
//! scattered through the code as magic numbers. The defaults are code
//! constants; deployments override them from the `[tuning]` section of the
//! TOML config. In particular the settle delays exist because some decoder
//! backends stall when flushed mid-packet; re-validate them when changing
//! audio backends rather than treating them as load-bearing logic.

use serde::Deserialize;
use std::time::Duration;

/// Default settle delay before flushing a decoder for a seek (ms)
const DEFAULT_SEEK_SETTLE_MS: u64 = 60;

/// Default settle delay before discarding queued sink audio (ms)
const DEFAULT_FLUSH_SETTLE_MS: u64 = 20;

/// Default grace period before an underrun is escalated (ms)
const DEFAULT_UNDERRUN_GRACE_MS: u64 = 500;

/// Default low-water mark as a fraction of the sink buffer
const DEFAULT_SINK_LOW_WATER: f32 = 0.25;

/// Default feed-loop poll interval while the sink is full or idle (ms)
const DEFAULT_FEED_POLL_MS: u64 = 10;

/// Default caller-side action acknowledge timeout (seconds).
/// Minutes-order on purpose: a wedged native layer should fail the caller
/// visibly instead of hanging it forever.
const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 120;

/// Default bytes buffered before probing stream headers
const DEFAULT_STREAM_PREBUFFER_BYTES: usize = 64 * 1024;

/// Default minimum buffered bytes before the stream backend pulls a packet
const DEFAULT_STREAM_MIN_FRAMING_BYTES: usize = 8 * 1024;

/// Default network stream ring buffer capacity
const DEFAULT_STREAM_RING_BYTES: usize = 256 * 1024;

/// Default progress event interval (ms)
const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;

/// Runtime tuning knobs, resolved from defaults + TOML overrides.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Settle delay applied before decoder flush in the seek path
    pub seek_settle: Duration,

    /// Settle delay applied before the sink flush that precedes a seek
    pub flush_settle: Duration,

    /// How long the feed loop waits for more decoded data before an
    /// underrun is reported as an error rather than a buffering blip
    pub underrun_grace: Duration,

    /// Fraction of the sink buffer below which writes are deferred
    pub sink_low_water: f32,

    /// Bounded sleep between feed-loop polls
    pub feed_poll: Duration,

    /// How long a caller waits for action acknowledgement
    pub action_timeout: Duration,

    /// Bytes that must arrive before stream headers are probed
    pub stream_prebuffer_bytes: usize,

    /// Minimum ring fill before the stream backend attempts a packet read
    pub stream_min_framing_bytes: usize,

    /// Network stream ring buffer capacity in bytes
    pub stream_ring_bytes: usize,

    /// Interval between progress events while playing
    pub progress_interval: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            seek_settle: Duration::from_millis(DEFAULT_SEEK_SETTLE_MS),
            flush_settle: Duration::from_millis(DEFAULT_FLUSH_SETTLE_MS),
            underrun_grace: Duration::from_millis(DEFAULT_UNDERRUN_GRACE_MS),
            sink_low_water: DEFAULT_SINK_LOW_WATER,
            feed_poll: Duration::from_millis(DEFAULT_FEED_POLL_MS),
            action_timeout: Duration::from_secs(DEFAULT_ACTION_TIMEOUT_SECS),
            stream_prebuffer_bytes: DEFAULT_STREAM_PREBUFFER_BYTES,
            stream_min_framing_bytes: DEFAULT_STREAM_MIN_FRAMING_BYTES,
            stream_ring_bytes: DEFAULT_STREAM_RING_BYTES,
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
        }
    }
}

/// Partial overrides as they appear in the TOML `[tuning]` section.
///
/// Absent keys keep their built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TuningOverrides {
    pub seek_settle_ms: Option<u64>,
    pub flush_settle_ms: Option<u64>,
    pub underrun_grace_ms: Option<u64>,
    pub sink_low_water: Option<f32>,
    pub feed_poll_ms: Option<u64>,
    pub action_timeout_secs: Option<u64>,
    pub stream_prebuffer_bytes: Option<usize>,
    pub stream_min_framing_bytes: Option<usize>,
    pub stream_ring_bytes: Option<usize>,
    pub progress_interval_ms: Option<u64>,
}

impl Tuning {
    /// Resolve defaults + overrides into a concrete tuning block.
    pub fn resolve(overrides: &TuningOverrides) -> Self {
        let mut tuning = Tuning::default();
        if let Some(ms) = overrides.seek_settle_ms {
            tuning.seek_settle = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.flush_settle_ms {
            tuning.flush_settle = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.underrun_grace_ms {
            tuning.underrun_grace = Duration::from_millis(ms);
        }
        if let Some(frac) = overrides.sink_low_water {
            tuning.sink_low_water = frac.clamp(0.0, 0.9);
        }
        if let Some(ms) = overrides.feed_poll_ms {
            tuning.feed_poll = Duration::from_millis(ms.max(1));
        }
        if let Some(secs) = overrides.action_timeout_secs {
            tuning.action_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(bytes) = overrides.stream_prebuffer_bytes {
            tuning.stream_prebuffer_bytes = bytes;
        }
        if let Some(bytes) = overrides.stream_min_framing_bytes {
            tuning.stream_min_framing_bytes = bytes;
        }
        if let Some(bytes) = overrides.stream_ring_bytes {
            tuning.stream_ring_bytes = bytes;
        }
        if let Some(ms) = overrides.progress_interval_ms {
            tuning.progress_interval = Duration::from_millis(ms.max(100));
        }
        tuning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let tuning = Tuning::default();
        assert_eq!(tuning.seek_settle, Duration::from_millis(60));
        assert_eq!(tuning.action_timeout, Duration::from_secs(120));
        assert!(tuning.sink_low_water > 0.0 && tuning.sink_low_water < 1.0);
    }

    #[test]
    fn test_resolve_overrides() {
        let overrides = TuningOverrides {
            seek_settle_ms: Some(10),
            sink_low_water: Some(2.0), // clamped
            action_timeout_secs: Some(0), // floored to 1
            ..Default::default()
        };
        let tuning = Tuning::resolve(&overrides);
        assert_eq!(tuning.seek_settle, Duration::from_millis(10));
        assert_eq!(tuning.sink_low_water, 0.9);
        assert_eq!(tuning.action_timeout, Duration::from_secs(1));
        // untouched fields keep defaults
        assert_eq!(tuning.underrun_grace, Duration::from_millis(500));
    }
}
