//! Network stream decode backend

use crate::decode::backend::{BackendRead, DecodeBackend, SymphoniaCore};
use crate::stream::{RingByteSource, StreamRingBuffer};
use segue_common::{PlayerError, Result};
use std::sync::Arc;
use tracing::debug;

/// Ring-buffer-fed decode path for live streams.
///
/// Unseekable and of unknown length. Reports "not ready" instead of pulling
/// a packet when the ring holds less than a framing threshold, so the engine
/// thread never parks inside the demuxer waiting for the network.
pub struct StreamBackend {
    core: SymphoniaCore,
    ring: Arc<StreamRingBuffer>,
    min_framing_bytes: usize,
}

impl StreamBackend {
    /// Probe stream headers from the (already prebuffered) ring.
    ///
    /// The caller is responsible for waiting out the prebuffer threshold
    /// first; probing a near-empty ring would block header parsing on the
    /// network.
    pub fn probe(
        ring: Arc<StreamRingBuffer>,
        url: &str,
        min_framing_bytes: usize,
    ) -> Result<Self> {
        let extension = url.rsplit('.').next().filter(|e| e.len() <= 4);
        let source = RingByteSource::new(Arc::clone(&ring));
        let core = SymphoniaCore::probe(Box::new(source), extension, url)?;
        debug!("stream {url} probed at {} Hz", core.sample_rate());
        Ok(Self {
            core,
            ring,
            min_framing_bytes,
        })
    }
}

impl DecodeBackend for StreamBackend {
    fn sample_rate(&self) -> u32 {
        self.core.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.core.channels()
    }

    fn total_frames(&self) -> Option<u64> {
        None
    }

    fn position_frames(&self) -> u64 {
        self.core.position_frames()
    }

    fn input_ready(&self) -> bool {
        // A released ring is drained to EOF regardless of fill level.
        self.ring.available() >= self.min_framing_bytes || self.ring.is_released()
    }

    fn next_output(&mut self, storage: Vec<i16>) -> Result<BackendRead> {
        if !self.input_ready() {
            return Ok(BackendRead::NotReady(storage));
        }
        self.core.decode_next(storage)
    }

    fn seek(&mut self, _ms: u64) -> Result<u64> {
        Err(PlayerError::InvalidState(
            "cannot seek a network stream".into(),
        ))
    }

    fn flush(&mut self) {
        self.core.flush();
    }
}
