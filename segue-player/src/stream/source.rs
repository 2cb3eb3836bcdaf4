//! symphonia media source over the stream ring buffer
//!
//! Adapts the byte ring to `symphonia`'s `MediaSource` so the stream decode
//! path goes through the same probe/demux machinery as local files. The
//! source is unseekable with unknown length, which symphonia's demuxers
//! handle by parsing forward only.

use crate::stream::ring_buffer::StreamRingBuffer;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use symphonia::core::io::MediaSource;

pub struct RingByteSource {
    ring: Arc<StreamRingBuffer>,
    /// Bytes handed out so far, reported for `SeekFrom::Current(0)` queries
    position: u64,
}

impl RingByteSource {
    pub fn new(ring: Arc<StreamRingBuffer>) -> Self {
        Self { ring, position: 0 }
    }
}

impl Read for RingByteSource {
    /// Blocks until bytes are committed or the ring is released.
    /// A released and drained ring reads as clean EOF.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.ring.wait_until_can_read(1) {
            Some(_) => {
                let n = self.ring.pop(buf);
                self.position += n as u64;
                Ok(n)
            }
            None => Ok(0),
        }
    }
}

impl Seek for RingByteSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        // Demuxers probe their position this way; everything else is refused.
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "network streams are not seekable",
            )),
        }
    }
}

impl MediaSource for RingByteSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
