//! Core audio data types
//!
//! The engine's wire format toward the sink is fixed: interleaved 16-bit
//! stereo frames. One *frame* is one left/right sample pair.

/// One decoded chunk handed from a track decoder to the feed loop.
///
/// The buffer is consumed incrementally as the sink accepts partial writes:
/// `remaining()` decreases monotonically to zero, after which the buffer is
/// released back to the decoder and its allocation recycled.
#[derive(Debug)]
pub struct OutputBuffer {
    /// Sequence number of this buffer within its decoder (diagnostics)
    pub index: u64,

    /// True if this is the final chunk of the track's stream.
    /// An end-of-stream buffer may be empty.
    pub end_of_stream: bool,

    /// Interleaved i16 stereo samples
    samples: Vec<i16>,

    /// Samples already consumed from the front
    offset: usize,
}

impl OutputBuffer {
    pub fn new(index: u64, samples: Vec<i16>, end_of_stream: bool) -> Self {
        debug_assert_eq!(samples.len() % 2, 0, "samples must be stereo pairs");
        Self {
            index,
            end_of_stream,
            samples,
            offset: 0,
        }
    }

    /// Empty end-of-stream marker (no audio left to deliver).
    pub fn end_marker(index: u64, recycled: Vec<i16>) -> Self {
        let mut samples = recycled;
        samples.clear();
        Self {
            index,
            end_of_stream: true,
            samples,
            offset: 0,
        }
    }

    /// Unconsumed samples remaining in this buffer.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.offset
    }

    /// View of the unconsumed samples.
    pub fn as_slice(&self) -> &[i16] {
        &self.samples[self.offset..]
    }

    /// Record that the sink accepted `n` samples from the front.
    ///
    /// `n` must not exceed `remaining()`; the remaining count only ever
    /// decreases.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining(), "advance past end of buffer");
        self.offset += n.min(self.remaining());
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.samples.len()
    }

    /// Reclaim the backing storage for reuse by the decoder.
    pub fn into_storage(self) -> Vec<i16> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_buffer_partial_consumption() {
        let mut buf = OutputBuffer::new(0, vec![1, 2, 3, 4, 5, 6], false);
        assert_eq!(buf.remaining(), 6);
        assert!(!buf.is_exhausted());

        buf.advance(2);
        assert_eq!(buf.remaining(), 4);
        assert_eq!(buf.as_slice(), &[3, 4, 5, 6]);

        buf.advance(4);
        assert_eq!(buf.remaining(), 0);
        assert!(buf.is_exhausted());
    }

    #[test]
    fn test_remaining_monotonic() {
        let mut buf = OutputBuffer::new(3, vec![0; 8], false);
        let mut last = buf.remaining();
        for _ in 0..4 {
            buf.advance(2);
            assert!(buf.remaining() <= last);
            last = buf.remaining();
        }
        assert!(buf.is_exhausted());
    }

    #[test]
    fn test_end_marker_is_empty_and_eos() {
        let buf = OutputBuffer::end_marker(9, vec![1, 2, 3, 4]);
        assert!(buf.end_of_stream);
        assert_eq!(buf.remaining(), 0);
        assert!(buf.is_exhausted());
    }

    #[test]
    fn test_storage_recycling() {
        let buf = OutputBuffer::new(0, Vec::with_capacity(1024), false);
        let storage = buf.into_storage();
        assert!(storage.capacity() >= 1024);
    }
}
