//! Byte ring buffer between the network receiver and the stream decoder
//!
//! A fixed-capacity ring shared by exactly two parties: the receiver thread
//! stages and commits compressed bytes, the decode side peeks and commits
//! reads. Both sides block with bounded waits and re-check liveness on every
//! wakeup, so `release()` always unsticks them.
//!
//! Release is end-of-stream, not an error: after release the writer is
//! refused, but readers may drain whatever was already committed before the
//! sentinel (`None`) is returned.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Bounded wait per wakeup so blocked parties notice release promptly
const WAIT_SLICE: Duration = Duration::from_millis(100);

struct RingState {
    buf: Box<[u8]>,
    /// Next byte to hand to readers
    read_pos: usize,
    /// Next free byte for writers
    write_pos: usize,
    /// Committed, unread bytes
    filled: usize,
    /// Set once; no further writes, readers drain and then get the sentinel
    released: bool,
    /// Total bytes ever committed, for prebuffer thresholds
    total_written: u64,
}

pub struct StreamRingBuffer {
    state: Mutex<RingState>,
    readable: Condvar,
    writable: Condvar,
}

impl StreamRingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                read_pos: 0,
                write_pos: 0,
                filled: 0,
                released: false,
                total_written: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().buf.len()
    }

    /// Committed bytes currently available to readers.
    pub fn available(&self) -> usize {
        self.state.lock().unwrap().filled
    }

    /// Total bytes committed since creation.
    pub fn total_written(&self) -> u64 {
        self.state.lock().unwrap().total_written
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().unwrap().released
    }

    /// Mark end-of-stream and wake everyone blocked on either side.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.released = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Block until at least `n` bytes are readable, or the ring is released.
    ///
    /// Returns the contiguous readable span starting at the read position,
    /// which may be shorter than `n` at the wrap boundary. After release,
    /// remaining committed bytes are still handed out; only a released and
    /// drained ring returns `None`.
    pub fn wait_until_can_read(&self, n: usize) -> Option<usize> {
        let mut state = self.state.lock().unwrap();
        let want = n.min(state.buf.len()).max(1);
        loop {
            if state.filled >= want {
                return Some(state.filled.min(state.buf.len() - state.read_pos));
            }
            if state.released {
                if state.filled > 0 {
                    return Some(state.filled.min(state.buf.len() - state.read_pos));
                }
                return None;
            }
            state = self.readable.wait_timeout(state, WAIT_SLICE).unwrap().0;
        }
    }

    /// Copy committed bytes into `dst` without consuming them.
    ///
    /// `offset` is relative to the read position. Returns bytes copied, which
    /// is less than `dst.len()` when fewer bytes are committed. Handles the
    /// wrap boundary internally.
    pub fn peek(&self, offset: usize, dst: &mut [u8]) -> usize {
        let state = self.state.lock().unwrap();
        if offset >= state.filled {
            return 0;
        }
        let n = dst.len().min(state.filled - offset);
        let cap = state.buf.len();
        for (i, byte) in dst[..n].iter_mut().enumerate() {
            *byte = state.buf[(state.read_pos + offset + i) % cap];
        }
        n
    }

    /// Consume `n` previously peeked bytes and wake a blocked writer.
    pub fn commit_read(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        let n = n.min(state.filled);
        state.read_pos = (state.read_pos + n) % state.buf.len();
        state.filled -= n;
        self.writable.notify_all();
    }

    /// Block until at least `n` bytes of space are free, or the ring is
    /// released (writes after release are refused with `None`).
    pub fn wait_until_can_write(&self, n: usize) -> Option<usize> {
        let mut state = self.state.lock().unwrap();
        let want = n.min(state.buf.len()).max(1);
        loop {
            if state.released {
                return None;
            }
            let free = state.buf.len() - state.filled;
            if free >= want {
                return Some(free.min(state.buf.len() - state.write_pos));
            }
            state = self.writable.wait_timeout(state, WAIT_SLICE).unwrap().0;
        }
    }

    /// Stage bytes after the write position without publishing them.
    ///
    /// Returns bytes staged (bounded by free space). Staged bytes become
    /// visible to readers only on `commit_written`.
    pub fn write(&self, src: &[u8]) -> usize {
        let mut state = self.state.lock().unwrap();
        if state.released {
            return 0;
        }
        let free = state.buf.len() - state.filled;
        let n = src.len().min(free);
        let cap = state.buf.len();
        let start = state.write_pos;
        for (i, &byte) in src[..n].iter().enumerate() {
            state.buf[(start + i) % cap] = byte;
        }
        n
    }

    /// Publish `n` previously staged bytes and wake a blocked reader.
    pub fn commit_written(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        let free = state.buf.len() - state.filled;
        let n = n.min(free);
        state.write_pos = (state.write_pos + n) % state.buf.len();
        state.filled += n;
        state.total_written += n as u64;
        self.readable.notify_all();
    }

    /// Convenience: stage and commit as much of `src` as fits right now.
    pub fn push(&self, src: &[u8]) -> usize {
        let n = self.write(src);
        if n > 0 {
            self.commit_written(n);
        }
        n
    }

    /// Convenience: copy up to `dst.len()` committed bytes out and consume
    /// them. Non-blocking.
    pub fn pop(&self, dst: &mut [u8]) -> usize {
        let n = self.peek(0, dst);
        if n > 0 {
            self.commit_read(n);
        }
        n
    }
}
