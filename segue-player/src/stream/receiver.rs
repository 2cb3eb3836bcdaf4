//! Network stream receiver
//!
//! Pumps bytes from an HTTP(S) body into the shared [`StreamRingBuffer`] on
//! a dedicated thread. The receiver owns the connection; framing and
//! metadata interpretation belong to the decode side. On any terminal
//! condition (server EOF, transport error, local shutdown) the ring is
//! released so blocked readers wind down instead of hanging.

use crate::stream::ring_buffer::StreamRingBuffer;
use segue_common::{PlayerError, Result};
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Transfer chunk size from the socket into the ring
const RECV_CHUNK: usize = 16 * 1024;

/// Poll interval while waiting for prebuffer fill
const PREBUFFER_POLL: Duration = Duration::from_millis(10);

pub struct NetworkStreamReceiver {
    ring: Arc<StreamRingBuffer>,
    error: Arc<Mutex<Option<PlayerError>>>,
    /// Set when redirects land the stream at a different final URL
    final_url: Arc<Mutex<Option<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl NetworkStreamReceiver {
    /// Connect to `url` and start pumping its body into `ring`.
    ///
    /// Connection establishment happens on the receiver thread, so this
    /// returns immediately; failures surface through `take_error` and the
    /// released ring.
    pub fn spawn(url: String, ring: Arc<StreamRingBuffer>) -> Self {
        let error = Arc::new(Mutex::new(None));
        let final_url = Arc::new(Mutex::new(None));
        let thread_ring = Arc::clone(&ring);
        let thread_error = Arc::clone(&error);
        let thread_final_url = Arc::clone(&final_url);

        let handle = thread::Builder::new()
            .name("stream-recv".into())
            .spawn(move || {
                if let Err(e) = pump(&url, &thread_ring, &thread_final_url) {
                    warn!("stream receiver for {url} stopped: {e}");
                    *thread_error.lock().unwrap() = Some(e);
                }
                thread_ring.release();
            })
            .expect("failed to spawn stream receiver thread");

        Self {
            ring,
            error,
            final_url,
            handle: Some(handle),
        }
    }

    /// Block until at least `bytes` have arrived, the stream ends, or
    /// `timeout` elapses.
    ///
    /// A stream shorter than the prebuffer target is fine as long as it
    /// carried any data at all; a stream that dies before delivering a
    /// single byte surfaces the receiver's error.
    pub fn wait_for_prebuffer(&self, bytes: usize, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let written = self.ring.total_written();
            if written >= bytes as u64 {
                return Ok(());
            }
            if self.ring.is_released() {
                if written > 0 {
                    debug!("stream ended during prebuffer with {written} bytes");
                    return Ok(());
                }
                return Err(self.take_error().unwrap_or_else(|| {
                    PlayerError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "stream ended before any data arrived",
                    ))
                }));
            }
            if Instant::now() >= deadline {
                return Err(PlayerError::Timeout(format!(
                    "stream prebuffer ({bytes} bytes) not reached, got {written}"
                )));
            }
            thread::sleep(PREBUFFER_POLL);
        }
    }

    /// Take the receiver's terminal error, if any.
    pub fn take_error(&self) -> Option<PlayerError> {
        self.error.lock().unwrap().take()
    }

    /// Final URL after redirects, when it differs from the requested one.
    pub fn final_url(&self) -> Option<String> {
        self.final_url.lock().unwrap().clone()
    }

    /// Release the ring and join the receiver thread.
    pub fn shutdown(&mut self) {
        self.ring.release();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NetworkStreamReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receiver thread body: connect, then copy until EOF or release.
fn pump(url: &str, ring: &StreamRingBuffer, final_url: &Mutex<Option<String>>) -> Result<()> {
    let response = reqwest::blocking::get(url)
        .map_err(|e| PlayerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    if response.url().as_str() != url {
        debug!("stream {url} redirected to {}", response.url());
        *final_url.lock().unwrap() = Some(response.url().to_string());
    }

    if !response.status().is_success() {
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PlayerError::NotFound(url.to_string()));
        }
        return Err(PlayerError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("stream server returned {}", response.status()),
        )));
    }

    info!("stream connected: {url}");
    let mut body = response;
    let mut chunk = vec![0u8; RECV_CHUNK];

    loop {
        let n = body
            .read(&mut chunk)
            .map_err(|e| PlayerError::from_io("stream read", e))?;
        if n == 0 {
            debug!("stream {url} reached end");
            return Ok(());
        }

        let mut off = 0;
        while off < n {
            // Blocks while the decoder is behind; release unsticks us.
            if ring.wait_until_can_write(1).is_none() {
                debug!("ring released, receiver for {url} stopping");
                return Ok(());
            }
            off += ring.push(&chunk[off..n]);
        }
    }
}
