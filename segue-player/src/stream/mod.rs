//! Network streaming: byte ring buffer, HTTP receiver, and the symphonia
//! source adapter that ties them into the decode path.

pub mod receiver;
pub mod ring_buffer;
pub mod source;

pub use receiver::NetworkStreamReceiver;
pub use ring_buffer::StreamRingBuffer;
pub use source::RingByteSource;

/// URL schemes routed to the streaming path instead of local decode.
pub fn is_network_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_url_detection() {
        assert!(is_network_url("http://example.com/radio.mp3"));
        assert!(is_network_url("https://example.com/radio.aac"));
        assert!(!is_network_url("/music/track.flac"));
        assert!(!is_network_url("file:///music/track.flac"));
        assert!(!is_network_url("httpx://nope"));
    }
}
