//! Error types for the segue playback engine
//!
//! Defines the error taxonomy surfaced to callers using thiserror.
//! Every error that reaches a caller (either inline from `prepare`/`attach`
//! or asynchronously through an [`crate::events::PlayerEvent::Error`] event)
//! maps onto one of these variants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the playback engine
#[derive(Error, Debug)]
pub enum PlayerError {
    /// Local file missing, unreadable, or empty
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unsupported channel layout, sample rate, or container/codec
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// File or stream I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Action protocol timeout (engine thread did not acknowledge in time)
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The underlying output or decoder subsystem died
    #[error("Audio subsystem died: {0}")]
    ServerDied(String),

    /// Buffer allocation beyond configured limits
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Source is not readable by this process
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation not legal in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything that does not fit the taxonomy
    #[error("Internal error: {0}")]
    Unknown(String),
}

/// Convenience Result type using PlayerError
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Flat error classification carried inside error events.
///
/// `PlayerError` itself is not `Clone` (it wraps `std::io::Error`), so events
/// carry this copyable kind plus the rendered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    UnsupportedFormat,
    Io,
    Timeout,
    ServerDied,
    OutOfMemory,
    PermissionDenied,
    InvalidState,
    Config,
    Unknown,
}

impl From<&PlayerError> for ErrorKind {
    fn from(err: &PlayerError) -> Self {
        match err {
            PlayerError::NotFound(_) => ErrorKind::NotFound,
            PlayerError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            PlayerError::Io(_) => ErrorKind::Io,
            PlayerError::Timeout(_) => ErrorKind::Timeout,
            PlayerError::ServerDied(_) => ErrorKind::ServerDied,
            PlayerError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            PlayerError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            PlayerError::InvalidState(_) => ErrorKind::InvalidState,
            PlayerError::Config(_) => ErrorKind::Config,
            PlayerError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

impl PlayerError {
    /// Classify an I/O error into the caller-facing taxonomy.
    ///
    /// `NotFound` and `PermissionDenied` get their own variants so callers
    /// can react (e.g. drop the entry from a playlist); everything else is
    /// surfaced as `Io`.
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => PlayerError::NotFound(format!("{context}: {err}")),
            std::io::ErrorKind::PermissionDenied => {
                PlayerError::PermissionDenied(format!("{context}: {err}"))
            }
            _ => PlayerError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let err = PlayerError::NotFound("x".into());
        assert_eq!(ErrorKind::from(&err), ErrorKind::NotFound);

        let err = PlayerError::ServerDied("sink".into());
        assert_eq!(ErrorKind::from(&err), ErrorKind::ServerDied);

        let err = PlayerError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(ErrorKind::from(&err), ErrorKind::Io);
    }

    #[test]
    fn test_from_io_classification() {
        let nf = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(
            PlayerError::from_io("open", nf),
            PlayerError::NotFound(_)
        ));

        let pd = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(
            PlayerError::from_io("open", pd),
            PlayerError::PermissionDenied(_)
        ));

        let other = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(
            PlayerError::from_io("read", other),
            PlayerError::Io(_)
        ));
    }
}
