//! Error types for Veza.

use std::io;

use thiserror::Error;

/// Result type alias for Veza operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Veza.
#[derive(Error, Debug)]
pub enum Error {
    // Caller misuse
    #[error("payload too large: {size} bytes (max {max})")]
    DataTooLarge { size: usize, max: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    // Transient queue pressure
    #[error("send timed out waiting for window space")]
    Timeout,

    // Lifecycle
    #[error("link is closed")]
    Closed,

    #[error("connection lost")]
    ConnectionLost,

    // Framing errors
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    // IO errors (codec adapter only)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Frame codec errors.
///
/// These are protocol-local: the receive path absorbs them, counts them
/// in [`LinkStats`](crate::types::LinkStats) and resynchronizes on the
/// next flag. They surface only through the standalone codec API.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("frame too short")]
    TooShort,

    #[error("frame exceeds receive buffer")]
    Overflow,

    #[error("invalid escape sequence")]
    InvalidEscape,

    #[error("unknown control field: {0:#04x}")]
    UnknownControl(u8),
}

impl Error {
    /// Check if the error is transient (the operation may be retried).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Check if the error means the link is unusable until re-established.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Closed | Error::ConnectionLost)
    }
}
