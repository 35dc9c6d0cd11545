//! Error types for the NMDC protocol library.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Top-level protocol errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame exceeded the maximum allowed length.
    #[error("frame too long: {actual} bytes, limit {limit}")]
    FrameTooLong {
        /// Observed frame length including the terminator.
        actual: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Failed to parse a frame into a message.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// The raw frame, truncated for display.
        string: String,
        /// The underlying parse error.
        #[source]
        cause: MessageParseError,
    },
}

/// Errors encountered when parsing message payloads.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// Frame was empty where a payload was required.
    #[error("empty message")]
    EmptyMessage,

    /// The positional grammar for the command did not match.
    #[error("grammar mismatch for {command}")]
    GrammarMismatch {
        /// Command verb the grammar belongs to.
        command: &'static str,
    },

    /// A numeric chunk was out of range or not a number.
    #[error("invalid number in chunk {chunk}")]
    InvalidNumber {
        /// Name of the offending chunk.
        chunk: &'static str,
    },

    /// An address chunk was not `ip:port`.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
