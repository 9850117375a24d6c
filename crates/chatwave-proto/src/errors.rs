//! Protocol error types.
//!
//! Every failure to turn bytes from the broker into a typed value ends up here.
//! Callers above the codec treat all of these as "malformed inbound frame":
//! the frame is logged and dropped, nothing else is affected.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding broker traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame ended before the header section was complete.
    #[error("unexpected end of frame")]
    UnexpectedEof,

    /// Command line is not a known STOMP command.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// Header line without a `:` separator.
    #[error("malformed header line: {line:?}")]
    MalformedHeader {
        /// Offending line
        line: String,
    },

    /// Header value contains an escape sequence STOMP 1.2 does not define.
    #[error("invalid escape sequence in header value {value:?}")]
    InvalidEscape {
        /// Raw header value
        value: String,
    },

    /// `content-length` header is not a non-negative integer.
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    /// Body is not followed by the NUL terminator.
    #[error("frame body is not terminated by NUL")]
    MissingNul,

    /// Frame lacks a header the command requires.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Destination string does not name a known topic.
    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    /// Bytes are not valid UTF-8.
    #[error("invalid UTF-8 in frame")]
    InvalidUtf8,

    /// JSON body failed to (de)serialize.
    #[error("malformed payload: {0}")]
    Payload(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}

impl From<std::str::Utf8Error> for ProtocolError {
    fn from(_: std::str::Utf8Error) -> Self {
        Self::InvalidUtf8
    }
}
