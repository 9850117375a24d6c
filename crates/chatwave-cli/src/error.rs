//! Terminal client errors.

use std::io;

use chatwave_client::transport::TransportError;
use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// I/O error from stdin or stdout.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// WebSocket could not be opened.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No open WebSocket.
    #[error("not connected")]
    NotConnected,

    /// The socket task stopped accepting frames.
    #[error("connection closed")]
    Closed,
}
