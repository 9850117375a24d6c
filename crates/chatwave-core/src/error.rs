//! Error types for the session core.
//!
//! None of these are fatal. The session logs them and drops the offending
//! input; the worst outcome is a stale view that a reconnect or room re-entry
//! repairs.

use chatwave_proto::{Command, ProtocolError};
use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors from the connection state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation not valid in the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when the error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: String,
    },

    /// Frame not expected in the current state
    #[error("unexpected {command} frame in state {state:?}")]
    UnexpectedFrame {
        /// Current state when the frame arrived
        state: ConnectionState,
        /// Command of the unexpected frame
        command: Command,
    },

    /// `subscription` header does not name a subscription id we issue
    #[error("malformed subscription id: {0:?}")]
    BadSubscriptionId(String),

    /// Frame failed to decode
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
