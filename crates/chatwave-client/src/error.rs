//! Session errors.

use chatwave_core::ConnectionError;
use thiserror::Error;

/// Errors returned by [`crate::Session::handle`].
///
/// Only caller mistakes surface here, such as reporting a transport open that
/// was never requested. Bad data from the broker is logged and dropped
/// instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Connection state machine rejected the event
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
