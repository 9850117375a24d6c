//! Session core
//!
//! Pure state machines behind a chat session. Nothing in this crate performs
//! I/O or reads a clock: every method that depends on time takes `now`, and
//! every component reports its next deadline so the driver knows when to call
//! back.
//!
//! # Components
//!
//! - [`TimerService`]: cancellable one-shot timers with stable ids
//! - [`ConnectionManager`]: broker handshake, subscription table, reconnection
//! - [`TypingAggregator`]: remote typing entries and local typing debounce
//! - [`PresenceTracker`]: replace-on-update online user sets
//! - [`MessageDispatcher`]: kind classification and history-first ordering
//! - [`Environment`]: time source, real or simulated

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod dispatcher;
pub mod env;
pub mod error;
pub mod presence;
pub mod timer;
pub mod typing;

pub use connection::{
    ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState, DEFAULT_RECONNECT_DELAY,
    Subscription, SubscriptionId,
};
pub use dispatcher::{Dispatched, DisplayMessage, MessageDispatcher, SystemKind};
pub use env::{Environment, Moment};
pub use error::ConnectionError;
pub use presence::{PresenceSnapshot, PresenceTracker};
pub use timer::{TimerId, TimerService};
pub use typing::{DEFAULT_TYPING_IDLE, TypingAggregator, TypingExpiry};
