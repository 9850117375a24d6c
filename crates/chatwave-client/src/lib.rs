//! Client
//!
//! Action-based chat session for the ChatWave broker. Manages the current room
//! membership, the room directory, and the translation of inbound traffic into
//! render events.
//!
//! # Architecture
//!
//! The session follows the same Sans-IO and action-based patterns as
//! [`chatwave_core`]. It receives events ([`SessionEvent`]), processes them
//! through pure state machine logic, and returns actions ([`SessionAction`])
//! for the caller to execute.
//!
//! # Components
//!
//! - [`Session`]: Top-level state machine for one identity
//! - [`RoomController`]: Join/leave protocol and room subscriptions
//! - [`RoomDirectory`]: Room snapshots with live online badges
//! - [`Identity`]: Validated local username
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::ConnectedClient`]: Channels bridged to a WebSocket
//! - [`transport::connect`]: Connect to a broker

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod directory;
mod error;
mod event;
mod identity;
mod room;
mod session;

#[cfg(feature = "transport")]
pub mod transport;

pub use chatwave_core::{ConnectionState, DisplayMessage, Environment, SystemKind};
pub use chatwave_proto::{Room, RoomId};
pub use directory::RoomDirectory;
pub use error::SessionError;
pub use event::{RenderEvent, SessionAction, SessionEvent};
pub use identity::{Identity, IdentityError, MIN_USERNAME_LEN};
pub use room::{RoomController, RoomScope};
pub use session::{DEFAULT_MAX_MESSAGE_LEN, Session, SessionConfig};
