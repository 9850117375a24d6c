//! ChatWave wire protocol.
//!
//! The broker speaks STOMP 1.2 over a WebSocket. This crate is the pure data
//! layer for that conversation: no I/O, no state.
//!
//! # Components
//!
//! - [`StompFrame`]: text frame codec (command, escaped headers, NUL-terminated
//!   body)
//! - [`Destination`] / [`Topic`]: closed sets of publish destinations and
//!   subscription topics
//! - [`Outbound`] / [`Inbound`]: JSON payloads keyed by destination or topic
//! - [`escape`]: single-pass HTML entity handling

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod escape;
pub mod payloads;
pub mod stomp;
pub mod topic;

pub use errors::{ProtocolError, Result};
pub use payloads::{
    History, Inbound, Membership, MessageKind, MessagePayload, OnlineCount, Outbound, Presence,
    Room, SendMessage, ServerError, TypingSignal,
};
pub use stomp::{Command, StompFrame};
pub use topic::{Destination, RoomId, Topic};
