//! Broker destinations.
//!
//! Outbound publishes go to application destinations under `/app`; inbound
//! traffic arrives on broker topics (`/topic/...`) or per-identity queues
//! (`/user/queue/...`). Both sides are closed enumerations so routing is an
//! exhaustive match rather than string comparison.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

const ROOM_PREFIX: &str = "/topic/room/";
const TYPING_SUFFIX: &str = "/typing";
const USERS_SUFFIX: &str = "/users";

/// Opaque room identifier as issued by the room directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a directory room id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Outbound publish destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Announce room entry
    Join,
    /// Announce room exit
    Leave,
    /// Post a chat message
    Send,
    /// Typing start/stop signal
    Typing,
}

impl Destination {
    /// Broker path.
    pub fn path(self) -> &'static str {
        match self {
            Self::Join => "/app/chat.join",
            Self::Leave => "/app/chat.leave",
            Self::Send => "/app/chat.send",
            Self::Typing => "/app/chat.typing",
        }
    }
}

/// Inbound subscription topics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Per-room message stream
    RoomMessages(RoomId),
    /// Per-room typing signals
    RoomTyping(RoomId),
    /// Per-room presence snapshots
    RoomPresence(RoomId),
    /// Global online-user count
    OnlineCount,
    /// Per-identity error queue
    Errors,
    /// Per-identity history queue, fed once per join
    History,
}

impl Topic {
    /// The three topics that make up one room membership, in subscribe order.
    pub fn room_topics(room: &RoomId) -> [Topic; 3] {
        [
            Topic::RoomMessages(room.clone()),
            Topic::RoomTyping(room.clone()),
            Topic::RoomPresence(room.clone()),
        ]
    }

    /// Topics that outlive any room membership.
    pub fn global_topics() -> [Topic; 3] {
        [Topic::Errors, Topic::History, Topic::OnlineCount]
    }

    /// Room this topic is scoped to. `None` for global and per-identity topics.
    pub fn room(&self) -> Option<&RoomId> {
        match self {
            Self::RoomMessages(room) | Self::RoomTyping(room) | Self::RoomPresence(room) => {
                Some(room)
            },
            Self::OnlineCount | Self::Errors | Self::History => None,
        }
    }

    /// Broker path.
    pub fn path(&self) -> String {
        match self {
            Self::RoomMessages(room) => format!("{ROOM_PREFIX}{room}"),
            Self::RoomTyping(room) => format!("{ROOM_PREFIX}{room}{TYPING_SUFFIX}"),
            Self::RoomPresence(room) => format!("{ROOM_PREFIX}{room}{USERS_SUFFIX}"),
            Self::OnlineCount => "/topic/online-count".to_string(),
            Self::Errors => "/user/queue/errors".to_string(),
            Self::History => "/user/queue/history".to_string(),
        }
    }

    /// Parse a broker path.
    pub fn parse(path: &str) -> Result<Self> {
        match path {
            "/topic/online-count" => return Ok(Self::OnlineCount),
            "/user/queue/errors" => return Ok(Self::Errors),
            "/user/queue/history" => return Ok(Self::History),
            _ => {},
        }

        let unknown = || ProtocolError::UnknownDestination(path.to_string());
        let rest = path.strip_prefix(ROOM_PREFIX).ok_or_else(unknown)?;

        let (room, topic): (&str, fn(RoomId) -> Topic) =
            if let Some(room) = rest.strip_suffix(TYPING_SUFFIX) {
                (room, Topic::RoomTyping)
            } else if let Some(room) = rest.strip_suffix(USERS_SUFFIX) {
                (room, Topic::RoomPresence)
            } else {
                (rest, Topic::RoomMessages)
            };

        if room.is_empty() || room.contains('/') {
            return Err(unknown());
        }
        Ok(topic(RoomId::new(room)))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
