//! JSON payloads exchanged with the broker.
//!
//! Field names are fixed by the server (camelCase). Inbound payloads tolerate
//! the optional fields the server sometimes omits (`id`, `roomId`,
//! `timestamp`, `code`); anything else missing is a malformed frame.
//!
//! [`Outbound`] pairs each publish with its [`Destination`], and
//! [`Inbound::decode`] picks the payload type from the [`Topic`] a frame
//! arrived on, so a body is never interpreted against the wrong schema.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    errors::Result,
    stomp::StompFrame,
    topic::{Destination, RoomId, Topic},
};

/// Message classification tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Regular chat message
    Chat,
    /// User joined the room
    Join,
    /// User left the room
    Leave,
    /// Server notification
    System,
}

/// Room entry/exit notification (`chat.join`, `chat.leave`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    /// Local identity
    pub username: String,
    /// Room being entered or left
    pub room_id: RoomId,
}

/// Chat message publish (`chat.send`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Message text
    pub content: String,
    /// Local identity
    pub sender: String,
    /// Current room
    pub room_id: RoomId,
}

/// Typing signal. Published on `chat.typing`, echoed on the room typing topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    /// Who is typing
    pub username: String,
    /// Room the signal applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    /// Started (`true`) or stopped (`false`)
    pub typing: bool,
}

/// A message as delivered on a room stream or inside a history bulk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Server-side id, absent on live broadcasts
    #[serde(default)]
    pub id: Option<i64>,
    /// Message text, HTML-escaped by the server
    pub content: String,
    /// Sender username (`System` for notifications)
    pub sender: String,
    /// Room the message belongs to
    #[serde(default)]
    pub room_id: Option<RoomId>,
    /// Classification tag
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Server receive time
    #[serde(default)]
    pub timestamp: Option<NaiveDateTime>,
}

/// Full membership snapshot of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    /// Room the snapshot describes
    #[serde(default)]
    pub room_id: Option<RoomId>,
    /// Every online username
    pub users: Vec<String>,
}

/// Presence body as sent on the wire. Join and leave send the object form;
/// the server's disconnect listener sends the bare username array.
#[derive(Deserialize)]
#[serde(untagged)]
enum PresenceWire {
    Snapshot(Presence),
    Users(Vec<String>),
}

impl From<PresenceWire> for Presence {
    fn from(wire: PresenceWire) -> Self {
        match wire {
            PresenceWire::Snapshot(presence) => presence,
            PresenceWire::Users(users) => Self { room_id: None, users },
        }
    }
}

/// Global online-user count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineCount {
    /// Users connected across all rooms
    pub count: u32,
}

/// Error reported on the per-identity error queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Human-readable description
    pub message: String,
    /// Machine-readable code (e.g. `BAD_REQUEST`)
    #[serde(default)]
    pub code: Option<String>,
}

/// Recent messages sent once after a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    /// Room the history belongs to
    #[serde(default)]
    pub room_id: Option<RoomId>,
    /// Messages, oldest first
    #[serde(default)]
    pub messages: Vec<MessagePayload>,
}

/// Room directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Directory id
    pub id: RoomId,
    /// Display name
    pub name: String,
    /// One-line description
    #[serde(default)]
    pub description: String,
    /// Online users at fetch time (display hint only)
    #[serde(default)]
    pub online_count: u32,
}

/// Frames the client publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// `chat.join`
    Join(Membership),
    /// `chat.leave`
    Leave(Membership),
    /// `chat.send`
    Send(SendMessage),
    /// `chat.typing`
    Typing(TypingSignal),
}

impl Outbound {
    /// Destination this publish goes to.
    pub fn destination(&self) -> Destination {
        match self {
            Self::Join(_) => Destination::Join,
            Self::Leave(_) => Destination::Leave,
            Self::Send(_) => Destination::Send,
            Self::Typing(_) => Destination::Typing,
        }
    }

    /// JSON body.
    pub fn to_json(&self) -> Result<String> {
        Ok(match self {
            Self::Join(p) | Self::Leave(p) => serde_json::to_string(p)?,
            Self::Send(p) => serde_json::to_string(p)?,
            Self::Typing(p) => serde_json::to_string(p)?,
        })
    }

    /// `SEND` frame carrying this publish.
    pub fn into_frame(self) -> Result<StompFrame> {
        Ok(StompFrame::send(self.destination().path(), self.to_json()?))
    }
}

/// Frames the client receives, typed by the topic they arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Room message stream
    Message(MessagePayload),
    /// Room typing stream
    Typing(TypingSignal),
    /// Room presence stream
    Presence(Presence),
    /// Global online count
    OnlineCount(OnlineCount),
    /// Per-identity error queue
    Error(ServerError),
    /// Per-identity history queue
    History(History),
}

impl Inbound {
    /// Decode a JSON body according to the topic it was delivered on.
    pub fn decode(topic: &Topic, body: &[u8]) -> Result<Self> {
        Ok(match topic {
            Topic::RoomMessages(_) => Self::Message(serde_json::from_slice(body)?),
            Topic::RoomTyping(_) => Self::Typing(serde_json::from_slice(body)?),
            Topic::RoomPresence(_) => {
                Self::Presence(serde_json::from_slice::<PresenceWire>(body)?.into())
            },
            Topic::OnlineCount => Self::OnlineCount(serde_json::from_slice(body)?),
            Topic::Errors => Self::Error(serde_json::from_slice(body)?),
            Topic::History => Self::History(serde_json::from_slice(body)?),
        })
    }
}
