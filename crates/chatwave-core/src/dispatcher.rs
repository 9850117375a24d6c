//! Inbound message classification and history ordering.
//!
//! Each room entry starts a history episode. Until the history bulk for that
//! room arrives, live messages are buffered; the bulk is then emitted in array
//! order followed by the buffer, so the sink always sees history before any
//! live message of the same episode.
//!
//! ```text
//! begin_episode(r)        history for r
//! ───────────────> Awaiting(r) ──────────> Live(r)
//!                    │ live: buffer          │ live: emit
//! ```

use std::collections::VecDeque;

use chatwave_proto::{History, MessageKind, MessagePayload, RoomId, escape::unescape_html};
use chrono::NaiveDateTime;

/// Flavour of a system line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemKind {
    /// Someone entered the room
    Join,
    /// Someone left the room
    Leave,
    /// Server notice
    Notice,
}

/// A classified message ready for display. Content is already un-escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayMessage {
    /// Join, leave, or server notice
    System {
        /// Which kind of system line
        kind: SystemKind,
        /// Text
        content: String,
        /// Server receive time
        timestamp: Option<NaiveDateTime>,
    },
    /// Chat line
    Chat {
        /// Sender username
        sender: String,
        /// Text
        content: String,
        /// Server receive time
        timestamp: Option<NaiveDateTime>,
        /// Sent by the local identity
        own: bool,
    },
}

impl DisplayMessage {
    /// Text of the message.
    pub fn content(&self) -> &str {
        match self {
            Self::System { content, .. } | Self::Chat { content, .. } => content,
        }
    }
}

/// Output of the dispatcher, in sink order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// A non-empty history bulk of `count` messages follows
    HistoryHeader {
        /// Messages in the bulk
        count: usize,
    },
    /// One message
    Message(DisplayMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitingHistory(RoomId),
    Live(RoomId),
}

/// Orders history and live messages for the current room.
#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    local_username: String,
    phase: Phase,
    buffered: VecDeque<MessagePayload>,
}

impl MessageDispatcher {
    /// Create an idle dispatcher. `local_username` decides the `own` flag.
    pub fn new(local_username: impl Into<String>) -> Self {
        Self { local_username: local_username.into(), phase: Phase::Idle, buffered: VecDeque::new() }
    }

    /// Start a history episode for `room`, discarding any previous buffer.
    pub fn begin_episode(&mut self, room: RoomId) {
        if !self.buffered.is_empty() {
            tracing::debug!(dropped = self.buffered.len(), "discarding buffer of previous episode");
        }
        self.buffered.clear();
        self.phase = Phase::AwaitingHistory(room);
    }

    /// Leave the current episode. Further messages are dropped until the next
    /// [`Self::begin_episode`].
    pub fn end_episode(&mut self) {
        self.buffered.clear();
        self.phase = Phase::Idle;
    }

    /// Room of the current episode.
    pub fn room(&self) -> Option<&RoomId> {
        match &self.phase {
            Phase::Idle => None,
            Phase::AwaitingHistory(room) | Phase::Live(room) => Some(room),
        }
    }

    /// Whether live messages are being held back.
    pub fn is_awaiting_history(&self) -> bool {
        matches!(self.phase, Phase::AwaitingHistory(_))
    }

    /// Number of live messages held back.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// A live message arrived on `room`'s message stream.
    pub fn on_live(&mut self, room: &RoomId, message: MessagePayload) -> Vec<Dispatched> {
        match &self.phase {
            Phase::AwaitingHistory(current) if current == room => {
                self.buffered.push_back(message);
                Vec::new()
            },
            Phase::Live(current) if current == room => {
                vec![Dispatched::Message(self.classify(message))]
            },
            _ => {
                tracing::debug!(%room, "dropping message outside the current episode");
                Vec::new()
            },
        }
    }

    /// The history bulk arrived.
    ///
    /// Stale bulks (another room, or an episode that already went live) are
    /// dropped.
    pub fn on_history(&mut self, history: History) -> Vec<Dispatched> {
        let Phase::AwaitingHistory(room) = &self.phase else {
            tracing::debug!(room = ?history.room_id, "dropping history outside an awaiting episode");
            return Vec::new();
        };
        if history.room_id.as_ref().is_some_and(|r| r != room) {
            tracing::debug!(expected = %room, got = ?history.room_id, "dropping stale history");
            return Vec::new();
        }

        self.phase = Phase::Live(room.clone());

        let mut out = Vec::with_capacity(history.messages.len() + self.buffered.len() + 1);
        if !history.messages.is_empty() {
            out.push(Dispatched::HistoryHeader { count: history.messages.len() });
        }
        for message in history.messages {
            out.push(Dispatched::Message(self.classify(message)));
        }
        while let Some(message) = self.buffered.pop_front() {
            out.push(Dispatched::Message(self.classify(message)));
        }
        out
    }

    /// Classify by kind tag and un-escape the content once.
    pub fn classify(&self, message: MessagePayload) -> DisplayMessage {
        let content = unescape_html(&message.content).into_owned();
        let timestamp = message.timestamp;

        let kind = match message.kind {
            MessageKind::Join => SystemKind::Join,
            MessageKind::Leave => SystemKind::Leave,
            MessageKind::System => SystemKind::Notice,
            MessageKind::Chat => {
                // The broker escapes the sender too; compare the decoded name
                let sender = unescape_html(&message.sender).into_owned();
                return DisplayMessage::Chat {
                    own: sender == self.local_username,
                    sender,
                    content,
                    timestamp,
                };
            },
        };
        DisplayMessage::System { kind, content, timestamp }
    }
}
