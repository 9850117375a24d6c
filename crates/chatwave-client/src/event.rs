//! Session events, actions, and render events.

use chatwave_core::{ConnectionState, DisplayMessage};
use chatwave_proto::{Room, RoomId, StompFrame};

/// Events the caller feeds into the session.
///
/// The caller is responsible for:
/// - Executing transport actions and reporting their outcome
/// - Receiving frames from the network
/// - Driving time forward via ticks
/// - Forwarding user intents (join, type, send)
///
/// Generic over `I` (Instant type) to support both production
/// (`std::time::Instant`) and simulated clocks.
#[derive(Debug, Clone)]
pub enum SessionEvent<I = std::time::Instant> {
    /// Start connecting to the broker.
    Connect,

    /// The transport requested by [`SessionAction::Open`] is open.
    TransportOpened,

    /// The transport failed to open or was lost.
    TransportClosed {
        /// Description of the failure.
        reason: String,
    },

    /// Frame received from the broker.
    FrameReceived(StompFrame),

    /// Time tick for timer processing.
    Tick {
        /// Current time from the environment.
        now: I,
    },

    /// User wants to enter a room.
    Join {
        /// Room to enter.
        room: RoomId,
    },

    /// User wants to leave the current room.
    Leave,

    /// Composer content changed.
    InputChanged {
        /// Whether the composer is non-empty.
        has_content: bool,
    },

    /// User submitted a message.
    SendMessage {
        /// Message text, untrimmed.
        content: String,
    },

    /// Directory fetched or refreshed.
    RoomsLoaded {
        /// Rooms in directory order.
        rooms: Vec<Room>,
    },

    /// Graceful shutdown.
    Disconnect,
}

/// Actions the session produces for the caller to execute, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a transport to the broker and report back with
    /// [`SessionEvent::TransportOpened`] or [`SessionEvent::TransportClosed`].
    Open,

    /// Send a frame over the open transport.
    Transmit(StompFrame),

    /// Close the transport.
    Close,

    /// Update the view.
    Render(RenderEvent),
}

/// What the rendering layer should show. The session never renders itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    /// Connection status changed.
    ConnectionStatus(ConnectionState),

    /// A room became current.
    RoomEntered {
        /// Room id.
        room: RoomId,
        /// Display name from the directory.
        name: String,
    },

    /// The current room was vacated.
    RoomLeft {
        /// Room id.
        room: RoomId,
    },

    /// Discard displayed messages; a new history episode starts.
    MessagesCleared,

    /// A history bulk of `count` messages follows.
    HistoryHeader {
        /// Messages in the bulk.
        count: usize,
    },

    /// Display one message.
    Message(DisplayMessage),

    /// Typing indicator text, `None` to hide it.
    Typing(Option<String>),

    /// Online users of the current room.
    Presence {
        /// Room the snapshot describes.
        room: RoomId,
        /// Online usernames.
        users: Vec<String>,
        /// Number of online users.
        count: usize,
    },

    /// Directory badge for a room.
    RoomBadge {
        /// Room id.
        room: RoomId,
        /// Online users.
        count: usize,
    },

    /// Users online across all rooms.
    OnlineCount(u32),
}
