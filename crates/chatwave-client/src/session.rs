//! Session state machine.
//!
//! The [`Session`] composes the connection, room controller, typing, presence,
//! and dispatcher into the single object the rendering layer talks to. It owns
//! every piece of mutable session state; there is nothing ambient.
//!
//! # Event flow
//!
//! ```text
//! caller ─ SessionEvent ─> Session ─> RoomController ─> ConnectionManager
//!                             ↑                                │
//!                             └──── Deliver(topic, body) ──────┘
//!                             │
//!                             ├─> MessageDispatcher ─┐
//!                             ├─> TypingAggregator  ─┼─> RenderEvent
//!                             └─> PresenceTracker   ─┘
//! ```
//!
//! # Reconnection
//!
//! On every `Connected` the current room is announced again, starting a new
//! history episode. With no current room, the first directory room is joined
//! when `auto_join_first` is set.

use std::time::Duration;

use chatwave_core::{
    ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState, DEFAULT_TYPING_IDLE,
    Dispatched, Environment, MessageDispatcher, PresenceTracker, Subscription, TypingAggregator,
};
use chatwave_proto::{
    Inbound, Outbound, Room, RoomId, SendMessage, ServerError, StompFrame, Topic, TypingSignal,
    escape::unescape_html,
};

use crate::{
    directory::RoomDirectory,
    error::SessionError,
    event::{RenderEvent, SessionAction, SessionEvent},
    identity::Identity,
    room::{RoomController, RoomScope},
};

/// Longest accepted chat message, in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 500;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Connection settings
    pub connection: ConnectionConfig,
    /// Typing idle timeout, local and remote
    pub typing_idle: Duration,
    /// Longest accepted chat message
    pub max_message_len: usize,
    /// Join the first directory room when connected with no current room
    pub auto_join_first: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            typing_idle: DEFAULT_TYPING_IDLE,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            auto_join_first: true,
        }
    }
}

/// Chat session for one identity.
pub struct Session<E: Environment> {
    env: E,
    identity: Identity,
    config: SessionConfig,
    connection: ConnectionManager<E::Instant>,
    rooms: RoomController,
    typing: TypingAggregator<E::Instant>,
    presence: PresenceTracker,
    dispatcher: MessageDispatcher,
    directory: RoomDirectory,
    /// Error queue, history queue, and online count. Live for the session.
    global: Vec<Subscription>,
    online_count: Option<u32>,
}

impl<E: Environment> Session<E> {
    /// Create a disconnected session.
    pub fn new(env: E, identity: Identity, config: SessionConfig) -> Self {
        let username = identity.username().to_string();
        Self {
            env,
            connection: ConnectionManager::new(username.clone(), config.connection.clone()),
            typing: TypingAggregator::new(username.clone(), config.typing_idle),
            dispatcher: MessageDispatcher::new(username),
            identity,
            config,
            rooms: RoomController::new(),
            presence: PresenceTracker::new(),
            directory: RoomDirectory::new(),
            global: Vec::new(),
            online_count: None,
        }
    }

    /// Process an event and return actions to execute.
    pub fn handle(
        &mut self,
        event: SessionEvent<E::Instant>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        match event {
            SessionEvent::Connect => Ok(self.connect()),
            SessionEvent::TransportOpened => self.transport_opened(),
            SessionEvent::TransportClosed { reason } => Ok(self.transport_closed(reason)),
            SessionEvent::FrameReceived(frame) => Ok(self.handle_frame(frame)),
            SessionEvent::Tick { now } => Ok(self.tick(now)),
            SessionEvent::Join { room } => Ok(self.join(room)),
            SessionEvent::Leave => Ok(self.leave()),
            SessionEvent::InputChanged { has_content } => Ok(self.input_changed(has_content)),
            SessionEvent::SendMessage { content } => Ok(self.send_message(&content)),
            SessionEvent::RoomsLoaded { rooms } => Ok(self.load_rooms(rooms)),
            SessionEvent::Disconnect => Ok(self.disconnect()),
        }
    }

    /// Local identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Current room.
    pub fn current_room(&self) -> Option<&RoomId> {
        self.rooms.current()
    }

    /// Room directory with badges.
    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Online users in the current room.
    pub fn online_users(&self) -> &[String] {
        match self.rooms.current() {
            Some(room) => self.presence.users(room),
            None => &[],
        }
    }

    /// Users online across all rooms, once reported.
    pub fn online_count(&self) -> Option<u32> {
        self.online_count
    }

    /// Current typing indicator text.
    pub fn typing_indicator(&self) -> Option<String> {
        self.typing.indicator()
    }

    /// Whether live messages are held back waiting for history.
    pub fn is_awaiting_history(&self) -> bool {
        self.dispatcher.is_awaiting_history()
    }

    /// Earliest time [`Self::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        match (self.connection.next_deadline(), self.typing.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Start connecting. The global subscriptions are registered on the first
    /// call and sent once the broker accepts the session.
    pub fn connect(&mut self) -> Vec<SessionAction> {
        if self.global.is_empty() {
            for topic in Topic::global_topics() {
                let (subscription, actions) = self.connection.subscribe(topic);
                debug_assert!(actions.is_empty());
                self.global.push(subscription);
            }
        }

        let actions = self.connection.connect();
        self.process(actions)
    }

    /// The transport is open.
    pub fn transport_opened(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        let actions = self.connection.transport_opened()?;
        Ok(self.process(actions))
    }

    /// The transport failed to open or was lost.
    pub fn transport_closed(&mut self, reason: String) -> Vec<SessionAction> {
        let now = self.env.now();
        let actions = self.connection.transport_failed(reason, now);
        self.process(actions)
    }

    /// Process a frame from the broker. Malformed frames are logged and
    /// dropped.
    pub fn handle_frame(&mut self, frame: StompFrame) -> Vec<SessionAction> {
        let now = self.env.now();
        match self.connection.handle_frame(frame, now) {
            Ok(actions) => self.process(actions),
            Err(e) => {
                tracing::warn!(error = %e, "dropping frame");
                Vec::new()
            },
        }
    }

    /// Fire due timers.
    pub fn tick(&mut self, now: E::Instant) -> Vec<SessionAction> {
        let actions = self.connection.tick(now);
        let mut out = self.process(actions);

        let expiry = self.typing.poll_timers(now);
        if !expiry.expired.is_empty() {
            out.push(SessionAction::Render(RenderEvent::Typing(self.typing.indicator())));
        }
        if expiry.local_stopped {
            out.extend(self.publish_typing(false));
        }
        out
    }

    /// Enter `room`. No-op if it is already current.
    pub fn join(&mut self, room: RoomId) -> Vec<SessionAction> {
        if self.rooms.current() == Some(&room) {
            tracing::debug!(%room, "join ignored, already current");
            return Vec::new();
        }

        let left = self.rooms.current().cloned();
        let scope = RoomScope {
            connection: &mut self.connection,
            typing: &mut self.typing,
            presence: &mut self.presence,
        };
        let actions = self.rooms.join(room.clone(), self.identity.username(), scope);
        let mut out = self.process(actions);

        if let Some(left) = left {
            out.push(SessionAction::Render(RenderEvent::RoomLeft { room: left }));
        }
        let name = self.directory.display_name(&room);
        out.push(SessionAction::Render(RenderEvent::RoomEntered { room: room.clone(), name }));
        out.extend(self.begin_episode(room));
        out.push(SessionAction::Render(RenderEvent::Typing(None)));
        out
    }

    /// Leave the current room without entering another.
    pub fn leave(&mut self) -> Vec<SessionAction> {
        let Some(left) = self.rooms.current().cloned() else {
            return Vec::new();
        };

        let scope = RoomScope {
            connection: &mut self.connection,
            typing: &mut self.typing,
            presence: &mut self.presence,
        };
        let actions = self.rooms.leave(self.identity.username(), scope);
        self.dispatcher.end_episode();

        let mut out = self.process(actions);
        out.push(SessionAction::Render(RenderEvent::RoomLeft { room: left }));
        out.push(SessionAction::Render(RenderEvent::Typing(None)));
        out
    }

    /// Composer content changed. Only typing edges reach the network.
    pub fn input_changed(&mut self, has_content: bool) -> Vec<SessionAction> {
        if self.rooms.current().is_none() {
            return Vec::new();
        }

        let now = self.env.now();
        match self.typing.local_input_changed(has_content, now) {
            Some(typing) => self.publish_typing(typing),
            None => Vec::new(),
        }
    }

    /// Publish a chat message to the current room, then stop local typing.
    ///
    /// Blank content or no current room is a silent no-op. Over-long content
    /// is logged and dropped.
    pub fn send_message(&mut self, content: &str) -> Vec<SessionAction> {
        let content = content.trim();
        let Some(room) = self.rooms.current().cloned() else {
            tracing::debug!("send ignored, no current room");
            return Vec::new();
        };
        if content.is_empty() {
            return Vec::new();
        }
        let len = content.chars().count();
        if len > self.config.max_message_len {
            tracing::warn!(len, max = self.config.max_message_len, "message too long, not sent");
            return Vec::new();
        }

        let actions = self.connection.send(Outbound::Send(SendMessage {
            content: content.to_string(),
            sender: self.identity.username().to_string(),
            room_id: room,
        }));
        let mut out = self.process(actions);

        if let Some(typing) = self.typing.stop_local() {
            out.extend(self.publish_typing(typing));
        }
        out
    }

    /// Replace the room directory. Joins the first room when connected with
    /// no current room and `auto_join_first` is set.
    pub fn load_rooms(&mut self, rooms: Vec<Room>) -> Vec<SessionAction> {
        tracing::debug!(count = rooms.len(), "room directory loaded");
        self.directory.replace(rooms);

        let mut out: Vec<_> = self
            .directory
            .rooms()
            .iter()
            .filter_map(|r| {
                self.directory
                    .badge(&r.id)
                    .map(|count| SessionAction::Render(RenderEvent::RoomBadge { room: r.id.clone(), count }))
            })
            .collect();

        if self.connection.is_connected() && self.rooms.current().is_none() {
            out.extend(self.auto_join());
        }
        out
    }

    /// Leave the current room and close the connection. No retry follows.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        let mut out = self.leave();
        let actions = self.connection.disconnect();
        out.extend(self.process(actions));
        out
    }

    fn auto_join(&mut self) -> Vec<SessionAction> {
        if !self.config.auto_join_first {
            return Vec::new();
        }
        match self.directory.first() {
            Some(room) => {
                let room = room.id.clone();
                tracing::info!(%room, "joining first listed room");
                self.join(room)
            },
            None => Vec::new(),
        }
    }

    fn begin_episode(&mut self, room: RoomId) -> Vec<SessionAction> {
        self.dispatcher.begin_episode(room);
        vec![SessionAction::Render(RenderEvent::MessagesCleared)]
    }

    fn on_connected(&mut self) -> Vec<SessionAction> {
        let Some(room) = self.rooms.current().cloned() else {
            return self.auto_join();
        };

        let actions = self.rooms.rejoin(self.identity.username(), &mut self.connection);
        let mut out = self.begin_episode(room);
        out.extend(self.process(actions));
        out
    }

    fn publish_typing(&mut self, typing: bool) -> Vec<SessionAction> {
        let Some(room) = self.rooms.current().cloned() else {
            return Vec::new();
        };

        let actions = self.connection.send(Outbound::Typing(TypingSignal {
            username: self.identity.username().to_string(),
            room_id: Some(room),
            typing,
        }));
        self.process(actions)
    }

    /// Translate connection actions into session actions, routing deliveries.
    fn process(&mut self, actions: Vec<ConnectionAction>) -> Vec<SessionAction> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                ConnectionAction::Open => {
                    out.push(SessionAction::Render(RenderEvent::ConnectionStatus(
                        ConnectionState::Connecting,
                    )));
                    out.push(SessionAction::Open);
                },
                ConnectionAction::Transmit(frame) => out.push(SessionAction::Transmit(frame)),
                ConnectionAction::Close => out.push(SessionAction::Close),
                ConnectionAction::Connected => {
                    out.push(SessionAction::Render(RenderEvent::ConnectionStatus(
                        ConnectionState::Connected,
                    )));
                    out.extend(self.on_connected());
                },
                ConnectionAction::Disconnected { reason } => {
                    tracing::info!(%reason, "disconnected");
                    out.push(SessionAction::Render(RenderEvent::ConnectionStatus(
                        ConnectionState::Disconnected,
                    )));
                },
                ConnectionAction::Deliver { topic, body, .. } => {
                    out.extend(self.deliver(&topic, &body));
                },
            }
        }
        out
    }

    fn deliver(&mut self, topic: &Topic, body: &[u8]) -> Vec<SessionAction> {
        let inbound = match Inbound::decode(topic, body) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!(%topic, error = %e, "dropping malformed frame");
                return Vec::new();
            },
        };

        match (inbound, topic.room()) {
            (Inbound::Message(message), Some(room)) => {
                let dispatched = self.dispatcher.on_live(room, message);
                render_dispatched(dispatched)
            },
            (Inbound::History(history), _) => {
                let dispatched = self.dispatcher.on_history(history);
                render_dispatched(dispatched)
            },
            (Inbound::Typing(signal), Some(_)) => {
                let now = self.env.now();
                if self.typing.observe_remote(&signal.username, signal.typing, now) {
                    vec![SessionAction::Render(RenderEvent::Typing(self.typing.indicator()))]
                } else {
                    Vec::new()
                }
            },
            (Inbound::Presence(presence), Some(room)) => {
                // Usernames are stored escaped by the broker
                let users = presence.users.iter().map(|u| unescape_html(u).into_owned()).collect();
                let snapshot = self.presence.on_presence_frame(room.clone(), users);
                let badge = self
                    .directory
                    .set_badge(&snapshot.room, snapshot.count)
                    .then(|| RenderEvent::RoomBadge { room: snapshot.room.clone(), count: snapshot.count });

                let mut out = vec![SessionAction::Render(RenderEvent::Presence {
                    room: snapshot.room,
                    users: snapshot.users,
                    count: snapshot.count,
                })];
                out.extend(badge.map(SessionAction::Render));
                out
            },
            (Inbound::OnlineCount(online), _) => {
                self.online_count = Some(online.count);
                vec![SessionAction::Render(RenderEvent::OnlineCount(online.count))]
            },
            (Inbound::Error(ServerError { message, code }), _) => {
                tracing::warn!(%message, code = code.as_deref(), "server reported error");
                Vec::new()
            },
            (inbound, None) => {
                tracing::debug!(%topic, ?inbound, "room payload on a global topic");
                Vec::new()
            },
        }
    }
}

fn render_dispatched(dispatched: Vec<Dispatched>) -> Vec<SessionAction> {
    dispatched
        .into_iter()
        .map(|d| match d {
            Dispatched::HistoryHeader { count } => RenderEvent::HistoryHeader { count },
            Dispatched::Message(message) => RenderEvent::Message(message),
        })
        .map(SessionAction::Render)
        .collect()
}
