//! In-memory STOMP broker.
//!
//! Behaves like the ChatWave server as seen from a client: it accepts
//! `CONNECT`, tracks subscriptions per connection, and answers the four
//! application destinations.
//!
//! - `chat.join`: history to the joiner, then a JOIN notice and the user list
//!   to the room
//! - `chat.send`: sanitized chat message to the room
//! - `chat.typing`: signal forwarded to the room typing topic
//! - `chat.leave`: LEAVE notice and user list to the room
//!
//! Deliveries only reach connections subscribed to the destination, exactly
//! as a real broker would drop traffic for topics nobody listens to.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chatwave_proto::{
    Command, Destination, History, Membership, MessageKind, MessagePayload, OnlineCount, Presence,
    Room, RoomId, SendMessage, ServerError, StompFrame, Topic, TypingSignal,
};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Serialize, de::DeserializeOwned};

/// Messages returned in a join's history.
pub const HISTORY_LIMIT: usize = 50;

/// Sender name on JOIN and LEAVE notices.
pub const SYSTEM_SENDER: &str = "System";

/// First message timestamp, 2023-11-14T22:13:20.
const EPOCH_OFFSET_SECS: i64 = 1_700_000_000;

/// Broker-side connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u64);

#[derive(Debug, Default)]
struct Connection {
    login: Option<String>,
    accepted: bool,
    /// Subscription id to destination
    subscriptions: BTreeMap<String, String>,
    /// Username and room from the last valid join
    member: Option<(String, RoomId)>,
    outbox: VecDeque<StompFrame>,
    received: Vec<StompFrame>,
}

/// In-memory broker shared by every simulated client.
#[derive(Debug, Default)]
pub struct SimBroker {
    rooms: Vec<Room>,
    history: HashMap<RoomId, Vec<MessagePayload>>,
    connections: BTreeMap<ConnId, Connection>,
    next_conn: u64,
    next_message: i64,
    refuse_connections: bool,
    hold_history: bool,
    held: Vec<(ConnId, String)>,
}

impl SimBroker {
    /// Broker serving `rooms`.
    pub fn new(rooms: Vec<Room>) -> Self {
        Self { rooms, ..Self::default() }
    }

    /// Broker with the server's seeded rooms.
    pub fn with_default_rooms() -> Self {
        let room = |id: &str, name: &str, description: &str| Room {
            id: RoomId::new(id),
            name: name.to_string(),
            description: description.to_string(),
            online_count: 0,
        };
        Self::new(vec![
            room("general", "# general", "General discussion"),
            room("tech", "# tech", "Tech talk"),
            room("random", "# random", "Anything goes"),
            room("announcements", "📢 announcements", "Official announcements"),
        ])
    }

    /// Room directory with live online counts.
    pub fn rooms(&self) -> Vec<Room> {
        self.rooms
            .iter()
            .map(|room| Room {
                online_count: u32::try_from(self.users_in(&room.id).len()).unwrap_or(u32::MAX),
                ..room.clone()
            })
            .collect()
    }

    /// Refuse new connections until cleared.
    pub fn set_refuse_connections(&mut self, refuse: bool) {
        self.refuse_connections = refuse;
    }

    /// Withhold history deliveries until [`Self::release_history`].
    pub fn set_hold_history(&mut self, hold: bool) {
        self.hold_history = hold;
    }

    /// Deliver every withheld history payload.
    pub fn release_history(&mut self) {
        for (conn, body) in std::mem::take(&mut self.held) {
            self.deliver_raw(conn, &Topic::History, &body);
        }
    }

    /// Accept a new transport connection.
    pub fn open(&mut self) -> Option<ConnId> {
        if self.refuse_connections {
            tracing::debug!("broker refusing connection");
            return None;
        }
        self.next_conn += 1;
        let conn = ConnId(self.next_conn);
        self.connections.insert(conn, Connection::default());
        Some(conn)
    }

    /// Whether the connection is still open.
    pub fn is_open(&self, conn: ConnId) -> bool {
        self.connections.contains_key(&conn)
    }

    /// Tear down a connection, as on a socket close or network loss.
    ///
    /// The room's users are broadcast as a bare array, the way the server's
    /// disconnect listener sends them.
    pub fn drop_connection(&mut self, conn: ConnId) {
        let Some(connection) = self.connections.remove(&conn) else {
            return;
        };
        self.held.retain(|(held, _)| *held != conn);

        if let Some((username, room)) = connection.member {
            tracing::debug!(%username, %room, "member disconnected");
            let users = self.users_in(&room);
            self.broadcast(&Topic::RoomPresence(room), &users);
            let count = u32::try_from(self.online_usernames().len()).unwrap_or(u32::MAX);
            self.broadcast(&Topic::OnlineCount, &OnlineCount { count });
        }
    }

    /// Next frame queued for a connection.
    pub fn pop_frame(&mut self, conn: ConnId) -> Option<StompFrame> {
        self.connections.get_mut(&conn)?.outbox.pop_front()
    }

    /// Every frame the connection has sent, in order.
    pub fn received(&self, conn: ConnId) -> &[StompFrame] {
        self.connections.get(&conn).map(|c| c.received.as_slice()).unwrap_or_default()
    }

    /// Login the connection presented in `CONNECT`.
    pub fn login(&self, conn: ConnId) -> Option<&str> {
        self.connections.get(&conn)?.login.as_deref()
    }

    /// Destinations the connection is subscribed to, one entry per
    /// subscription.
    pub fn subscriptions(&self, conn: ConnId) -> Vec<String> {
        self.connections
            .get(&conn)
            .map(|c| c.subscriptions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Room the connection last joined.
    pub fn member_room(&self, conn: ConnId) -> Option<&RoomId> {
        self.connections.get(&conn)?.member.as_ref().map(|(_, room)| room)
    }

    /// Usernames in `room`, sorted and distinct.
    pub fn users_in(&self, room: &RoomId) -> Vec<String> {
        self.connections
            .values()
            .filter_map(|c| c.member.as_ref())
            .filter(|(_, r)| r == room)
            .map(|(username, _)| username.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Stored messages for `room`, oldest first.
    pub fn history(&self, room: &RoomId) -> &[MessagePayload] {
        self.history.get(room).map(Vec::as_slice).unwrap_or_default()
    }

    /// Store a message in `room` without broadcasting it.
    pub fn seed_message(&mut self, room: &RoomId, sender: &str, content: &str) {
        let message = self.message(room, sender, content, MessageKind::Chat);
        self.store(room, message);
    }

    /// Chat message from a user with no connection, broadcast to the room.
    pub fn inject_chat(&mut self, room: &RoomId, sender: &str, content: &str) {
        let message = self.message(room, sender, content, MessageKind::Chat);
        self.store(room, message.clone());
        self.broadcast(&Topic::RoomMessages(room.clone()), &message);
    }

    /// Typing signal from a user with no connection.
    pub fn inject_typing(&mut self, room: &RoomId, username: &str, typing: bool) {
        let signal =
            TypingSignal { username: username.to_string(), room_id: Some(room.clone()), typing };
        self.broadcast(&Topic::RoomTyping(room.clone()), &signal);
    }

    /// Open a connection for another user and join `room` with it.
    pub fn add_member(&mut self, username: &str, room: &RoomId) -> Option<ConnId> {
        let conn = self.open()?;
        self.receive(conn, StompFrame::connect("localhost", username));
        let join = Membership { username: username.to_string(), room_id: room.clone() };
        self.on_join(conn, join);
        Some(conn)
    }

    /// Process a frame sent by a connection.
    pub fn receive(&mut self, conn: ConnId, frame: StompFrame) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            tracing::warn!(?conn, command = %frame.command, "frame on closed connection");
            return;
        };
        connection.received.push(frame.clone());

        match frame.command {
            Command::Connect | Command::Stomp => {
                connection.login = frame.header("login").map(str::to_string);
                connection.accepted = true;
                connection.outbox.push_back(
                    StompFrame::new(Command::Connected)
                        .with_header("version", "1.2")
                        .with_header("heart-beat", "0,0"),
                );
            },
            _ if !connection.accepted => {
                tracing::warn!(?conn, command = %frame.command, "frame before CONNECT");
            },
            Command::Subscribe => {
                match (frame.header("id"), frame.header("destination")) {
                    (Some(id), Some(destination)) => {
                        connection.subscriptions.insert(id.to_string(), destination.to_string());
                    },
                    _ => tracing::warn!(?conn, "SUBSCRIBE without id or destination"),
                }
            },
            Command::Unsubscribe => {
                if let Some(id) = frame.header("id") {
                    connection.subscriptions.remove(id);
                }
            },
            Command::Send => self.on_send(conn, &frame),
            Command::Disconnect => self.drop_connection(conn),
            other => tracing::warn!(?conn, command = %other, "unexpected client frame"),
        }
    }

    fn on_send(&mut self, conn: ConnId, frame: &StompFrame) {
        let Some(destination) = frame.header("destination") else {
            tracing::warn!(?conn, "SEND without destination");
            return;
        };

        match destination {
            d if d == Destination::Join.path() => {
                if let Some(join) = parse::<Membership>(frame) {
                    self.on_join(conn, join);
                }
            },
            d if d == Destination::Leave.path() => {
                if let Some(leave) = parse::<Membership>(frame) {
                    self.on_leave(conn, leave);
                }
            },
            d if d == Destination::Send.path() => {
                if let Some(send) = parse::<SendMessage>(frame) {
                    self.on_chat(send);
                }
            },
            d if d == Destination::Typing.path() => {
                if let Some(signal) = parse::<TypingSignal>(frame) {
                    self.on_typing(signal);
                }
            },
            other => tracing::warn!(?conn, destination = other, "SEND to unknown destination"),
        }
    }

    fn on_join(&mut self, conn: ConnId, join: Membership) {
        let username = sanitize(&join.username);
        let room = join.room_id;
        if username.is_empty() || !self.rooms.iter().any(|r| r.id == room) {
            self.deliver(conn, &Topic::Errors, &ServerError {
                message: "Invalid username or room ID".to_string(),
                code: Some("BAD_REQUEST".to_string()),
            });
            return;
        }

        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.member = Some((username.clone(), room.clone()));
        }
        tracing::debug!(%username, %room, "joined");

        let stored = self.history(&room);
        let recent = stored[stored.len().saturating_sub(HISTORY_LIMIT)..].to_vec();
        let history = History { room_id: Some(room.clone()), messages: recent };
        match serde_json::to_string(&history) {
            Ok(body) if self.hold_history => self.held.push((conn, body)),
            Ok(body) => self.deliver_raw(conn, &Topic::History, &body),
            Err(e) => tracing::error!(error = %e, "failed to encode history"),
        }

        let notice =
            self.message(&room, SYSTEM_SENDER, &format!("{username} joined the room"), MessageKind::Join);
        self.store(&room, notice.clone());
        self.broadcast(&Topic::RoomMessages(room.clone()), &notice);
        self.broadcast_users(&room);
    }

    fn on_leave(&mut self, conn: ConnId, leave: Membership) {
        let username = sanitize(&leave.username);
        let room = leave.room_id;
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.member = None;
        }

        let notice =
            self.message(&room, SYSTEM_SENDER, &format!("{username} left the room"), MessageKind::Leave);
        self.store(&room, notice.clone());
        self.broadcast(&Topic::RoomMessages(room.clone()), &notice);
        self.broadcast_users(&room);
    }

    fn on_chat(&mut self, send: SendMessage) {
        let content = sanitize(&send.content);
        let sender = sanitize(&send.sender);
        if content.is_empty() || sender.is_empty() {
            return;
        }

        let message = self.message(&send.room_id, &sender, &content, MessageKind::Chat);
        self.store(&send.room_id, message.clone());
        self.broadcast(&Topic::RoomMessages(send.room_id), &message);
    }

    fn on_typing(&mut self, signal: TypingSignal) {
        let Some(room) = signal.room_id.clone() else {
            return;
        };
        self.broadcast(&Topic::RoomTyping(room), &signal);
    }

    fn broadcast_users(&mut self, room: &RoomId) {
        let presence = Presence { room_id: Some(room.clone()), users: self.users_in(room) };
        self.broadcast(&Topic::RoomPresence(room.clone()), &presence);
    }

    fn online_usernames(&self) -> BTreeSet<&str> {
        self.connections
            .values()
            .filter_map(|c| c.member.as_ref())
            .map(|(username, _)| username.as_str())
            .collect()
    }

    fn message(
        &mut self,
        room: &RoomId,
        sender: &str,
        content: &str,
        kind: MessageKind,
    ) -> MessagePayload {
        self.next_message += 1;
        MessagePayload {
            id: Some(self.next_message),
            content: content.to_string(),
            sender: sender.to_string(),
            room_id: Some(room.clone()),
            kind,
            timestamp: Some(timestamp(self.next_message)),
        }
    }

    fn store(&mut self, room: &RoomId, message: MessagePayload) {
        self.history.entry(room.clone()).or_default().push(message);
    }

    fn broadcast<T: Serialize>(&mut self, topic: &Topic, payload: &T) {
        let Ok(body) = serde_json::to_string(payload) else {
            tracing::error!(%topic, "failed to encode payload");
            return;
        };
        let conns: Vec<ConnId> = self.connections.keys().copied().collect();
        for conn in conns {
            self.deliver_raw(conn, topic, &body);
        }
    }

    fn deliver<T: Serialize>(&mut self, conn: ConnId, topic: &Topic, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(body) => self.deliver_raw(conn, topic, &body),
            Err(e) => tracing::error!(%topic, error = %e, "failed to encode payload"),
        }
    }

    fn deliver_raw(&mut self, conn: ConnId, topic: &Topic, body: &str) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };
        let destination = topic.path();
        let ids: Vec<String> = connection
            .subscriptions
            .iter()
            .filter(|(_, d)| **d == destination)
            .map(|(id, _)| id.clone())
            .collect();

        for id in ids {
            self.next_message += 1;
            let frame = StompFrame::new(Command::Message)
                .with_header("destination", destination.as_str())
                .with_header("subscription", id)
                .with_header("message-id", self.next_message.to_string())
                .with_header("content-type", "application/json")
                .with_body(body.to_string());
            connection.outbox.push_back(frame);
        }
    }
}

fn parse<T: DeserializeOwned>(frame: &StompFrame) -> Option<T> {
    match serde_json::from_slice(&frame.body) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!(error = %e, "malformed SEND body");
            None
        },
    }
}

/// Trim and escape markup characters. Ampersands pass through.
fn sanitize(input: &str) -> String {
    input.trim().replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn timestamp(seq: i64) -> NaiveDateTime {
    DateTime::<Utc>::UNIX_EPOCH.naive_utc() + TimeDelta::seconds(EPOCH_OFFSET_SECS + seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribe(broker: &mut SimBroker, conn: ConnId, id: &str, topic: &Topic) {
        broker.receive(conn, StompFrame::subscribe(id, &topic.path()));
    }

    fn drain(broker: &mut SimBroker, conn: ConnId) -> Vec<StompFrame> {
        std::iter::from_fn(|| broker.pop_frame(conn)).collect()
    }

    #[test]
    fn connect_is_answered() {
        let mut broker = SimBroker::with_default_rooms();
        let conn = broker.open().unwrap();
        broker.receive(conn, StompFrame::connect("localhost", "alice"));

        let frames = drain(&mut broker, conn);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(broker.login(conn), Some("alice"));
    }

    #[test]
    fn join_sends_history_then_notice_then_users() {
        let mut broker = SimBroker::with_default_rooms();
        let room = RoomId::new("general");
        broker.seed_message(&room, "bob", "earlier");

        let conn = broker.open().unwrap();
        broker.receive(conn, StompFrame::connect("localhost", "alice"));
        subscribe(&mut broker, conn, "sub-1", &Topic::History);
        for (i, topic) in Topic::room_topics(&room).iter().enumerate() {
            subscribe(&mut broker, conn, &format!("sub-{}", i + 2), topic);
        }
        drain(&mut broker, conn);

        let join = Membership { username: "alice".into(), room_id: room.clone() };
        broker.on_join(conn, join);

        let destinations: Vec<_> = drain(&mut broker, conn)
            .iter()
            .map(|f| f.header("destination").unwrap_or_default().to_string())
            .collect();
        assert_eq!(destinations, [
            "/user/queue/history",
            "/topic/room/general",
            "/topic/room/general/users"
        ]);
        assert_eq!(broker.users_in(&room), ["alice"]);
        assert_eq!(broker.history(&room).len(), 2);
    }

    #[test]
    fn unknown_room_is_an_error() {
        let mut broker = SimBroker::with_default_rooms();
        let conn = broker.open().unwrap();
        broker.receive(conn, StompFrame::connect("localhost", "alice"));
        subscribe(&mut broker, conn, "sub-1", &Topic::Errors);
        drain(&mut broker, conn);

        broker.on_join(conn, Membership { username: "alice".into(), room_id: "nowhere".into() });

        let frames = drain(&mut broker, conn);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].body_str().unwrap().contains("BAD_REQUEST"));
        assert_eq!(broker.member_room(conn), None);
    }

    #[test]
    fn chat_is_sanitized() {
        let mut broker = SimBroker::with_default_rooms();
        let room = RoomId::new("general");
        broker.on_chat(SendMessage {
            content: "  <b>hi</b> & \"bye\" ".into(),
            sender: "alice".into(),
            room_id: room.clone(),
        });

        assert_eq!(broker.history(&room)[0].content, "&lt;b&gt;hi&lt;/b&gt; & &quot;bye&quot;");
    }

    #[test]
    fn history_is_capped() {
        let mut broker = SimBroker::with_default_rooms();
        let room = RoomId::new("tech");
        for i in 0..60 {
            broker.seed_message(&room, "bob", &format!("m{i}"));
        }

        let conn = broker.open().unwrap();
        broker.receive(conn, StompFrame::connect("localhost", "alice"));
        subscribe(&mut broker, conn, "sub-1", &Topic::History);
        drain(&mut broker, conn);
        broker.on_join(conn, Membership { username: "alice".into(), room_id: room });

        let frames = drain(&mut broker, conn);
        let history: History = serde_json::from_slice(&frames[0].body).unwrap();
        assert_eq!(history.messages.len(), HISTORY_LIMIT);
        assert_eq!(history.messages[0].content, "m10");
    }

    #[test]
    fn dropping_a_member_updates_presence() {
        let mut broker = SimBroker::with_default_rooms();
        let room = RoomId::new("general");
        let bob = broker.add_member("bob", &room).unwrap();
        let carol = broker.add_member("carol", &room).unwrap();
        assert_eq!(broker.rooms()[0].online_count, 2);

        subscribe(&mut broker, carol, "sub-9", &Topic::RoomPresence(room.clone()));
        drain(&mut broker, carol);

        broker.drop_connection(bob);
        assert!(!broker.is_open(bob));
        assert_eq!(broker.users_in(&room), ["carol"]);
        assert!(broker.is_open(carol));

        let frames = drain(&mut broker, carol);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body_str().unwrap(), r#"["carol"]"#);
    }
}
