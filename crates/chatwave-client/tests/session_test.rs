//! Session scenarios driven by hand.
//!
//! Frames are fed to the session directly and everything it emits is recorded,
//! so ordering of wire traffic and render events can be asserted exactly.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chatwave_client::{
    ConnectionState, DisplayMessage, Environment, Identity, RenderEvent, Room, RoomId, Session,
    SessionAction, SessionConfig,
};
use chatwave_proto::{Command, StompFrame};

#[derive(Clone)]
struct ManualEnv {
    now: Arc<Mutex<Instant>>,
}

impl ManualEnv {
    fn new() -> Self {
        Self { now: Arc::new(Mutex::new(Instant::now())) }
    }

    fn advance(&self, by: Duration) -> Instant {
        let mut now = self.now.lock().unwrap();
        *now += by;
        *now
    }
}

impl Environment for ManualEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        std::future::ready(())
    }
}

/// Session plus everything it has emitted.
struct Harness {
    env: ManualEnv,
    session: Session<ManualEnv>,
    sent: Vec<StompFrame>,
    rendered: Vec<RenderEvent>,
    /// destination -> subscription id, from SUBSCRIBE frames
    subscriptions: HashMap<String, String>,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        Self::with_identity("alice", config)
    }

    fn with_identity(username: &str, config: SessionConfig) -> Self {
        let env = ManualEnv::new();
        let identity = Identity::new(username).unwrap();
        Self {
            session: Session::new(env.clone(), identity, config),
            env,
            sent: Vec::new(),
            rendered: Vec::new(),
            subscriptions: HashMap::new(),
        }
    }

    fn connected() -> Self {
        Self::connected_as("alice")
    }

    fn connected_as(username: &str) -> Self {
        let config = SessionConfig { auto_join_first: false, ..SessionConfig::default() };
        let mut h = Self::with_identity(username, config);
        h.connect();
        h
    }

    fn record(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Transmit(frame) => {
                    if frame.command == Command::Subscribe {
                        let destination = frame.header("destination").unwrap().to_string();
                        let id = frame.header("id").unwrap().to_string();
                        self.subscriptions.insert(destination, id);
                    }
                    self.sent.push(frame);
                },
                SessionAction::Render(event) => self.rendered.push(event),
                SessionAction::Open | SessionAction::Close => {},
            }
        }
    }

    fn connect(&mut self) {
        let actions = self.session.connect();
        assert!(actions.contains(&SessionAction::Open));
        self.record(actions);
        let actions = self.session.transport_opened().unwrap();
        self.record(actions);
        self.accept();
    }

    fn accept(&mut self) {
        let actions = self.session.handle_frame(StompFrame::new(Command::Connected));
        self.record(actions);
    }

    fn deliver(&mut self, destination: &str, body: &str) {
        let id = self.subscriptions.get(destination).cloned().unwrap_or_default();
        let frame = StompFrame::new(Command::Message)
            .with_header("destination", destination)
            .with_header("subscription", id)
            .with_body(body.to_string());
        let actions = self.session.handle_frame(frame);
        self.record(actions);
    }

    fn join(&mut self, room: &str) {
        let actions = self.session.join(RoomId::new(room));
        self.record(actions);
    }

    fn take_sent(&mut self) -> Vec<String> {
        self.sent
            .drain(..)
            .map(|f| {
                let target = f.header("destination").or(f.header("id")).unwrap_or("");
                format!("{} {target}", f.command)
            })
            .collect()
    }

    fn take_rendered(&mut self) -> Vec<RenderEvent> {
        std::mem::take(&mut self.rendered)
    }

    fn messages(&self) -> Vec<String> {
        self.rendered
            .iter()
            .filter_map(|e| match e {
                RenderEvent::Message(m) => Some(m.content().to_string()),
                _ => None,
            })
            .collect()
    }
}

fn room(id: &str) -> Room {
    Room { id: RoomId::new(id), name: format!("#{id}"), description: String::new(), online_count: 0 }
}

fn chat_json(sender: &str, content: &str) -> String {
    format!(r#"{{"content":"{content}","sender":"{sender}","type":"CHAT"}}"#)
}

#[test]
fn first_connect_subscribes_global_topics() {
    let mut h = Harness::connected();
    let sent = h.take_sent();

    assert_eq!(sent, [
        "CONNECT ",
        "SUBSCRIBE /user/queue/errors",
        "SUBSCRIBE /user/queue/history",
        "SUBSCRIBE /topic/online-count",
    ]);
    assert!(h.rendered.contains(&RenderEvent::ConnectionStatus(ConnectionState::Connected)));
}

#[test]
fn join_sequence_is_ordered() {
    let mut h = Harness::connected();
    h.join("general");
    h.take_sent();

    h.join("random");
    assert_eq!(h.take_sent(), [
        "SEND /app/chat.leave",
        "UNSUBSCRIBE sub-3",
        "UNSUBSCRIBE sub-4",
        "UNSUBSCRIBE sub-5",
        "SUBSCRIBE /topic/room/random",
        "SUBSCRIBE /topic/room/random/typing",
        "SUBSCRIBE /topic/room/random/users",
        "SEND /app/chat.join",
    ]);

    h.join("random");
    assert!(h.take_sent().is_empty());
}

#[test]
fn history_renders_before_early_live_messages() {
    let mut h = Harness::connected();
    h.join("general");
    h.take_rendered();

    h.deliver("/topic/room/general", &chat_json("bob", "live"));
    assert!(h.messages().is_empty());

    let history = format!(
        r#"{{"roomId":"general","messages":[{},{}]}}"#,
        chat_json("bob", "old-1"),
        chat_json("alice", "old-2")
    );
    h.deliver("/user/queue/history", &history);

    assert_eq!(h.rendered[0], RenderEvent::HistoryHeader { count: 2 });
    assert_eq!(h.messages(), ["old-1", "old-2", "live"]);
    assert!(h.rendered.iter().any(|e| matches!(
        e,
        RenderEvent::Message(DisplayMessage::Chat { own: true, .. })
    )));
}

#[test]
fn late_frame_for_vacated_room_is_dropped() {
    let mut h = Harness::connected();
    h.join("general");
    h.deliver("/user/queue/history", r#"{"messages":[]}"#);
    h.join("random");
    h.take_rendered();

    // sub-3 belonged to general and is gone
    let frame = StompFrame::new(Command::Message)
        .with_header("subscription", "sub-3")
        .with_body(chat_json("bob", "stale"));
    let actions = h.session.handle_frame(frame);
    h.record(actions);

    assert!(h.messages().is_empty());
}

#[test]
fn presence_replaces_and_updates_badge() {
    let mut h = Harness::connected();
    let actions = h.session.load_rooms(vec![room("general"), room("random")]);
    h.record(actions);
    h.join("general");
    h.take_rendered();

    h.deliver("/topic/room/general/users", r#"{"users":[]}"#);
    h.deliver("/topic/room/general/users", r#"{"users":["a","b"]}"#);

    let counts: Vec<usize> = h
        .rendered
        .iter()
        .filter_map(|e| match e {
            RenderEvent::Presence { count, .. } => Some(*count),
            _ => None,
        })
        .collect();
    assert_eq!(counts, [0, 2]);
    assert_eq!(h.session.directory().badge(&RoomId::new("general")), Some(2));
    assert_eq!(h.session.online_users(), ["a".to_string(), "b".to_string()]);
}

#[test]
fn escaped_own_name_is_recognised() {
    let mut h = Harness::connected_as("<bob>");
    h.join("general");
    h.deliver("/user/queue/history", r#"{"messages":[]}"#);
    h.take_rendered();

    h.deliver("/topic/room/general", &chat_json("&lt;bob&gt;", "hi"));
    assert_eq!(h.take_rendered(), [RenderEvent::Message(DisplayMessage::Chat {
        sender: "<bob>".into(),
        content: "hi".into(),
        timestamp: None,
        own: true,
    })]);
}

#[test]
fn presence_names_are_unescaped_once() {
    let mut h = Harness::connected();
    h.join("general");
    h.take_rendered();

    h.deliver("/topic/room/general/users", r#"{"roomId":"general","users":["&lt;bob&gt;","ann","&amp;lt;x"]}"#);

    assert!(h.rendered.contains(&RenderEvent::Presence {
        room: RoomId::new("general"),
        users: vec!["<bob>".into(), "ann".into(), "&lt;x".into()],
        count: 3,
    }));
    assert_eq!(h.session.online_users(), ["<bob>".to_string(), "ann".to_string(), "&lt;x".to_string()]);
}

#[test]
fn presence_accepts_bare_user_list() {
    let mut h = Harness::connected();
    h.join("general");
    h.deliver("/topic/room/general/users", r#"{"users":["alice","ann"]}"#);
    h.take_rendered();

    h.deliver("/topic/room/general/users", r#"["alice"]"#);

    assert!(h.rendered.contains(&RenderEvent::Presence {
        room: RoomId::new("general"),
        users: vec!["alice".into()],
        count: 1,
    }));
    assert_eq!(h.session.online_users(), ["alice".to_string()]);
}

#[test]
fn typing_indicator_tracks_remote_users() {
    let mut h = Harness::connected();
    h.join("general");
    h.take_rendered();

    h.deliver("/topic/room/general/typing", r#"{"username":"bob","typing":true}"#);
    h.deliver("/topic/room/general/typing", r#"{"username":"alice","typing":true}"#);
    assert_eq!(h.take_rendered(), [RenderEvent::Typing(Some("bob is typing…".into()))]);

    let now = h.env.advance(Duration::from_millis(2500));
    let actions = h.session.tick(now);
    h.record(actions);
    assert_eq!(h.take_rendered(), [RenderEvent::Typing(None)]);
}

#[test]
fn local_typing_edges_only() {
    let mut h = Harness::connected();
    h.join("general");
    h.take_sent();

    for _ in 0..5 {
        h.env.advance(Duration::from_millis(100));
        let actions = h.session.input_changed(true);
        h.record(actions);
    }
    let starts: Vec<_> = h.sent.iter().filter(|f| f.body_str().unwrap().contains("true")).collect();
    assert_eq!(starts.len(), 1);
    h.take_sent();

    let now = h.env.advance(Duration::from_millis(2500));
    let actions = h.session.tick(now);
    h.record(actions);
    assert_eq!(h.sent.len(), 1);
    assert!(h.sent[0].body_str().unwrap().contains(r#""typing":false"#));
}

#[test]
fn send_message_trims_and_stops_typing() {
    let mut h = Harness::connected();
    h.join("general");
    let actions = h.session.input_changed(true);
    h.record(actions);
    h.take_sent();

    let actions = h.session.send_message("  hello  ");
    h.record(actions);

    assert_eq!(h.sent.len(), 2);
    assert_eq!(
        h.sent[0].body_str().unwrap(),
        r#"{"content":"hello","sender":"alice","roomId":"general"}"#
    );
    assert!(h.sent[1].body_str().unwrap().contains(r#""typing":false"#));
}

#[test]
fn send_message_rejects_blank_and_oversized() {
    let mut h = Harness::connected();
    assert!(h.session.send_message("hi").is_empty());

    h.join("general");
    h.take_sent();
    assert!(h.session.send_message("   ").is_empty());
    assert!(h.session.send_message(&"x".repeat(501)).is_empty());
    assert_eq!(h.session.send_message(&"x".repeat(500)).len(), 1);
}

#[test]
fn send_while_disconnected_is_dropped() {
    let mut h = Harness::connected();
    h.join("general");
    let actions = h.session.transport_closed("reset".into());
    h.record(actions);
    h.take_sent();

    let actions = h.session.send_message("hello");
    assert!(actions.is_empty());
}

#[test]
fn reconnect_restores_subscriptions_and_rejoins() {
    let mut h = Harness::connected();
    h.join("general");
    h.take_sent();

    let actions = h.session.transport_closed("reset".into());
    h.record(actions);
    assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);

    let now = h.env.advance(Duration::from_millis(3000));
    let actions = h.session.tick(now);
    assert!(actions.contains(&SessionAction::Open));
    let actions = h.session.transport_opened().unwrap();
    h.record(actions);
    h.take_rendered();
    h.accept();

    let sent = h.take_sent();
    assert_eq!(sent.iter().filter(|s| s.starts_with("SUBSCRIBE")).count(), 6);
    assert_eq!(sent.last().map(String::as_str), Some("SEND /app/chat.join"));
    assert!(h.rendered.contains(&RenderEvent::MessagesCleared));
    assert!(h.session.is_awaiting_history());
}

#[test]
fn rooms_loaded_while_connected_auto_join_first() {
    let mut h = Harness::new(SessionConfig::default());
    h.connect();
    h.take_sent();

    let actions = h.session.load_rooms(vec![room("general"), room("random")]);
    h.record(actions);

    assert_eq!(h.session.current_room(), Some(&RoomId::new("general")));
    assert!(h.rendered.contains(&RenderEvent::RoomEntered {
        room: RoomId::new("general"),
        name: "#general".into()
    }));
}

#[test]
fn server_errors_are_not_rendered() {
    let mut h = Harness::connected();
    h.take_rendered();
    h.deliver("/user/queue/errors", r#"{"message":"Room not found","code":"NOT_FOUND"}"#);
    h.deliver("/topic/online-count", "not json");
    assert!(h.rendered.is_empty());

    h.deliver("/topic/online-count", r#"{"count":12}"#);
    assert_eq!(h.rendered, [RenderEvent::OnlineCount(12)]);
}
