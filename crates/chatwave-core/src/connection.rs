//! Connection manager state machine.
//!
//! Owns the single broker connection: the STOMP handshake, the subscription
//! table, publishing, and reconnection. Uses the action pattern: methods take
//! time as input and return actions for the driver to execute. Nothing here
//! performs I/O.
//!
//! # State Machine
//!
//! ```text
//!                 connect()            CONNECTED frame
//! ┌──────────────┐ ──────> ┌────────────┐ ──────> ┌───────────┐
//! │ Disconnected │         │ Connecting │         │ Connected │
//! └──────────────┘ <────── └────────────┘         └───────────┘
//!        ↑  │     failure (retry armed)                 │
//!        │  └─ retry timer fires ─> connect()           │
//!        └──────────────────────────────────────────────┘
//!                   transport lost / ERROR (retry armed)
//! ```
//!
//! # Subscriptions
//!
//! Subscriptions are logical and survive transport loss. An entry is
//! `active` once its `SUBSCRIBE` has been sent on the current transport. When a
//! transport drops, every entry goes inactive; when the next transport reaches
//! `Connected`, every inactive entry is re-sent before [`ConnectionAction::Connected`]
//! is emitted. Frames for ids not in the table (already unsubscribed) are
//! dropped, so a torn-down handler never sees a late frame.

use std::{collections::BTreeMap, fmt, time::Duration};

use bytes::Bytes;
use chatwave_proto::{Command, Outbound, StompFrame, Topic};

use crate::{
    env::Moment,
    error::ConnectionError,
    timer::{TimerId, TimerService},
};

/// Delay between a failed attempt and the next one. Flat, no backoff.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Subscription ids are sent as `sub-<n>`.
const SUBSCRIPTION_PREFIX: &str = "sub-";

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Wait before retrying after a failure
    pub reconnect_delay: Duration,
    /// Virtual host sent in `CONNECT`
    pub host: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { reconnect_delay: DEFAULT_RECONNECT_DELAY, host: "localhost".to_string() }
    }
}

/// Connection state. Owned exclusively by [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport, possibly waiting for a retry
    Disconnected,
    /// Transport opening or handshake in flight
    Connecting,
    /// Broker accepted the session
    Connected,
}

/// Identifier of one subscription, unique for the lifetime of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn parse(raw: &str) -> Option<Self> {
        raw.strip_prefix(SUBSCRIPTION_PREFIX)?.parse().ok().map(Self)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SUBSCRIPTION_PREFIX}{}", self.0)
    }
}

/// Handle returned by [`ConnectionManager::subscribe`].
///
/// Not `Clone`: [`Subscription::unsubscribe`] consumes the handle, so a
/// subscription is withdrawn at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
}

impl Subscription {
    /// Subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Topic this subscription listens on.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Withdraw the subscription.
    pub fn unsubscribe<I: Moment>(
        self,
        connection: &mut ConnectionManager<I>,
    ) -> Vec<ConnectionAction> {
        connection.unsubscribe(self.id)
    }
}

#[derive(Debug, Clone)]
struct SubscriptionEntry {
    topic: Topic,
    active: bool,
}

/// Actions returned by the connection state machine.
///
/// Transport actions (`Open`, `Transmit`, `Close`) are for the driver; the
/// rest are events for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a transport to the broker
    Open,
    /// Send this frame over the transport
    Transmit(StompFrame),
    /// Close the transport
    Close,
    /// Broker accepted the session
    Connected,
    /// Connection failed or was lost
    Disconnected {
        /// Why
        reason: String,
    },
    /// Frame arrived on a live subscription
    Deliver {
        /// Subscription the broker addressed
        subscription: SubscriptionId,
        /// Topic of that subscription
        topic: Topic,
        /// Raw body
        body: Bytes,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Retry;

/// Connection state machine.
#[derive(Debug, Clone)]
pub struct ConnectionManager<I> {
    login: String,
    config: ConnectionConfig,
    state: ConnectionState,
    subscriptions: BTreeMap<SubscriptionId, SubscriptionEntry>,
    next_subscription: u64,
    timers: TimerService<Retry, I>,
    /// Pending retry. At most one exists at any time.
    retry: Option<TimerId>,
    /// Failed attempts since the last successful connect
    failures: u64,
}

impl<I: Moment> ConnectionManager<I> {
    /// Create a manager in [`ConnectionState::Disconnected`].
    ///
    /// `login` is the identity announced in `CONNECT`.
    pub fn new(login: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            login: login.into(),
            config,
            state: ConnectionState::Disconnected,
            subscriptions: BTreeMap::new(),
            next_subscription: 0,
            timers: TimerService::new(),
            retry: None,
            failures: 0,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether publishes currently reach the broker.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Deadline of the pending retry, if any.
    pub fn retry_deadline(&self) -> Option<I> {
        self.retry.and_then(|id| self.timers.deadline(id))
    }

    /// Earliest time [`Self::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<I> {
        self.timers.next_deadline()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether any subscription listens on `topic`.
    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.subscriptions.values().any(|entry| &entry.topic == topic)
    }

    /// Begin connecting. No-op unless disconnected.
    ///
    /// Cancels any pending retry: an explicit connect starts a new attempt
    /// chain.
    pub fn connect(&mut self) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Disconnected {
            tracing::debug!(state = ?self.state, "connect ignored");
            return Vec::new();
        }

        self.cancel_retry();
        self.state = ConnectionState::Connecting;
        vec![ConnectionAction::Open]
    }

    /// The driver opened the transport. Starts the STOMP handshake.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if no connect is in progress
    pub fn transport_opened(&mut self) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "complete transport open".to_string(),
            });
        }

        Ok(vec![ConnectionAction::Transmit(StompFrame::connect(&self.config.host, &self.login))])
    }

    /// The transport failed to open, or an open transport was lost.
    ///
    /// Arms exactly one retry. Ignored when already disconnected, so a late
    /// close notification cannot arm a second retry.
    pub fn transport_failed(&mut self, reason: impl Into<String>, now: I) -> Vec<ConnectionAction> {
        let reason = reason.into();
        if self.state == ConnectionState::Disconnected {
            tracing::debug!(%reason, "transport failure while disconnected");
            return Vec::new();
        }

        self.state = ConnectionState::Disconnected;
        self.failures += 1;
        self.deactivate_subscriptions();
        self.cancel_retry();
        self.retry = Some(self.timers.schedule_after(Retry, now, self.config.reconnect_delay));

        tracing::warn!(
            %reason,
            failures = self.failures,
            retry_in = ?self.config.reconnect_delay,
            "connection lost"
        );
        vec![ConnectionAction::Disconnected { reason }]
    }

    /// Graceful shutdown. Does not arm a retry.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        self.cancel_retry();
        let previous = self.state;
        self.state = ConnectionState::Disconnected;
        self.deactivate_subscriptions();

        let reason = "client disconnect".to_string();
        match previous {
            ConnectionState::Connected => vec![
                ConnectionAction::Transmit(StompFrame::disconnect()),
                ConnectionAction::Close,
                ConnectionAction::Disconnected { reason },
            ],
            ConnectionState::Connecting => {
                vec![ConnectionAction::Close, ConnectionAction::Disconnected { reason }]
            },
            ConnectionState::Disconnected => Vec::new(),
        }
    }

    /// Fire the retry timer if it is due.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        for (id, Retry) in self.timers.fire_due(now) {
            if self.retry != Some(id) {
                continue;
            }
            self.retry = None;
            tracing::info!(attempt = self.failures + 1, "retrying connection");
            actions.extend(self.connect());
        }
        actions
    }

    /// Publish. Silently dropped unless connected; there is no queue.
    pub fn send(&mut self, outbound: Outbound) -> Vec<ConnectionAction> {
        let destination = outbound.destination().path();
        if self.state != ConnectionState::Connected {
            tracing::debug!(destination, state = ?self.state, "publish dropped while not connected");
            return Vec::new();
        }

        match outbound.into_frame() {
            Ok(frame) => vec![ConnectionAction::Transmit(frame)],
            Err(e) => {
                tracing::warn!(destination, error = %e, "failed to encode publish");
                Vec::new()
            },
        }
    }

    /// Register interest in `topic`.
    ///
    /// The `SUBSCRIBE` goes out now if connected, otherwise when the next
    /// transport completes its handshake.
    pub fn subscribe(&mut self, topic: Topic) -> (Subscription, Vec<ConnectionAction>) {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;

        let active = self.state == ConnectionState::Connected;
        let actions = if active {
            vec![ConnectionAction::Transmit(StompFrame::subscribe(&id.to_string(), &topic.path()))]
        } else {
            Vec::new()
        };

        tracing::debug!(subscription = %id, %topic, active, "subscribe");
        self.subscriptions.insert(id, SubscriptionEntry { topic: topic.clone(), active });
        (Subscription { id, topic }, actions)
    }

    /// Withdraw a subscription. Frames for it are dropped from now on.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Vec<ConnectionAction> {
        match self.subscriptions.remove(&id) {
            Some(entry) if entry.active => {
                tracing::debug!(subscription = %id, topic = %entry.topic, "unsubscribe");
                vec![ConnectionAction::Transmit(StompFrame::unsubscribe(&id.to_string()))]
            },
            Some(_) => Vec::new(),
            None => {
                tracing::debug!(subscription = %id, "unsubscribe for unknown subscription");
                Vec::new()
            },
        }
    }

    /// Process a frame from the broker.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::UnexpectedFrame` if the command is invalid for the
    ///   current state
    /// - `ConnectionError::Protocol` if a `MESSAGE` lacks its subscription
    /// - `ConnectionError::BadSubscriptionId` if the subscription id is not one
    ///   we issue
    pub fn handle_frame(
        &mut self,
        frame: StompFrame,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        match frame.command {
            Command::Connected => self.handle_connected(),
            Command::Message => self.handle_message(frame),
            Command::Error => {
                let message = frame.header("message").unwrap_or("broker error").to_string();
                tracing::warn!(%message, body = ?frame.body_str().ok(), "broker reported error");

                let mut actions = vec![ConnectionAction::Close];
                actions.extend(self.transport_failed(message, now));
                Ok(actions)
            },
            Command::Receipt => Ok(Vec::new()),
            command => Err(ConnectionError::UnexpectedFrame { state: self.state, command }),
        }
    }

    fn handle_connected(&mut self) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::UnexpectedFrame {
                state: self.state,
                command: Command::Connected,
            });
        }

        self.state = ConnectionState::Connected;
        self.cancel_retry();
        if self.failures > 0 {
            tracing::info!(failures = self.failures, "reconnected");
        }
        self.failures = 0;

        let mut actions = Vec::new();
        for (id, entry) in &mut self.subscriptions {
            if !entry.active {
                entry.active = true;
                actions.push(ConnectionAction::Transmit(StompFrame::subscribe(
                    &id.to_string(),
                    &entry.topic.path(),
                )));
            }
        }
        actions.push(ConnectionAction::Connected);
        Ok(actions)
    }

    fn handle_message(&mut self, frame: StompFrame) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::UnexpectedFrame {
                state: self.state,
                command: Command::Message,
            });
        }

        let raw = frame.required_header("subscription")?;
        let id = SubscriptionId::parse(raw)
            .ok_or_else(|| ConnectionError::BadSubscriptionId(raw.to_string()))?;

        match self.subscriptions.get(&id) {
            Some(entry) if entry.active => Ok(vec![ConnectionAction::Deliver {
                subscription: id,
                topic: entry.topic.clone(),
                body: frame.body,
            }]),
            _ => {
                tracing::debug!(subscription = %id, "dropping frame for inactive subscription");
                Ok(Vec::new())
            },
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(id) = self.retry.take() {
            self.timers.cancel(id);
        }
    }

    fn deactivate_subscriptions(&mut self) {
        for entry in self.subscriptions.values_mut() {
            entry.active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chatwave_proto::{Membership, RoomId};

    use super::*;

    const RETRY: Duration = DEFAULT_RECONNECT_DELAY;

    fn connected_frame() -> StompFrame {
        StompFrame::new(Command::Connected).with_header("version", "1.2")
    }

    fn message(subscription: &str, body: &'static str) -> StompFrame {
        StompFrame::new(Command::Message)
            .with_header("subscription", subscription)
            .with_body(body)
    }

    fn connected(t0: Instant) -> ConnectionManager<Instant> {
        let mut conn = ConnectionManager::new("alice", ConnectionConfig::default());
        conn.connect();
        conn.transport_opened().unwrap();
        conn.handle_frame(connected_frame(), t0).unwrap();
        conn
    }

    fn join(room: &str) -> Outbound {
        Outbound::Join(Membership { username: "alice".into(), room_id: RoomId::new(room) })
    }

    #[test]
    fn handshake() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new("alice", ConnectionConfig::default());

        assert_eq!(conn.connect(), vec![ConnectionAction::Open]);
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let actions = conn.transport_opened().unwrap();
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Transmit(f)] if f.command == Command::Connect && f.header("login") == Some("alice")
        ));

        let actions = conn.handle_frame(connected_frame(), t0).unwrap();
        assert_eq!(actions, vec![ConnectionAction::Connected]);
        assert!(conn.is_connected());
    }

    #[test]
    fn connect_is_idempotent_while_in_progress() {
        let mut conn: ConnectionManager<Instant> =
            ConnectionManager::new("alice", ConnectionConfig::default());
        conn.connect();
        assert!(conn.connect().is_empty());
    }

    #[test]
    fn transport_opened_requires_connecting() {
        let mut conn: ConnectionManager<Instant> =
            ConnectionManager::new("alice", ConnectionConfig::default());
        let err = conn.transport_opened().unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidState { state: ConnectionState::Disconnected, .. }));
    }

    #[test]
    fn failed_connect_schedules_exactly_one_retry() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new("alice", ConnectionConfig::default());
        conn.connect();

        let actions = conn.transport_failed("refused", t0);
        assert!(matches!(actions.as_slice(), [ConnectionAction::Disconnected { .. }]));
        assert_eq!(conn.retry_deadline(), Some(t0 + RETRY));

        // A duplicate close notification must not arm a second retry
        assert!(conn.transport_failed("refused again", t0).is_empty());

        assert!(conn.tick(t0 + RETRY - Duration::from_millis(1)).is_empty());
        assert_eq!(conn.tick(t0 + RETRY), vec![ConnectionAction::Open]);
        assert!(conn.tick(t0 + RETRY * 10).is_empty());
    }

    #[test]
    fn retry_interval_is_flat() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new("alice", ConnectionConfig::default());
        conn.connect();

        let mut now = t0;
        for _ in 0..5 {
            conn.transport_failed("refused", now);
            assert_eq!(conn.retry_deadline(), Some(now + RETRY));
            now += RETRY;
            assert_eq!(conn.tick(now), vec![ConnectionAction::Open]);
        }
    }

    #[test]
    fn successful_connect_cancels_pending_retry() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new("alice", ConnectionConfig::default());
        conn.connect();
        conn.transport_failed("refused", t0);

        // Explicit connect before the retry fires
        conn.connect();
        assert_eq!(conn.retry_deadline(), None);
        conn.transport_opened().unwrap();
        conn.handle_frame(connected_frame(), t0).unwrap();

        assert!(conn.tick(t0 + RETRY * 2).is_empty());
        assert_eq!(conn.next_deadline(), None);
    }

    #[test]
    fn send_while_disconnected_is_silent_noop() {
        let mut conn: ConnectionManager<Instant> =
            ConnectionManager::new("alice", ConnectionConfig::default());
        assert!(conn.send(join("general")).is_empty());

        conn.connect();
        assert!(conn.send(join("general")).is_empty());
    }

    #[test]
    fn send_while_connected_transmits() {
        let mut conn = connected(Instant::now());
        let actions = conn.send(join("general"));
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Transmit(f)] if f.header("destination") == Some("/app/chat.join")
        ));
    }

    #[test]
    fn subscribe_delivers_and_unsubscribe_drops() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        let topic = Topic::RoomMessages(RoomId::new("general"));

        let (sub, actions) = conn.subscribe(topic.clone());
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Transmit(f)] if f.command == Command::Subscribe && f.header("id") == Some("sub-0")
        ));

        let delivered = conn.handle_frame(message("sub-0", "{}"), t0).unwrap();
        assert!(matches!(
            delivered.as_slice(),
            [ConnectionAction::Deliver { topic: t, .. }] if *t == topic
        ));

        let actions = sub.unsubscribe(&mut conn);
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Transmit(f)] if f.command == Command::Unsubscribe
        ));

        // Late in-flight frame for the withdrawn subscription
        assert!(conn.handle_frame(message("sub-0", "{}"), t0).unwrap().is_empty());
    }

    #[test]
    fn same_topic_may_be_subscribed_twice() {
        let mut conn = connected(Instant::now());
        let topic = Topic::OnlineCount;
        let (a, _) = conn.subscribe(topic.clone());
        let (b, _) = conn.subscribe(topic.clone());

        assert_ne!(a.id(), b.id());
        assert_eq!(conn.subscription_count(), 2);
        a.unsubscribe(&mut conn);
        assert!(conn.is_subscribed(&topic));
    }

    #[test]
    fn subscriptions_are_restored_after_reconnect() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        let (_global, _) = conn.subscribe(Topic::Errors);
        let (_room, _) = conn.subscribe(Topic::RoomMessages(RoomId::new("general")));

        conn.transport_failed("reset by peer", t0);
        assert!(conn.handle_frame(message("sub-0", "{}"), t0).is_err());

        assert_eq!(conn.tick(t0 + RETRY), vec![ConnectionAction::Open]);
        conn.transport_opened().unwrap();
        let actions = conn.handle_frame(connected_frame(), t0 + RETRY).unwrap();

        let ids: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::Transmit(f) if f.command == Command::Subscribe => f.header("id"),
                _ => None,
            })
            .collect();
        assert_eq!(ids, ["sub-0", "sub-1"]);
        assert_eq!(actions.last(), Some(&ConnectionAction::Connected));
    }

    #[test]
    fn subscribe_while_disconnected_is_sent_on_connect() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new("alice", ConnectionConfig::default());
        let (_sub, actions) = conn.subscribe(Topic::History);
        assert!(actions.is_empty());

        conn.connect();
        conn.transport_opened().unwrap();
        let actions = conn.handle_frame(connected_frame(), t0).unwrap();
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn unsubscribe_while_disconnected_sends_nothing() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        let (sub, _) = conn.subscribe(Topic::History);
        conn.transport_failed("gone", t0);

        assert!(sub.unsubscribe(&mut conn).is_empty());
        assert_eq!(conn.subscription_count(), 0);
    }

    #[test]
    fn error_frame_closes_and_retries() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        let error = StompFrame::new(Command::Error).with_header("message", "bad frame");

        let actions = conn.handle_frame(error, t0).unwrap();
        assert_eq!(actions, vec![ConnectionAction::Close, ConnectionAction::Disconnected {
            reason: "bad frame".into()
        }]);
        assert_eq!(conn.retry_deadline(), Some(t0 + RETRY));
    }

    #[test]
    fn graceful_disconnect_does_not_retry() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        let actions = conn.disconnect();
        assert!(matches!(actions.first(), Some(ConnectionAction::Transmit(f)) if f.command == Command::Disconnect));
        assert_eq!(conn.next_deadline(), None);
        assert!(conn.transport_failed("closed", t0).is_empty());
    }

    #[test]
    fn unexpected_frames_are_rejected() {
        let t0 = Instant::now();
        let mut conn: ConnectionManager<Instant> =
            ConnectionManager::new("alice", ConnectionConfig::default());

        assert!(matches!(
            conn.handle_frame(connected_frame(), t0),
            Err(ConnectionError::UnexpectedFrame { command: Command::Connected, .. })
        ));

        let mut conn = connected(t0);
        assert!(matches!(
            conn.handle_frame(StompFrame::new(Command::Send), t0),
            Err(ConnectionError::UnexpectedFrame { command: Command::Send, .. })
        ));
        assert!(matches!(
            conn.handle_frame(message("nope", "{}"), t0),
            Err(ConnectionError::BadSubscriptionId(_))
        ));
    }
}
