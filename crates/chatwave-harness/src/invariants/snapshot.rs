//! Observable state captured for invariant checks.

use chatwave_client::{ConnectionState, Environment, RenderEvent, RoomId, Session};

/// One session as seen from outside: its own state, what the broker holds
/// for its connection, and everything it has rendered.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Local username.
    pub username: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Room the session believes it is in.
    pub current_room: Option<RoomId>,
    /// Whether live messages are held back waiting for history.
    pub awaiting_history: bool,
    /// Destinations the broker has on record for the session's connection.
    /// `None` with no open connection.
    pub broker_subscriptions: Option<Vec<String>>,
    /// Render events in the order they were produced.
    pub rendered: Vec<RenderEvent>,
}

impl SessionSnapshot {
    /// Snapshot of a session that has never connected.
    pub fn empty(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            state: ConnectionState::Disconnected,
            current_room: None,
            awaiting_history: false,
            broker_subscriptions: None,
            rendered: Vec::new(),
        }
    }

    /// Capture a live session.
    pub fn capture<E: Environment>(
        session: &Session<E>,
        broker_subscriptions: Option<Vec<String>>,
        rendered: Vec<RenderEvent>,
    ) -> Self {
        Self {
            username: session.identity().username().to_string(),
            state: session.connection_state(),
            current_room: session.current_room().cloned(),
            awaiting_history: session.is_awaiting_history(),
            broker_subscriptions,
            rendered,
        }
    }

    /// Render events after the last one matching `marker`, or all of them if
    /// none matches.
    pub fn rendered_since(&self, marker: impl Fn(&RenderEvent) -> bool) -> &[RenderEvent] {
        let start = self.rendered.iter().rposition(marker).map_or(0, |i| i + 1);
        &self.rendered[start..]
    }
}
