//! Room membership state machine.
//!
//! # States
//!
//! ```text
//!            join(r)                 join(s), s != r
//! ┌──────┐ ─────────> ┌───────────┐ ────────────────> ┌───────────┐
//! │ Idle │            │ Member(r) │                   │ Member(s) │
//! └──────┘ <───────── └───────────┘                   └───────────┘
//!            leave()
//! ```
//!
//! # Switching rooms
//!
//! A switch runs to completion in one call, in this order:
//!
//! 1. publish `chat.leave` for the old room
//! 2. unsubscribe every topic of the old room
//! 3. clear the old room's typing and presence state
//! 4. subscribe the new room's message, typing, and presence topics
//! 5. publish `chat.join` for the new room
//!
//! Unsubscribing first means a late frame for the old room finds no handler.
//! Subscribing before the join means nothing the broker sends in reaction to
//! the join can be missed.
//!
//! Publishes are silently dropped while disconnected; the transition still
//! completes locally.

use chatwave_core::{
    ConnectionAction, ConnectionManager, Moment, PresenceTracker, Subscription, TypingAggregator,
};
use chatwave_proto::{Membership, Outbound, RoomId, Topic};

/// Components a room transition touches.
pub struct RoomScope<'a, I> {
    /// Transport owner
    pub connection: &'a mut ConnectionManager<I>,
    /// Typing state of the current room
    pub typing: &'a mut TypingAggregator<I>,
    /// Online users per room
    pub presence: &'a mut PresenceTracker,
}

#[derive(Debug)]
enum RoomState {
    Idle,
    Member {
        room: RoomId,
        /// Message, typing, and presence subscriptions, in that order
        subscriptions: [Subscription; 3],
    },
}

/// Tracks the current room and owns its subscriptions.
#[derive(Debug)]
pub struct RoomController {
    state: RoomState,
}

impl Default for RoomController {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomController {
    /// Start with no current room.
    pub fn new() -> Self {
        Self { state: RoomState::Idle }
    }

    /// Current room, if any.
    pub fn current(&self) -> Option<&RoomId> {
        match &self.state {
            RoomState::Idle => None,
            RoomState::Member { room, .. } => Some(room),
        }
    }

    /// Topics subscribed for the current room.
    pub fn topics(&self) -> Vec<&Topic> {
        match &self.state {
            RoomState::Idle => Vec::new(),
            RoomState::Member { subscriptions, .. } => {
                subscriptions.iter().map(Subscription::topic).collect()
            },
        }
    }

    /// Enter `room`, leaving the current one first. No-op if `room` is
    /// already current.
    pub fn join<I: Moment>(
        &mut self,
        room: RoomId,
        username: &str,
        scope: RoomScope<'_, I>,
    ) -> Vec<ConnectionAction> {
        if self.current() == Some(&room) {
            tracing::debug!(%room, "already in room");
            return Vec::new();
        }

        let RoomScope { connection, typing, presence } = scope;
        let mut actions = self.teardown(username, connection, typing, presence);

        let subscriptions = Topic::room_topics(&room).map(|topic| {
            let (subscription, subscribe) = connection.subscribe(topic);
            actions.extend(subscribe);
            subscription
        });

        actions.extend(connection.send(Outbound::Join(Membership {
            username: username.to_string(),
            room_id: room.clone(),
        })));

        tracing::info!(%room, connected = connection.is_connected(), "entered room");
        self.state = RoomState::Member { room, subscriptions };
        actions
    }

    /// Leave the current room and return to idle. No-op when idle.
    pub fn leave<I: Moment>(&mut self, username: &str, scope: RoomScope<'_, I>) -> Vec<ConnectionAction> {
        let RoomScope { connection, typing, presence } = scope;
        self.teardown(username, connection, typing, presence)
    }

    /// Re-announce the current room after a reconnect. Subscriptions are
    /// restored by the connection itself.
    pub fn rejoin<I: Moment>(
        &self,
        username: &str,
        connection: &mut ConnectionManager<I>,
    ) -> Vec<ConnectionAction> {
        match &self.state {
            RoomState::Idle => Vec::new(),
            RoomState::Member { room, .. } => {
                tracing::info!(%room, "re-announcing room after reconnect");
                connection.send(Outbound::Join(Membership {
                    username: username.to_string(),
                    room_id: room.clone(),
                }))
            },
        }
    }

    fn teardown<I: Moment>(
        &mut self,
        username: &str,
        connection: &mut ConnectionManager<I>,
        typing: &mut TypingAggregator<I>,
        presence: &mut PresenceTracker,
    ) -> Vec<ConnectionAction> {
        let RoomState::Member { room, subscriptions } =
            std::mem::replace(&mut self.state, RoomState::Idle)
        else {
            return Vec::new();
        };

        let mut actions = connection.send(Outbound::Leave(Membership {
            username: username.to_string(),
            room_id: room.clone(),
        }));
        for subscription in subscriptions {
            actions.extend(subscription.unsubscribe(connection));
        }
        typing.clear();
        presence.clear(&room);

        tracing::info!(%room, "left room");
        actions
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chatwave_core::{ConnectionConfig, DEFAULT_TYPING_IDLE};
    use chatwave_proto::{Command, StompFrame};

    use super::*;

    struct Fixture {
        connection: ConnectionManager<Instant>,
        typing: TypingAggregator<Instant>,
        presence: PresenceTracker,
        rooms: RoomController,
    }

    impl Fixture {
        fn connected() -> Self {
            let now = Instant::now();
            let mut connection = ConnectionManager::new("alice", ConnectionConfig::default());
            connection.connect();
            connection.transport_opened().unwrap();
            connection
                .handle_frame(StompFrame::new(Command::Connected), now)
                .unwrap();
            Self {
                connection,
                typing: TypingAggregator::new("alice", DEFAULT_TYPING_IDLE),
                presence: PresenceTracker::new(),
                rooms: RoomController::new(),
            }
        }

        fn join(&mut self, room: &str) -> Vec<ConnectionAction> {
            let scope = RoomScope {
                connection: &mut self.connection,
                typing: &mut self.typing,
                presence: &mut self.presence,
            };
            self.rooms.join(RoomId::new(room), "alice", scope)
        }

        fn leave(&mut self) -> Vec<ConnectionAction> {
            let scope = RoomScope {
                connection: &mut self.connection,
                typing: &mut self.typing,
                presence: &mut self.presence,
            };
            self.rooms.leave("alice", scope)
        }
    }

    /// Render transmitted frames as `COMMAND target` for order assertions.
    fn wire(actions: &[ConnectionAction]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::Transmit(f) => {
                    let target = f.header("destination").or(f.header("id")).unwrap_or("");
                    Some(format!("{} {target}", f.command))
                },
                _ => None,
            })
            .collect()
    }

    #[test]
    fn join_subscribes_before_announcing() {
        let mut fx = Fixture::connected();
        let actions = fx.join("general");

        assert_eq!(wire(&actions), [
            "SUBSCRIBE /topic/room/general",
            "SUBSCRIBE /topic/room/general/typing",
            "SUBSCRIBE /topic/room/general/users",
            "SEND /app/chat.join",
        ]);
        assert_eq!(fx.rooms.current(), Some(&RoomId::new("general")));
    }

    #[test]
    fn rejoining_current_room_is_noop() {
        let mut fx = Fixture::connected();
        fx.join("general");
        assert!(fx.join("general").is_empty());
        assert_eq!(fx.connection.subscription_count(), 3);
    }

    #[test]
    fn switch_tears_down_before_setup() {
        let mut fx = Fixture::connected();
        fx.join("general");
        let actions = fx.join("random");

        assert_eq!(wire(&actions), [
            "SEND /app/chat.leave",
            "UNSUBSCRIBE sub-0",
            "UNSUBSCRIBE sub-1",
            "UNSUBSCRIBE sub-2",
            "SUBSCRIBE /topic/room/random",
            "SUBSCRIBE /topic/room/random/typing",
            "SUBSCRIBE /topic/room/random/users",
            "SEND /app/chat.join",
        ]);
        assert_eq!(fx.connection.subscription_count(), 3);
        assert!(!fx.connection.is_subscribed(&Topic::RoomMessages(RoomId::new("general"))));
    }

    #[test]
    fn switch_clears_room_state() {
        let now = Instant::now();
        let mut fx = Fixture::connected();
        fx.join("general");
        fx.typing.observe_remote("bob", true, now);
        fx.presence.on_presence_frame(RoomId::new("general"), vec!["bob".into()]);

        fx.join("random");
        assert_eq!(fx.typing.indicator(), None);
        assert_eq!(fx.typing.next_deadline(), None);
        assert_eq!(fx.presence.count(&RoomId::new("general")), 0);
    }

    #[test]
    fn leave_returns_to_idle() {
        let mut fx = Fixture::connected();
        fx.join("general");
        let actions = fx.leave();

        assert_eq!(wire(&actions)[0], "SEND /app/chat.leave");
        assert_eq!(fx.rooms.current(), None);
        assert_eq!(fx.connection.subscription_count(), 0);
        assert!(fx.leave().is_empty());
    }

    #[test]
    fn transition_completes_while_disconnected() {
        let mut fx = Fixture::connected();
        fx.connection.transport_failed("gone", Instant::now());

        assert!(fx.join("general").is_empty());
        assert_eq!(fx.rooms.current(), Some(&RoomId::new("general")));
        assert_eq!(fx.rooms.topics().len(), 3);
    }
}
