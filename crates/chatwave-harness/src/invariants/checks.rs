//! Concrete invariant implementations.

use std::collections::{BTreeSet, HashMap};

use chatwave_client::{ConnectionState, RenderEvent};
use chatwave_proto::Topic;

use super::{Invariant, InvariantResult, SessionSnapshot, Violation};

/// While connected, the broker holds exactly the current room's three topics
/// and no other room topic.
pub struct RoomSubscriptionsMatchMembership;

impl Invariant for RoomSubscriptionsMatchMembership {
    fn name(&self) -> &'static str {
        "room_subscriptions_match_membership"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let Some(subscriptions) = connected_subscriptions(state) else {
            return Ok(());
        };

        let actual: BTreeSet<String> = subscriptions
            .iter()
            .filter(|d| Topic::parse(d).is_ok_and(|t| t.room().is_some()))
            .cloned()
            .collect();
        let expected: BTreeSet<String> = state
            .current_room
            .iter()
            .flat_map(Topic::room_topics)
            .map(|t| t.path())
            .collect();

        if actual == expected {
            Ok(())
        } else {
            Err(Violation {
                invariant: self.name(),
                message: format!(
                    "{}: room {:?}, broker has {actual:?}",
                    state.username, state.current_room
                ),
            })
        }
    }
}

/// While connected, the error, history, and online-count topics are
/// subscribed.
pub struct GlobalSubscriptionsPresent;

impl Invariant for GlobalSubscriptionsPresent {
    fn name(&self) -> &'static str {
        "global_subscriptions_present"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let Some(subscriptions) = connected_subscriptions(state) else {
            return Ok(());
        };

        let missing: Vec<String> = Topic::global_topics()
            .iter()
            .map(Topic::path)
            .filter(|path| !subscriptions.contains(path))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Violation {
                invariant: self.name(),
                message: format!("{}: missing {missing:?}", state.username),
            })
        }
    }
}

/// No destination is subscribed twice on one connection.
pub struct NoDuplicateSubscriptions;

impl Invariant for NoDuplicateSubscriptions {
    fn name(&self) -> &'static str {
        "no_duplicate_subscriptions"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let Some(subscriptions) = &state.broker_subscriptions else {
            return Ok(());
        };

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for destination in subscriptions {
            *counts.entry(destination.as_str()).or_default() += 1;
        }

        match counts.into_iter().find(|(_, n)| *n > 1) {
            None => Ok(()),
            Some((destination, n)) => Err(Violation {
                invariant: self.name(),
                message: format!("{}: {destination} subscribed {n} times", state.username),
            }),
        }
    }
}

/// Nothing of a room episode is shown before its history.
pub struct HistoryBeforeLive;

impl Invariant for HistoryBeforeLive {
    fn name(&self) -> &'static str {
        "history_before_live"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        if !state.awaiting_history {
            return Ok(());
        }

        let episode = state.rendered_since(|e| matches!(e, RenderEvent::MessagesCleared));
        match episode.iter().find(|e| matches!(e, RenderEvent::Message(_))) {
            None => Ok(()),
            Some(early) => Err(Violation {
                invariant: self.name(),
                message: format!("{}: rendered {early:?} before history", state.username),
            }),
        }
    }
}

/// Once out of every room, no room traffic is rendered.
pub struct NoMessagesOutsideRoom;

impl Invariant for NoMessagesOutsideRoom {
    fn name(&self) -> &'static str {
        "no_messages_outside_room"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        if state.current_room.is_some() {
            return Ok(());
        }

        let since_left = state.rendered_since(|e| matches!(e, RenderEvent::RoomLeft { .. }));
        let stray = since_left.iter().find(|e| {
            matches!(
                e,
                RenderEvent::Message(_) | RenderEvent::HistoryHeader { .. } | RenderEvent::Presence { .. }
            )
        });
        match stray {
            None => Ok(()),
            Some(event) => Err(Violation {
                invariant: self.name(),
                message: format!("{}: rendered {event:?} with no room", state.username),
            }),
        }
    }
}

/// Presence renders carry a count equal to their user list.
pub struct PresenceCountMatchesUsers;

impl Invariant for PresenceCountMatchesUsers {
    fn name(&self) -> &'static str {
        "presence_count_matches_users"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        for event in &state.rendered {
            if let RenderEvent::Presence { room, users, count } = event
                && users.len() != *count
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{room}: count {count} for {} users", users.len()),
                });
            }
        }
        Ok(())
    }
}

fn connected_subscriptions(state: &SessionSnapshot) -> Option<&Vec<String>> {
    if state.state != ConnectionState::Connected {
        return None;
    }
    state.broker_subscriptions.as_ref()
}

#[cfg(test)]
mod tests {
    use chatwave_client::{DisplayMessage, RoomId};

    use super::*;

    fn connected(room: Option<&str>, subscriptions: &[&str]) -> SessionSnapshot {
        SessionSnapshot {
            state: ConnectionState::Connected,
            current_room: room.map(RoomId::new),
            broker_subscriptions: Some(subscriptions.iter().map(ToString::to_string).collect()),
            ..SessionSnapshot::empty("alice")
        }
    }

    const GLOBAL: [&str; 3] = ["/user/queue/errors", "/user/queue/history", "/topic/online-count"];

    #[test]
    fn room_subscriptions_follow_current_room() {
        let mut subscriptions = GLOBAL.to_vec();
        subscriptions.extend([
            "/topic/room/general",
            "/topic/room/general/typing",
            "/topic/room/general/users",
        ]);

        assert!(RoomSubscriptionsMatchMembership.check(&connected(Some("general"), &subscriptions)).is_ok());
        assert!(RoomSubscriptionsMatchMembership.check(&connected(Some("random"), &subscriptions)).is_err());
        assert!(RoomSubscriptionsMatchMembership.check(&connected(None, &GLOBAL)).is_ok());
        assert!(GlobalSubscriptionsPresent.check(&connected(None, &GLOBAL[..2])).is_err());
    }

    #[test]
    fn duplicate_destination_is_a_violation() {
        let snapshot = connected(None, &["/user/queue/errors", "/user/queue/errors"]);
        assert!(NoDuplicateSubscriptions.check(&snapshot).is_err());
    }

    #[test]
    fn early_message_is_a_violation() {
        let message = RenderEvent::Message(DisplayMessage::Chat {
            sender: "bob".into(),
            content: "hi".into(),
            timestamp: None,
            own: false,
        });
        let mut snapshot = connected(Some("general"), &GLOBAL);
        snapshot.awaiting_history = true;
        snapshot.rendered = vec![message.clone(), RenderEvent::MessagesCleared];
        assert!(HistoryBeforeLive.check(&snapshot).is_ok());

        snapshot.rendered.push(message);
        assert!(HistoryBeforeLive.check(&snapshot).is_err());
    }
}
