//! Online-user sets per room.
//!
//! Every presence frame carries the full membership list, so each frame
//! replaces the previous set outright. Frames are taken at face value in
//! arrival order; there are no sequence numbers to reorder by.

use std::collections::HashMap;

use chatwave_proto::RoomId;

/// Membership of one room after a presence frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    /// Room the snapshot describes
    pub room: RoomId,
    /// Online usernames, in broker order
    pub users: Vec<String>,
    /// Number of online users
    pub count: usize,
}

/// Last-received-wins presence state.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    rooms: HashMap<RoomId, Vec<String>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `room`'s user set with `users`.
    pub fn on_presence_frame(&mut self, room: RoomId, users: Vec<String>) -> PresenceSnapshot {
        let count = users.len();
        tracing::trace!(%room, count, "presence update");
        self.rooms.insert(room.clone(), users.clone());
        PresenceSnapshot { room, users, count }
    }

    /// Online users in `room`, empty if no frame has arrived.
    pub fn users(&self, room: &RoomId) -> &[String] {
        self.rooms.get(room).map_or(&[], Vec::as_slice)
    }

    /// Number of online users in `room`.
    pub fn count(&self, room: &RoomId) -> usize {
        self.users(room).len()
    }

    /// Forget `room`.
    pub fn clear(&mut self, room: &RoomId) {
        self.rooms.remove(room);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn frames_replace_wholesale() {
        let room = RoomId::new("general");
        let mut presence = PresenceTracker::new();

        presence.on_presence_frame(room.clone(), users(&["x", "y", "z"]));
        let empty = presence.on_presence_frame(room.clone(), Vec::new());
        assert_eq!(empty.count, 0);

        let two = presence.on_presence_frame(room.clone(), users(&["a", "b"]));
        assert_eq!(two.count, 2);
        assert_eq!(presence.users(&room), users(&["a", "b"]).as_slice());
    }

    #[test]
    fn rooms_are_independent() {
        let general = RoomId::new("general");
        let random = RoomId::new("random");
        let mut presence = PresenceTracker::new();

        presence.on_presence_frame(general.clone(), users(&["a"]));
        presence.on_presence_frame(random.clone(), users(&["b", "c"]));
        presence.clear(&general);

        assert_eq!(presence.count(&general), 0);
        assert_eq!(presence.count(&random), 2);
    }
}
