//! Room directory.
//!
//! Room snapshots are immutable once fetched and replaced wholesale on
//! refresh. Online badges live beside them: a badge starts at the directory's
//! fetch-time count and is overwritten by presence frames.

use std::collections::HashMap;

use chatwave_proto::{Room, RoomId};

/// Ordered list of rooms with live online badges.
#[derive(Debug, Clone, Default)]
pub struct RoomDirectory {
    rooms: Vec<Room>,
    badges: HashMap<RoomId, usize>,
}

impl RoomDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every room. Badges reset to the fetched counts.
    pub fn replace(&mut self, rooms: Vec<Room>) {
        self.badges = rooms.iter().map(|r| (r.id.clone(), r.online_count as usize)).collect();
        self.rooms = rooms;
    }

    /// Rooms in directory order.
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// First listed room.
    pub fn first(&self) -> Option<&Room> {
        self.rooms.first()
    }

    /// Look up a room by id.
    pub fn get(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| &r.id == id)
    }

    /// Display name of `id`, falling back to the id itself.
    pub fn display_name(&self, id: &RoomId) -> String {
        self.get(id).map_or_else(|| id.to_string(), |r| r.name.clone())
    }

    /// Update the online badge for `id`. Returns `false` for unlisted rooms.
    pub fn set_badge(&mut self, id: &RoomId, count: usize) -> bool {
        match self.badges.get_mut(id) {
            Some(badge) => {
                *badge = count;
                true
            },
            None => false,
        }
    }

    /// Current online badge for `id`.
    pub fn badge(&self, id: &RoomId) -> Option<usize> {
        self.badges.get(id).copied()
    }

    /// Number of rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no rooms are listed.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
