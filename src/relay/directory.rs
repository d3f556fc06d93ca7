//! Room directory
//!
//! Maps room identifiers to their ordered member lists. How a second create
//! under an existing identifier behaves is set by [`DuplicateRoomPolicy`].

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use super::{ConnectionId, RoomId};
use crate::config::{DuplicateRoomPolicy, RoomSettings};

/// Errors that can occur during directory operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Room already exists: {0}")]
    RoomExists(RoomId),

    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),
}

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// A named broadcast group
#[derive(Debug, Clone, Default)]
pub struct Room {
    members: Vec<ConnectionId>,
}

impl Room {
    pub fn members(&self) -> &[ConnectionId] {
        &self.members
    }
}

/// Position of one room in the directory.
///
/// Only valid until the directory is next mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRef {
    pub room_id: RoomId,
    slot: usize,
}

/// Directory of rooms keyed by identifier.
///
/// Each identifier holds one room, or several in creation order under
/// [`DuplicateRoomPolicy::Shadow`].
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, Vec<Room>>,
    settings: RoomSettings,
}

impl RoomDirectory {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            rooms: HashMap::new(),
            settings,
        }
    }

    /// Check whether `create` would succeed, without mutating anything
    pub fn check_create(&self, room_id: &str) -> DirectoryResult<()> {
        match self.settings.duplicate_create {
            DuplicateRoomPolicy::Reject if self.contains(room_id) => {
                Err(DirectoryError::RoomExists(room_id.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Create a room under `room_id`
    pub fn create(&mut self, room_id: &str) -> DirectoryResult<RoomRef> {
        let slots = self.rooms.entry(room_id.to_string()).or_default();

        let slot = match (slots.is_empty(), self.settings.duplicate_create) {
            (true, _) | (false, DuplicateRoomPolicy::Shadow) => {
                slots.push(Room::default());
                slots.len() - 1
            }
            (false, DuplicateRoomPolicy::Reuse) => 0,
            (false, DuplicateRoomPolicy::Reject) => {
                return Err(DirectoryError::RoomExists(room_id.to_string()))
            }
        };

        debug!("Room {} created in slot {}", room_id, slot);
        Ok(RoomRef {
            room_id: room_id.to_string(),
            slot,
        })
    }

    /// Find the earliest-created room with this identifier
    pub fn find(&self, room_id: &str) -> Option<RoomRef> {
        self.rooms
            .get(room_id)
            .filter(|slots| !slots.is_empty())
            .map(|_| RoomRef {
                room_id: room_id.to_string(),
                slot: 0,
            })
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.find(room_id).is_some()
    }

    fn room(&self, room: &RoomRef) -> Option<&Room> {
        self.rooms.get(&room.room_id)?.get(room.slot)
    }

    /// Append a connection to a room's member list.
    ///
    /// A connection already in the room is not added twice.
    pub fn add_member(&mut self, room: &RoomRef, id: ConnectionId) -> DirectoryResult<()> {
        let target = self
            .rooms
            .get_mut(&room.room_id)
            .and_then(|slots| slots.get_mut(room.slot))
            .ok_or_else(|| DirectoryError::RoomNotFound(room.room_id.clone()))?;

        if !target.members.contains(&id) {
            target.members.push(id);
        }
        Ok(())
    }

    /// Remove a connection from every room under `room_id`.
    ///
    /// Rooms left empty are deleted when pruning is enabled. Returns whether
    /// the connection was a member anywhere.
    pub fn remove_member(&mut self, room_id: &str, id: ConnectionId) -> bool {
        let Some(slots) = self.rooms.get_mut(room_id) else {
            return false;
        };

        let mut removed = false;
        for room in slots.iter_mut() {
            let before = room.members.len();
            room.members.retain(|member| *member != id);
            removed |= room.members.len() != before;
        }

        if self.settings.prune_empty {
            slots.retain(|room| !room.members.is_empty());
            if slots.is_empty() {
                self.rooms.remove(room_id);
                debug!("Removed empty room {}", room_id);
            }
        }

        removed
    }

    /// Members of a room, in join order
    pub fn members(&self, room: &RoomRef) -> &[ConnectionId] {
        self.room(room).map(Room::members).unwrap_or(&[])
    }

    /// Number of rooms, counting shadowed duplicates
    pub fn len(&self) -> usize {
        self.rooms.values().map(Vec::len).sum()
    }
}
