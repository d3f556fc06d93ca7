//! Connection registry
//!
//! Tracks every open transport channel, its outbound sink, and the room and
//! display name it is currently associated with.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::server::ServerMessage;

/// Identifier of a room as supplied by clients
pub type RoomId = String;

/// Outbound half of a connection's message queue
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Stable identity of one open transport channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors that can occur during registry operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connection not found: {0}")]
    UnknownConnection(ConnectionId),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Room and display name a connection has taken on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub room_id: RoomId,
    pub name: String,
}

/// One registered connection
#[derive(Debug)]
pub struct Connection {
    outbox: Outbox,
    membership: Option<Membership>,
}

impl Connection {
    /// Room and name, once the connection has created or joined a room
    pub fn membership(&self) -> Option<&Membership> {
        self.membership.as_ref()
    }
}

/// Registry of open connections keyed by identity
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened connection that has not joined a room yet
    pub fn attach(&mut self, id: ConnectionId, outbox: Outbox) {
        self.connections.insert(
            id,
            Connection {
                outbox,
                membership: None,
            },
        );
        debug!("Attached connection {}, total: {}", id, self.connections.len());
    }

    /// Associate a connection with a room and display name.
    ///
    /// Returns the membership it replaced, if any.
    pub fn register(
        &mut self,
        id: ConnectionId,
        room_id: impl Into<RoomId>,
        name: impl Into<String>,
    ) -> RegistryResult<Option<Membership>> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        Ok(connection.membership.replace(Membership {
            room_id: room_id.into(),
            name: name.into(),
        }))
    }

    /// Resolve the membership of a connection
    pub fn lookup(&self, id: ConnectionId) -> Option<&Membership> {
        self.connections.get(&id).and_then(Connection::membership)
    }

    /// Stop tracking a connection, returning its record
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id);
        if removed.is_some() {
            debug!("Removed connection {}, remaining: {}", id, self.connections.len());
        }
        removed
    }

    /// Queue a message for one connection.
    ///
    /// Returns false if the connection is unknown or its channel is closed.
    pub fn send(&self, id: ConnectionId, message: ServerMessage) -> bool {
        match self.connections.get(&id) {
            Some(connection) => connection.outbox.send(message).is_ok(),
            None => false,
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Number of open connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
