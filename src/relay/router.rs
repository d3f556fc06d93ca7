//! Message router
//!
//! Decodes inbound envelopes, applies them to the connection registry and
//! room directory, and fans out the resulting server messages.
//!
//! All state sits behind a single mutex so that a create, join, chat or
//! disconnect is applied as one step relative to every other connection.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    ConnectionId, ConnectionRegistry, DirectoryError, Outbox, RegistryError, RoomDirectory,
    RoomRef,
};
use crate::config::RelayConfig;
use crate::server::{self, ClientMessage, ErrorCode, Inbound, ServerMessage};

/// Reply text for a join targeting a missing room
pub const ROOM_NOT_FOUND: &str = "Room not found";

/// Reply text for a create rejected under the reject policy
pub const ROOM_EXISTS: &str = "Room already exists";

/// Errors that can occur while routing one envelope
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
}

/// Result type for router operations
pub type RouterResult<T> = Result<T, RouterError>;

impl From<&DirectoryError> for ServerMessage {
    fn from(err: &DirectoryError) -> Self {
        match err {
            DirectoryError::RoomExists(_) => {
                ServerMessage::error_with_code(ROOM_EXISTS, ErrorCode::RoomExists)
            }
            DirectoryError::RoomNotFound(_) => {
                ServerMessage::error_with_code(ROOM_NOT_FOUND, ErrorCode::RoomNotFound)
            }
        }
    }
}

/// Everything guarded by the router lock
struct RouterState {
    connections: ConnectionRegistry,
    rooms: RoomDirectory,
    last_timestamp: u64,
}

impl RouterState {
    /// Current wall-clock time in milliseconds, never earlier than the last
    /// timestamp handed out
    fn next_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        self.last_timestamp = self.last_timestamp.max(now);
        self.last_timestamp
    }

    /// Drop the connection's current room membership, if any
    fn leave_current_room(&mut self, id: ConnectionId) {
        let Some(room_id) = self.connections.lookup(id).map(|m| m.room_id.clone()) else {
            return;
        };
        if self.rooms.remove_member(&room_id, id) {
            debug!("Connection {} left room {}", id, room_id);
        }
    }

    /// Register the connection under `room_id` and append it to the room
    fn enter_room(
        &mut self,
        id: ConnectionId,
        room: &RoomRef,
        username: &str,
    ) -> RouterResult<()> {
        self.connections.register(id, room.room_id.as_str(), username)?;
        self.rooms.add_member(room, id)?;
        Ok(())
    }
}

/// Routes client envelopes between connections and rooms
pub struct MessageRouter {
    state: Mutex<RouterState>,
    report_malformed: bool,
}

impl MessageRouter {
    /// Create a new router
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            state: Mutex::new(RouterState {
                connections: ConnectionRegistry::new(),
                rooms: RoomDirectory::new(config.rooms.clone()),
                last_timestamp: 0,
            }),
            report_malformed: config.protocol.report_malformed,
        }
    }

    /// Track a newly accepted connection
    pub async fn connect(&self, id: ConnectionId, outbox: Outbox) {
        self.state.lock().await.connections.attach(id, outbox);
    }

    /// Tear down a closed connection.
    ///
    /// Removes it from the registry and from its room's member list.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut state = self.state.lock().await;
        state.leave_current_room(id);
        state.connections.remove(id);
    }

    /// Number of open connections
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Number of rooms in the directory
    pub async fn room_count(&self) -> usize {
        self.state.lock().await.rooms.len()
    }

    /// Handle one inbound text frame from a connection.
    ///
    /// Malformed frames are logged and dropped, or answered with an error
    /// envelope when reporting is enabled. Nothing here is fatal to the
    /// connection.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        match server::decode(text) {
            Ok(Inbound::Message(message)) => {
                if let Err(e) = self.dispatch(id, message).await {
                    warn!("Failed to route message from {}: {}", id, e);
                }
            }
            Ok(Inbound::Unrecognized(kind)) => {
                debug!("Ignoring message of unknown type {:?} from {}", kind, id);
            }
            Err(e) => {
                warn!("Rejected malformed message from {}: {}", id, e);
                if self.report_malformed {
                    self.state.lock().await.connections.send(id, e.into());
                }
            }
        }
    }

    /// Apply a decoded client message
    pub async fn dispatch(&self, id: ConnectionId, message: ClientMessage) -> RouterResult<()> {
        let mut state = self.state.lock().await;

        if !state.connections.contains(id) {
            return Err(RegistryError::UnknownConnection(id).into());
        }

        match message {
            ClientMessage::Create { room_id, username } => {
                if let Err(e) = state.rooms.check_create(&room_id) {
                    debug!("Create of {} by {} refused: {}", room_id, id, e);
                    state.connections.send(id, (&e).into());
                    return Ok(());
                }

                state.leave_current_room(id);
                let room = state.rooms.create(&room_id)?;
                state.enter_room(id, &room, &username)?;

                info!("{} ({}) created room {}", username, id, room_id);
                state.connections.send(id, ServerMessage::room_created(room_id));
            }

            ClientMessage::Join { room_id, username } => {
                if !state.rooms.contains(&room_id) {
                    debug!("Join of missing room {} by {}", room_id, id);
                    let error = DirectoryError::RoomNotFound(room_id);
                    state.connections.send(id, (&error).into());
                    return Ok(());
                }

                state.leave_current_room(id);
                // Leaving may have pruned the target if it was the only member
                let room = match state.rooms.find(&room_id) {
                    Some(room) => room,
                    None => state.rooms.create(&room_id)?,
                };
                state.enter_room(id, &room, &username)?;

                info!("{} ({}) joined room {}", username, id, room_id);
                state.connections.send(id, ServerMessage::joined(room_id));
            }

            ClientMessage::Chat { message } => {
                let Some(sender) = state.connections.lookup(id).cloned() else {
                    debug!("Dropping chat from {} with no room", id);
                    return Ok(());
                };
                let Some(room) = state.rooms.find(&sender.room_id) else {
                    debug!("Dropping chat from {}: room {} is gone", id, sender.room_id);
                    return Ok(());
                };

                let timestamp = state.next_timestamp();
                let chat = ServerMessage::chat(message, sender.name, timestamp);

                let members = state.rooms.members(&room);
                let mut delivered = 0;
                for member in members {
                    if state.connections.send(*member, chat.clone()) {
                        delivered += 1;
                    } else {
                        debug!("Could not deliver chat to {}", member);
                    }
                }

                debug!(
                    "Broadcast chat in {} to {}/{} members",
                    room.room_id,
                    delivered,
                    members.len()
                );
            }
        }

        Ok(())
    }
}
