//! Protocol message definitions
//!
//! Defines the envelopes exchanged between chat clients and the relay.
//! Every frame is a JSON object of the form `{"type": ..., "payload": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum room identifier length in characters
pub const MAX_ROOM_ID_LENGTH: usize = 128;

/// Maximum display name length in characters
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Maximum chat message length (64KB)
pub const MAX_MESSAGE_LENGTH: usize = 64 * 1024;

/// Envelope kinds the relay acts on
const KNOWN_KINDS: [&str; 3] = ["create", "join", "chat"];

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Decoding
// ============================================================================

/// Outcome of decoding one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A recognized, validated client message
    Message(ClientMessage),
    /// A well-formed envelope whose `type` the relay does not handle
    Unrecognized(String),
}

/// Decode and validate one inbound text frame.
///
/// Unknown `type` tags are not an error. Anything else that does not match
/// the envelope shape is rejected.
pub fn decode(json: &str) -> ProtocolResult<Inbound> {
    let value: Value = serde_json::from_str(json)?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => {
            return Err(ProtocolError::InvalidMessage(
                "type must be a string".to_string(),
            ))
        }
        None => {
            return Err(ProtocolError::InvalidMessage(
                "missing type field".to_string(),
            ))
        }
    };

    if !KNOWN_KINDS.contains(&kind.as_str()) {
        return Ok(Inbound::Unrecognized(kind));
    }

    let message = serde_json::from_value::<ClientMessage>(value)?.normalized();
    message.validate()?;
    Ok(Inbound::Message(message))
}

// ============================================================================
// Client Messages
// ============================================================================

/// Messages sent from a chat client to the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Create a room and become its first member
    #[serde(rename_all = "camelCase")]
    Create {
        /// Identifier of the room to create
        room_id: String,
        /// Display name to use in the room
        username: String,
    },

    /// Join an existing room
    #[serde(rename_all = "camelCase")]
    Join { room_id: String, username: String },

    /// Broadcast text to the sender's current room
    Chat { message: String },
}

#[cfg(test)]
impl ClientMessage {
    /// Create a Create message
    pub fn create(room_id: impl Into<String>, username: impl Into<String>) -> Self {
        ClientMessage::Create {
            room_id: room_id.into(),
            username: username.into(),
        }
    }

    /// Create a Join message
    pub fn join(room_id: impl Into<String>, username: impl Into<String>) -> Self {
        ClientMessage::Join {
            room_id: room_id.into(),
            username: username.into(),
        }
    }

    /// Create a Chat message
    pub fn chat(message: impl Into<String>) -> Self {
        ClientMessage::Chat {
            message: message.into(),
        }
    }
}

impl ClientMessage {
    /// Trim surrounding whitespace from room ids and names
    fn normalized(self) -> Self {
        match self {
            ClientMessage::Create { room_id, username } => ClientMessage::Create {
                room_id: room_id.trim().to_string(),
                username: username.trim().to_string(),
            },
            ClientMessage::Join { room_id, username } => ClientMessage::Join {
                room_id: room_id.trim().to_string(),
                username: username.trim().to_string(),
            },
            chat @ ClientMessage::Chat { .. } => chat,
        }
    }

    /// Validate message contents
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            ClientMessage::Create { room_id, username }
            | ClientMessage::Join { room_id, username } => {
                validate_field("roomId", room_id, MAX_ROOM_ID_LENGTH)?;
                validate_field("username", username, MAX_USERNAME_LENGTH)
            }

            ClientMessage::Chat { message } => {
                if message.len() > MAX_MESSAGE_LENGTH {
                    return Err(ProtocolError::ValidationError(format!(
                        "message exceeds maximum length of {} bytes",
                        MAX_MESSAGE_LENGTH
                    )));
                }
                Ok(())
            }
        }
    }
}

fn validate_field(name: &str, value: &str, max_chars: usize) -> ProtocolResult<()> {
    if value.is_empty() {
        return Err(ProtocolError::ValidationError(format!(
            "{} cannot be empty",
            name
        )));
    }
    if value.chars().count() > max_chars {
        return Err(ProtocolError::ValidationError(format!(
            "{} exceeds maximum length of {} characters",
            name, max_chars
        )));
    }
    Ok(())
}

// ============================================================================
// Server Messages
// ============================================================================

/// A chat line as delivered to room members
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Message body
    pub text: String,
    /// Display name of the sender
    pub sender: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

/// Messages sent from the relay to a chat client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Acknowledges a create request
    #[serde(rename_all = "camelCase")]
    RoomCreated { room_id: String },

    /// Acknowledges a join request
    #[serde(rename_all = "camelCase")]
    Joined { room_id: String },

    /// Error response, sent to the requesting connection only
    Error {
        /// Error message
        message: String,
        /// Error code for programmatic handling
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },

    /// A broadcast chat line
    Chat(ChatMessage),
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid message format
    InvalidMessage,
    /// Join target does not exist
    RoomNotFound,
    /// Create target already exists
    RoomExists,
}

impl ServerMessage {
    /// Create a RoomCreated message
    pub fn room_created(room_id: impl Into<String>) -> Self {
        ServerMessage::RoomCreated {
            room_id: room_id.into(),
        }
    }

    /// Create a Joined message
    pub fn joined(room_id: impl Into<String>) -> Self {
        ServerMessage::Joined {
            room_id: room_id.into(),
        }
    }

    /// Create an Error message with code
    pub fn error_with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code: Some(code),
        }
    }

    /// Create a Chat message
    pub fn chat(text: impl Into<String>, sender: impl Into<String>, timestamp: u64) -> Self {
        ServerMessage::Chat(ChatMessage {
            text: text.into(),
            sender: sender.into(),
            timestamp,
        })
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<ProtocolError> for ServerMessage {
    fn from(err: ProtocolError) -> Self {
        ServerMessage::error_with_code(err.to_string(), ErrorCode::InvalidMessage)
    }
}

// ============================================================================
// Tests
// ============================================================================
