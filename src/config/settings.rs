//! Relay configuration
//!
//! Loads server and room settings from an optional `relay.toml`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration file looked up in the working directory by default
pub const CONFIG_FILE: &str = "relay.toml";

/// Default bind address
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// What a create request does when the room id is already taken
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRoomPolicy {
    /// Refuse with a "Room already exists" error
    #[default]
    Reject,
    /// Put the creator in the existing room
    Reuse,
    /// Add a second room under the same id; lookups keep finding the first
    Shadow,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Room lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoomSettings {
    pub duplicate_create: DuplicateRoomPolicy,
    /// Delete rooms whose last member has left
    pub prune_empty: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            duplicate_create: DuplicateRoomPolicy::default(),
            prune_empty: true,
        }
    }
}

/// Inbound message handling settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Answer malformed envelopes with an error instead of dropping them
    pub report_malformed: bool,
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerSettings,
    pub rooms: RoomSettings,
    pub protocol: ProtocolSettings,
}

impl RelayConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load an explicitly requested file, or `relay.toml` from the working
    /// directory if it exists, or fall back to defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let default_path = Path::new(CONFIG_FILE);
        if !default_path.exists() {
            return Ok(Self::default());
        }
        Self::load(default_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rooms.duplicate_create, DuplicateRoomPolicy::Reject);
        assert!(config.rooms.prune_empty);
        assert!(!config.protocol.report_malformed);
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
[server]
bind = "127.0.0.1"
port = 9100

[rooms]
duplicate_create = "shadow"
prune_empty = false

[protocol]
report_malformed = true
"#,
        );

        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.rooms.duplicate_create, DuplicateRoomPolicy::Shadow);
        assert!(!config.rooms.prune_empty);
        assert!(config.protocol.report_malformed);
    }

    #[test]
    fn test_load_partial_config() {
        let file = write_config("[rooms]\nduplicate_create = \"reuse\"\n");

        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.rooms.duplicate_create, DuplicateRoomPolicy::Reuse);
        assert!(config.rooms.prune_empty);
        assert_eq!(config.server, ServerSettings::default());
    }

    #[test]
    fn test_load_invalid_policy() {
        let file = write_config("[rooms]\nduplicate_create = \"merge\"\n");
        let result = RelayConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = RelayConfig::load(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Read(_))));
    }

    #[test]
    fn test_discover_explicit_path() {
        let file = write_config("[server]\nport = 7000\n");
        let config = RelayConfig::discover(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 7000);
    }
}
