//! Session runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a session's command loop.
///
/// Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Commands that may queue before callers wait for space.
    pub command_queue_capacity: usize,
    /// How long the UI has to acknowledge a screen flash event.
    pub screen_flash_timeout_ms: u64,
    /// Upper bound on best-effort cleanup during shutdown.
    pub cleanup_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 16,
            screen_flash_timeout_ms: 3_000,
            cleanup_timeout_ms: 1_000,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Screen flash acknowledgement timeout.
    pub const fn screen_flash_timeout(&self) -> Duration {
        Duration::from_millis(self.screen_flash_timeout_ms)
    }

    /// Shutdown cleanup timeout.
    pub const fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }

    /// Command queue capacity, never zero.
    pub fn queue_capacity(&self) -> usize {
        self.command_queue_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SessionConfig::from_json(r#"{"screen_flash_timeout_ms": 250}"#)
            .expect("valid json");
        assert_eq!(config.screen_flash_timeout(), Duration::from_millis(250));
        assert_eq!(config.command_queue_capacity, 16);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let config = SessionConfig {
            command_queue_capacity: 0,
            ..SessionConfig::default()
        };
        assert_eq!(config.queue_capacity(), 1);
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(SessionConfig::from_json("{\"command_queue_capacity\": -1}").is_err());
    }
}
