//! Session configuration.
//!
//! Durations serialize as integer milliseconds so configs can be loaded from
//! the same JSON documents the browser side uses.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_QUEUED_FRAMES,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_RECONNECT_MAX_DELAY,
    DEFAULT_REQUEST_TIMEOUT,
};

/// How retry delays grow with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base * attempt`.
    #[default]
    Linear,
    /// `base * 2^(attempt - 1)`.
    Exponential,
}

/// Reconnection budget and backoff shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Consecutive failures tolerated before the session gives up.
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            strategy: BackoffStrategy::Linear,
        }
    }
}

/// Per-session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Interval between PINGs on a live connection.
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    /// How long a connect attempt may take before it counts as failed.
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    /// How long a request waits for its response.
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Frames held while the session is not connected. Oldest are dropped.
    pub max_queued_frames: usize,
    /// Credentials sent when the peer asks for authentication.
    ///
    /// When unset the session parks in `NeedAuth` until the caller supplies
    /// them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            max_queued_frames: DEFAULT_MAX_QUEUED_FRAMES,
            credentials: None,
        }
    }
}

impl SessionConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the base delay and strategy, keeping the other reconnect fields.
    pub fn with_backoff(mut self, base_delay: Duration, strategy: BackoffStrategy) -> Self {
        self.reconnect.base_delay = base_delay;
        self.reconnect.strategy = strategy;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.reconnect.max_attempts = max_attempts;
        self
    }

    pub fn with_max_queued_frames(mut self, max: usize) -> Self {
        self.max_queued_frames = max;
        self
    }

    pub fn with_credentials(mut self, credentials: Value) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.strategy, BackoffStrategy::Linear);
        assert_eq!(config.max_queued_frames, 1024);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::new()
            .with_heartbeat_interval(Duration::from_secs(5))
            .with_connect_timeout(Duration::from_secs(2))
            .with_backoff(Duration::from_millis(250), BackoffStrategy::Exponential)
            .with_max_attempts(8)
            .with_max_queued_frames(16)
            .with_credentials(json!({"password": "hunter2"}));

        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.reconnect.max_attempts, 8);
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_queued_frames, 16);
        assert_eq!(config.credentials, Some(json!({"password": "hunter2"})));
    }

    #[test]
    fn test_config_serializes_millis() {
        let value = serde_json::to_value(SessionConfig::default()).unwrap();
        assert_eq!(value["heartbeatInterval"], 30_000);
        assert_eq!(value["reconnect"]["baseDelay"], 1_000);
        assert_eq!(value["reconnect"]["strategy"], "linear");
        assert!(value.get("credentials").is_none());
    }

    #[test]
    fn test_config_partial_deserialize() {
        let config: SessionConfig = serde_json::from_value(json!({
            "heartbeatInterval": 1500,
            "reconnect": {"maxAttempts": 2, "strategy": "exponential"}
        }))
        .unwrap();

        assert_eq!(config.heartbeat_interval, Duration::from_millis(1500));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(1));
    }
}
