//! Settings type definitions.
//!
//! All types use camelCase JSON and implement [`Default`]; `#[serde(default)]`
//! lets a settings file specify only the fields it changes.
//!
//! ```json
//! {
//!   "handshake": { "baseDelayMs": 50, "maxAttempts": 10 },
//!   "client": { "callTimeoutMs": 5000 }
//! }
//! ```

use std::time::Duration;

use postmsg_core::BackoffConfig;
use postmsg_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostMsgSettings {
    /// Server handshake retry schedule.
    pub handshake: BackoffConfig,
    /// Calling-client behaviour.
    pub client: ClientSettings,
    /// In-process transport sizing.
    pub transport: TransportSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl PostMsgSettings {
    /// Reject values the protocol cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.handshake.max_attempts == 0 {
            return Err(SettingsError::InvalidValue {
                field: "handshake.maxAttempts",
                reason: "must be at least 1",
            });
        }
        if self.handshake.base_delay_ms == 0 {
            return Err(SettingsError::InvalidValue {
                field: "handshake.baseDelayMs",
                reason: "must be at least 1",
            });
        }
        if self.transport.channel_capacity == 0 {
            return Err(SettingsError::InvalidValue {
                field: "transport.channelCapacity",
                reason: "must be at least 1",
            });
        }
        if self.client.call_timeout_ms == Some(0) {
            return Err(SettingsError::InvalidValue {
                field: "client.callTimeoutMs",
                reason: "must be positive when set",
            });
        }
        Ok(())
    }
}

/// Calling-client settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Per-call timeout in ms. `None` waits for a reply indefinitely.
    pub call_timeout_ms: Option<u64>,
}

impl ClientSettings {
    /// Timeout as a [`Duration`].
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Buffered message events per window before slow listeners lag.
    pub channel_capacity: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level or `EnvFilter` directive.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            json: false,
        }
    }
}

impl LoggingSettings {
    /// Output format for the subscriber.
    pub fn format(&self) -> LogFormat {
        if self.json {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn partial_json_fills_defaults() {
        let settings: PostMsgSettings =
            serde_json::from_value(json!({"handshake": {"maxAttempts": 3}})).unwrap();
        assert_eq!(settings.handshake.max_attempts, 3);
        assert_eq!(settings.handshake.base_delay_ms, 100);
        assert_eq!(settings.transport.channel_capacity, 256);
    }

    #[test]
    fn camel_case_keys() {
        let v = serde_json::to_value(PostMsgSettings::default()).unwrap();
        assert!(v["handshake"].get("baseDelayMs").is_some());
        assert!(v["transport"].get("channelCapacity").is_some());
        assert!(v["client"].get("callTimeoutMs").is_some());
    }

    #[test]
    fn call_timeout_duration() {
        let client = ClientSettings {
            call_timeout_ms: Some(1500),
        };
        assert_eq!(client.call_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(ClientSettings::default().call_timeout(), None);
    }

    #[test]
    fn log_format_follows_json_flag() {
        let mut logging = LoggingSettings::default();
        assert_eq!(logging.format(), LogFormat::Compact);
        logging.json = true;
        assert_eq!(logging.format(), LogFormat::Json);
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut settings = PostMsgSettings::default();
        settings.handshake.max_attempts = 0;
        let err = settings.validate().unwrap_err();
        assert_eq!(err.field(), Some("handshake.maxAttempts"));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut settings = PostMsgSettings::default();
        settings.transport.channel_capacity = 0;
        assert_matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue { field: "transport.channelCapacity", .. })
        );
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut settings = PostMsgSettings::default();
        settings.client.call_timeout_ms = Some(0);
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue { .. }));
    }
}
