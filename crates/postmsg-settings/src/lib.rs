//! # postmsg-settings
//!
//! Configuration for the postmsg protocol with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PostMsgSettings::default()`]
//! 2. **User file**: `~/.postmsg/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `POSTMSG_*` overrides (highest priority)
//!
//! The merged result is validated before it is returned.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
static SETTINGS: OnceLock<PostMsgSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.postmsg/settings.json` with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static PostMsgSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            PostMsgSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: PostMsgSettings) -> std::result::Result<(), PostMsgSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = PostMsgSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = PostMsgSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.handshake.base_delay_ms, 100);
        assert_eq!(settings.handshake.max_attempts, 8);
        assert!(settings.client.call_timeout_ms.is_none());
        assert_eq!(settings.transport.channel_capacity, 256);
        assert_eq!(settings.logging.level, "warn");
    }
}
