//! # voxrelay-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **User file**: `~/.voxrelay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ZEEBE_*`, `VOICE_AI_SYSTEM_PROMPT` and
//!    `VOXRELAY_*` overrides (highest priority)
//!
//! The loaded value is passed explicitly to the components that need it;
//! there is no process-wide settings singleton.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = RelaySettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_match_deployment_defaults() {
        let settings = RelaySettings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.engine.address, "http://localhost:8080");
        assert_eq!(settings.engine.token_audience, "zeebe-api");
        assert_eq!(settings.assets.base_url, "https://huggingface.co");
        assert_eq!(
            settings.frontend.system_prompt,
            "You are a helpful voice assistant."
        );
        assert!(!settings.engine.has_credentials());
    }
}
