//! # tagsync-settings
//!
//! Where the sync engine gets its server origin, reconnect timing, label
//! scheme and log level from.
//!
//! [`load_settings`] starts from [`SyncSettings::default()`], overlays
//! `~/.tagsync/settings.json` if present, then any `TAGSYNC_*` environment
//! variables. The result is validated and handed to the engine builder by
//! value; nothing here is global.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path, validate,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_lives_under_dot_tagsync() {
        assert!(settings_path().ends_with(".tagsync/settings.json"));
    }

    #[test]
    fn defaults_pass_validation() {
        let settings = load_settings_from_path(std::path::Path::new("/nonexistent/x.json"));
        assert!(settings.is_ok());
    }
}
