//! Layered settings resolution.
//!
//! Precedence, lowest first: compiled [`SyncSettings::default()`], the JSON
//! file at [`settings_path`], then `TAGSYNC_*` variables from the process
//! environment. The file layer is merged as JSON before deserializing, so a
//! file only needs the keys it changes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tagsync_core::LabelScheme;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::SyncSettings;

const CONFIG_DIR: &str = ".tagsync";
const CONFIG_FILE: &str = "settings.json";

/// `~/.tagsync/settings.json`, falling back to `/tmp` without `$HOME`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    home.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Resolve settings from [`settings_path`] and the process environment.
pub fn load_settings() -> Result<SyncSettings> {
    load_settings_from_path(&settings_path())
}

/// Resolve settings from `path` and the process environment.
///
/// A missing file is not an error; an unreadable or malformed one is.
pub fn load_settings_from_path(path: &Path) -> Result<SyncSettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<SyncSettings> {
    let mut doc = serde_json::to_value(SyncSettings::default())?;
    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!(path = %path.display(), "merging settings file");
            merge_into(&mut doc, serde_json::from_str(&text)?);
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, keeping defaults");
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    Ok(serde_json::from_value(doc)?)
}

/// Overlay `source` on `target` and return the result.
///
/// Maps merge key by key, recursively. Any other `source` value replaces
/// what it lands on, except `null`, which leaves the target untouched.
pub fn deep_merge(mut target: Value, source: Value) -> Value {
    merge_into(&mut target, source);
    target
}

fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Reject combinations the engine cannot run with.
pub fn validate(settings: &SyncSettings) -> Result<()> {
    const SCHEMES: [&str; 4] = ["ws://", "wss://", "http://", "https://"];

    let origin = &settings.server.origin;
    if !SCHEMES.iter().any(|s| origin.starts_with(s)) {
        return Err(SettingsError::invalid(
            "server.origin",
            format!("'{origin}' needs one of {}", SCHEMES.join(" ")),
        ));
    }
    if !settings.server.socket_path.starts_with('/') {
        return Err(SettingsError::invalid(
            "server.socketPath",
            format!("'{}' must start with '/'", settings.server.socket_path),
        ));
    }
    if settings.connection.event_buffer == 0 {
        return Err(SettingsError::invalid(
            "connection.eventBuffer",
            "must be at least 1",
        ));
    }
    if settings.connection.request_timeout_ms == Some(0) {
        return Err(SettingsError::invalid(
            "connection.requestTimeoutMs",
            "must be positive when set",
        ));
    }
    Ok(())
}

/// Overlay `TAGSYNC_*` variables from the process environment.
///
/// Values that do not parse, or fall outside their range, are logged and
/// skipped so the file or default value stays in effect.
pub fn apply_env_overrides(settings: &mut SyncSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// [`apply_env_overrides`] over an arbitrary variable source.
pub fn apply_overrides(settings: &mut SyncSettings, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let ranged = |name: &'static str, min: u64, max: u64| {
        let raw = var(name)?;
        let value = parse_u64_range(&raw, min, max);
        if value.is_none() {
            warn!(key = name, value = %raw, min, max, "ignoring out-of-range environment override");
        }
        value
    };

    if let Some(origin) = var("TAGSYNC_ORIGIN") {
        settings.server.origin = origin;
    }
    if let Some(path) = var("TAGSYNC_SOCKET_PATH") {
        settings.server.socket_path = path;
    }
    if let Some(param) = var("TAGSYNC_TOKEN_PARAM") {
        settings.server.token_param = param;
    }

    let conn = &mut settings.connection;
    if let Some(ms) = ranged("TAGSYNC_RECONNECT_DELAY_MS", 100, 600_000) {
        conn.reconnect_delay_ms = ms;
    }
    if let Some(ms) = ranged("TAGSYNC_REQUEST_TIMEOUT_MS", 1, 3_600_000) {
        conn.request_timeout_ms = Some(ms);
    }
    if let Some(raw) = var("TAGSYNC_FAIL_PENDING_ON_DISCONNECT") {
        match parse_bool(&raw) {
            Some(flag) => conn.fail_pending_on_disconnect = flag,
            None => warn!(key = "TAGSYNC_FAIL_PENDING_ON_DISCONNECT", value = %raw, "ignoring non-boolean environment override"),
        }
    }

    if let Some(raw) = var("TAGSYNC_LABEL_SCHEME") {
        match parse_label_scheme(&raw) {
            Some(scheme) => settings.labels.scheme = scheme,
            None => warn!(key = "TAGSYNC_LABEL_SCHEME", value = %raw, "ignoring unknown label scheme"),
        }
    }
    if let Some(level) = var("TAGSYNC_LOG_LEVEL") {
        settings.logging.level = level;
    }
}

/// `true`/`yes`/`on`/`1` or `false`/`no`/`off`/`0`, any case.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// An integer in `min..=max`.
pub fn parse_u64_range(raw: &str, min: u64, max: u64) -> Option<u64> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|n| (min..=max).contains(n))
}

/// `context` or `tags`, any case.
pub fn parse_label_scheme(raw: &str) -> Option<LabelScheme> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("context") {
        Some(LabelScheme::Context)
    } else if raw.eq_ignore_ascii_case("tags") {
        Some(LabelScheme::Tags)
    } else {
        None
    }
}
