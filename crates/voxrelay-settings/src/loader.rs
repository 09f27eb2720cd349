//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate ranges
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

/// Resolve the path to the settings file (`~/.voxrelay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".voxrelay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = merge_file_over_defaults(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn merge_file_over_defaults(path: &Path) -> Result<RelaySettings> {
    if !path.exists() {
        debug!(?path, "settings file not found, using defaults");
        return Ok(RelaySettings::default());
    }

    debug!(?path, "loading settings from file");
    let parse_error = |source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let user: Value = serde_json::from_str(&content).map_err(parse_error)?;
    let defaults = serde_json::to_value(RelaySettings::default()).map_err(parse_error)?;
    serde_json::from_value(deep_merge(defaults, user)).map_err(parse_error)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject values that would make the server misbehave.
pub fn validate(settings: &RelaySettings) -> Result<()> {
    let server = &settings.server;
    if server.max_send_queue == 0 {
        return Err(SettingsError::invalid("server.maxSendQueue", "must be at least 1"));
    }
    if server.heartbeat_interval_ms == 0 {
        return Err(SettingsError::invalid("server.heartbeatIntervalMs", "must be at least 1"));
    }
    if server.heartbeat_timeout_ms < server.heartbeat_interval_ms {
        return Err(SettingsError::invalid(
            "server.heartbeatTimeoutMs",
            format!(
                "{}ms is shorter than the {}ms heartbeat interval",
                server.heartbeat_timeout_ms, server.heartbeat_interval_ms
            ),
        ));
    }
    if settings.engine.max_jobs_to_activate == 0 {
        return Err(SettingsError::invalid("engine.maxJobsToActivate", "must be at least 1"));
    }
    if settings.engine.address.trim().is_empty() {
        return Err(SettingsError::invalid("engine.address", "is empty"));
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    // ── Engine ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("ZEEBE_ADDRESS") {
        settings.engine.address = v;
    }
    if let Some(v) = read_env_string("ZEEBE_CLIENT_ID") {
        settings.engine.client_id = Some(v);
    }
    if let Some(v) = read_env_string("ZEEBE_CLIENT_SECRET") {
        settings.engine.client_secret = Some(v);
    }
    if let Some(v) = read_env_string("ZEEBE_AUTHORIZATION_SERVER_URL") {
        settings.engine.authorization_server_url = Some(v);
    }
    if let Some(v) = read_env_string("ZEEBE_TOKEN_AUDIENCE") {
        settings.engine.token_audience = v;
    }

    // ── Frontend ────────────────────────────────────────────────────
    if let Some(v) = read_env_string("VOICE_AI_SYSTEM_PROMPT") {
        settings.frontend.system_prompt = v;
    }

    // ── Server / logging ────────────────────────────────────────────
    if let Some(v) = read_env_string("VOXRELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("VOXRELAY_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("VOXRELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("VOXRELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Strip whitespace and one layer of incidental quoting (`'..'` or `".."`),
/// as left behind by `.env` files and shell exports.
pub fn strip_quotes(val: &str) -> &str {
    val.trim().trim_matches('\'').trim_matches('"')
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| strip_quotes(&v).to_string())
        .filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = read_env_string(name)?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = read_env_string(name)?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}
