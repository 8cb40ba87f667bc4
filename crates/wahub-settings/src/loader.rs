//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HubSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};
use wahub_core::logging::LogFormat;

use crate::errors::Result;
use crate::types::{DEFAULT_SCHEDULE_CHECK_INTERVAL_SECS, HubSettings};

/// Env var naming an explicit settings file.
pub const CONFIG_PATH_ENV: &str = "WAHUB_CONFIG";

/// Resolve the settings file path (`$WAHUB_CONFIG` or `~/.wahub/settings.json`).
pub fn settings_path() -> PathBuf {
    settings_path_from(|name| std::env::var(name).ok())
}

/// Resolve the settings file path through `lookup`. Blank values count as unset.
fn settings_path_from<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };
    if let Some(path) = env.string(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    let home = env.string("HOME").unwrap_or_else(|| "/tmp".to_string());
    PathBuf::from(home).join(".wahub").join("settings.json")
}

/// Read `.env` from the working directory into the process environment.
///
/// Existing variables are not overwritten. A missing file is not an error.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => debug!(".env not found, using process environment"),
        Err(e) => warn!(error = %e, "failed to read .env, ignoring"),
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HubSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<HubSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<HubSettings> {
    let defaults = serde_json::to_value(HubSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut HubSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are logged and ignored (fall back to file/default)
pub fn apply_overrides_from<F>(settings: &mut HubSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("WS_READ_TIMEOUT", 1, 86_400) {
        settings.server.read_timeout_secs = v;
    }
    if let Some(v) = env.u64("WS_WRITE_TIMEOUT", 1, 3_600) {
        settings.server.write_timeout_secs = v;
    }
    if let Some(v) = env.u64("WS_KEEPALIVE_INTERVAL", 1, 3_600) {
        settings.server.keepalive_interval_secs = v;
    }

    // ── Transport ───────────────────────────────────────────────────
    if let Some(v) = env.string("WAHUB_SIDECAR_URL") {
        settings.transport.sidecar_url = v;
    }
    if let Some(v) = env.u64("CONNECT_RETRY_WAIT", 1, 3_600) {
        settings.transport.connect_retry_wait_secs = v;
    }
    if let Some(v) = env.bool("ENABLE_AUTO_RECONNECT") {
        settings.transport.auto_reconnect = v;
    }
    if let Some(v) = env.bool("FORCE_FRESH_LOGIN") {
        settings.transport.force_fresh_login = v;
    }

    // ── Schedule ────────────────────────────────────────────────────
    if let Some(v) = env.bool("ENABLE_SCHEDULING") {
        settings.schedule.enabled = v;
    }
    if let Some(v) = env.i64("SCHEDULE_CHECK_INTERVAL") {
        settings.schedule.check_interval_secs =
            clamp_check_interval(v).unwrap_or(DEFAULT_SCHEDULE_CHECK_INTERVAL_SECS);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("WAHUB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("WAHUB_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "WAHUB_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// A dispatch period in seconds, or `None` when it is not positive.
pub fn clamp_check_interval(secs: i64) -> Option<u64> {
    u64::try_from(secs).ok().filter(|s| *s > 0)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn i64(&self, name: &str) -> Option<i64> {
        let val = self.string(name)?;
        let result = val.trim().parse().ok();
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}
