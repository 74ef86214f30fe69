//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{ModelSettings, RelaySettings};

/// `~/.relay/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

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

/// Apply `RELAY_*` environment overrides. Invalid values are ignored with a
/// warning.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

fn apply_overrides_from(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("RELAY_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("RELAY_STALE_AFTER_SECS", 1, 3600) {
        settings.server.stale_after_secs = v;
    }

    if let Some(v) = env.string("RELAY_BOT_OPEN_ID") {
        settings.bot.bot_open_id = v;
    }
    if let Some(v) = env.string("RELAY_ROBOT_NAME") {
        settings.bot.robot_name = v;
    }

    if let Some(v) = env.string("RELAY_MODEL_BASE_URL") {
        settings.model.base_url = v;
    }
    if let Some(v) = env.string("RELAY_MODEL_API_KEY") {
        settings.model.api_key = Some(SecretString::from(v));
    }
    if let Some(v) = env.string("RELAY_NORMAL_MODEL") {
        settings.model.normal_model = v;
    }
    if let Some(v) = env.string("RELAY_REASONING_MODEL") {
        settings.model.reasoning_model = v;
    }
    if let Some(v) = env.usize("RELAY_HISTORY_SIZE", 0, 500) {
        settings.model.history_size = v;
    }

    if let Some(v) = env.u64("RELAY_FLUSH_INTERVAL_MS", 1, 10_000) {
        settings.streaming.flush_interval_ms = v;
    }

    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.telemetry.log_level = v;
    }
    if let Some(v) = env.bool("RELAY_LOG_JSON") {
        settings.telemetry.json = v;
    }
    if let Some(v) = env.string("RELAY_GRAFANA_URL") {
        settings.telemetry.grafana_url = Some(v);
    }

    if let Some(v) = env.string("RELAY_GATEWAY_URL") {
        settings.chat_gateway.base_url = v;
    }
    if let Some(v) = env.string("RELAY_GATEWAY_TOKEN") {
        settings.chat_gateway.token = Some(SecretString::from(v));
    }
}

fn validate(settings: &RelaySettings) -> Result<()> {
    let rates = &settings.rates;
    for (name, rate) in [
        ("reaction_default_rate", rates.reaction_default_rate),
        ("repeat_default_rate", rates.repeat_default_rate),
        ("imitate_default_rate", rates.imitate_default_rate),
    ] {
        check_rate(format!("rates.{name}"), rate)?;
    }
    for (word, rate) in &rates.repeat_word_rates {
        check_rate(format!("rates.repeat_word_rates[{word:?}]"), *rate)?;
    }
    if settings.streaming.flush_interval_ms == 0 {
        return Err(SettingsError::NotPositive("flush_interval_ms"));
    }
    if settings.streaming.channel_capacity == 0 {
        return Err(SettingsError::NotPositive("channel_capacity"));
    }
    Ok(())
}

fn check_rate(field: String, rate: u8) -> Result<()> {
    if rate > 100 {
        return Err(SettingsError::OutOfRange {
            field,
            max: 100,
            value: u64::from(rate),
        });
    }
    Ok(())
}

/// The model API key, required before any transport is built.
pub fn require_api_key(model: &ModelSettings) -> Result<SecretString> {
    model
        .api_key
        .clone()
        .filter(|key| !key.expose_secret().trim().is_empty())
        .ok_or_else(|| SettingsError::MissingApiKey {
            base_url: model.base_url.clone(),
        })
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}
