//! Layered settings loader: compiled defaults, then the JSON file overlaid
//! with [`deep_merge`], then `NIMBLE_*` environment overrides, then
//! [`NimbleSettings::validate`].

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{NimbleSettings, TransportKind};

/// `~/.nimble/settings.json`, or under `/tmp` when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".nimble/settings.json")
}

/// [`load_settings_from_path`] on [`settings_path`].
pub fn load_settings() -> Result<NimbleSettings> {
    load_settings_from_path(&settings_path())
}

/// Load and validate settings, reading `path` if it exists.
///
/// A missing file is not an error. Malformed JSON and values rejected by
/// validation are.
pub fn load_settings_from_path(path: &Path) -> Result<NimbleSettings> {
    let mut layered = serde_json::to_value(NimbleSettings::default())?;

    if path.is_file() {
        let raw = std::fs::read_to_string(path)?;
        layered = deep_merge(layered, serde_json::from_str::<Value>(&raw)?);
        debug!(path = %path.display(), "settings file applied");
    } else {
        debug!(path = %path.display(), "no settings file, using defaults");
    }

    let mut settings: NimbleSettings = serde_json::from_value(layered)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Overlay `source` onto `target`.
///
/// Objects merge key by key. Any other `source` value replaces `target`
/// outright, except `null`, which leaves the target key untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    let (mut merged, overlay) = match (target, source) {
        (Value::Object(merged), Value::Object(overlay)) => (merged, overlay),
        (_, source) => return source,
    };
    for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
        let value = match merged.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        let _ = merged.insert(key, value);
    }
    Value::Object(merged)
}

/// Apply `NIMBLE_*` environment variable overrides.
///
/// Unset or empty variables are skipped. Unparseable or out-of-range values
/// are logged and skipped.
pub fn apply_env_overrides(settings: &mut NimbleSettings) {
    let server = &mut settings.server;
    if let Some(host) = env_var("NIMBLE_HOST") {
        server.host = host;
    }
    if let Some(port) = env_in_range("NIMBLE_PORT", 0u16..=u16::MAX) {
        server.port = port;
    }
    if let Some(raw) = env_var("NIMBLE_TRANSPORT") {
        match TransportKind::parse(&raw) {
            Some(kind) => server.transport = kind,
            None => warn!(var = "NIMBLE_TRANSPORT", value = %raw, "unknown transport in environment"),
        }
    }
    if let Some(path) = env_var("NIMBLE_WS_PATH") {
        server.ws_path = path;
    }
    if let Some(secs) = env_in_range("NIMBLE_HEARTBEAT_INTERVAL", 1u64..=3600) {
        server.heartbeat_interval_secs = secs;
    }
    if let Some(secs) = env_in_range("NIMBLE_SESSION_EXPIRE", 0u64..=86_400) {
        server.session_expire_secs = secs;
    }
    if let Some(backlog) = env_in_range("NIMBLE_SEND_BACKLOG", 1usize..=65_536) {
        server.send_backlog = backlog;
    }
    if let Some(level) = env_var("NIMBLE_LOG_LEVEL") {
        settings.logging.level = level;
    }
}

/// Parse `raw` as a number inside `range`.
pub fn parse_in_range<T>(raw: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    raw.trim().parse().ok().filter(|n| range.contains(n))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_in_range<T>(name: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    let raw = env_var(name)?;
    let parsed = parse_in_range(&raw, range);
    if parsed.is_none() {
        warn!(var = name, value = %raw, "out-of-range environment override ignored");
    }
    parsed
}
