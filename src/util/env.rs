//! Environment helpers: dotenv loading, the optional getter and the
//! `KEY=VALUE` config file reader used by every subcommand.
use std::path::Path;
use std::sync::Once;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

static INIT: Once = Once::new();

/// Ordered `KEY -> value` pairs read from a config file.
pub type EnvMap = IndexMap<String, String>;

/// Load .env into the process environment exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Read a config file with the dotenv parser, without touching the process
/// environment. A missing or unreadable file yields an empty map and callers
/// check for required keys themselves. Malformed lines are skipped; the first
/// occurrence of a key wins.
pub fn load_env_file(path: &Path) -> EnvMap {
    let iter = match dotenv::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) => {
            warn!(target = "env", path = %path.display(), error = %e, "env file not readable; using process environment only");
            return EnvMap::new();
        }
    };
    let mut map = EnvMap::new();
    for item in iter {
        match item {
            Ok((key, val)) => {
                map.entry(key).or_insert(val);
            }
            Err(e) => warn!(target = "env", path = %path.display(), error = %e, "skipping env line"),
        }
    }
    debug!(target = "env", path = %path.display(), keys = map.len(), "loaded env file");
    map
}

pub fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    let val_trim = val.trim();
    if val_trim.is_empty() {
        return String::new();
    }
    if k.contains("PASSWORD")
        || k.contains("SECRET")
        || k.contains("KEY")
        || k.contains("TOKEN")
    {
        return "***".to_string();
    }
    // Credentials embedded in URLs (user:pass@host) are masked too.
    if let Ok(mut u) = url::Url::parse(val_trim) {
        if !u.username().is_empty() || u.password().is_some() {
            let _ = u.set_username("***");
            let _ = u.set_password(Some("***"));
            return u.to_string();
        }
    }
    val_trim.to_string()
}

/// Log a redacted snapshot of the keys this run depends on.
pub fn preflight_snapshot(title: &str, file: &EnvMap, keys: &[&str]) {
    init_env();
    let snapshot: Vec<(String, String)> = keys
        .iter()
        .map(|&k| {
            let v = file.get(k).cloned().or_else(|| env_opt(k)).unwrap_or_default();
            (k.to_string(), redact_value(k, &v))
        })
        .filter(|(_, v)| !v.is_empty())
        .collect();
    info!(target = "preflight", title, snapshot = ?snapshot, "configuration snapshot");
}
