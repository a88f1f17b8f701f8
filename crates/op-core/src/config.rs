//! Environment for the catalog client
//!
//! `OP_CATALOG_*` variables may come from the process environment or from an
//! env file (`KEY=VALUE` lines). Variables already set in the process win.
//!
//! ```rust,ignore
//! op_core::config::load_environment();
//! let url = op_core::config::get_config_opt("OP_CATALOG_PRIMARY_URL");
//! ```

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Variable naming an explicit env file
pub const ENV_FILE_VAR: &str = "OP_CATALOG_ENV_FILE";

/// Env files searched when `OP_CATALOG_ENV_FILE` is unset
pub const ENV_FILE_PATHS: [&str; 2] = ["/etc/op-catalog/environment", ".env"];

/// Key fragments whose values never reach the log
const SECRET_MARKERS: [&str; 4] = ["TOKEN", "PASSWORD", "SECRET", "KEY"];

/// Apply the first env file found. Returns the file that was applied.
pub fn load_environment() -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = match std::env::var_os(ENV_FILE_VAR) {
        Some(path) => vec![PathBuf::from(path)],
        None => ENV_FILE_PATHS.iter().map(PathBuf::from).collect(),
    };

    let loaded = candidates.into_iter().find(|path| apply_env_file(path));
    if loaded.is_none() {
        debug!("No catalog env file found");
    }
    loaded
}

/// Apply one env file. `false` when it is absent or unreadable.
fn apply_env_file(path: &Path) -> bool {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
        Err(e) => {
            warn!("Cannot read env file {}: {}", path.display(), e);
            return false;
        }
    };

    let (mut applied, mut kept) = (0, 0);
    for (key, value) in parse_env_file(&content) {
        if std::env::var_os(&key).is_some() {
            kept += 1;
            continue;
        }
        debug!(key = %key, value = %redact(&key, &value), "Env file variable");
        std::env::set_var(&key, value);
        applied += 1;
    }

    info!(
        file = %path.display(),
        applied,
        kept,
        "Applied catalog env file"
    );
    true
}

/// `KEY=VALUE` pairs of an env file. Blank lines, `#` comments and an
/// optional `export ` prefix are accepted; one layer of quotes is stripped.
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
        .unwrap_or(value)
}

fn redact<'a>(key: &str, value: &'a str) -> &'a str {
    if SECRET_MARKERS.iter().any(|m| key.contains(m)) {
        "***"
    } else {
        value
    }
}

/// A set, non-empty variable
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// A boolean flag; unrecognized values fall back to `default`
pub fn get_config_bool(key: &str, default: bool) -> bool {
    match get_config_opt(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1" | "yes" | "on") => true,
        Some("false" | "0" | "no" | "off") => false,
        _ => default,
    }
}
