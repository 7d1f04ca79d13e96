pub mod generate;
pub mod parse;
pub mod types;

use chrono::{FixedOffset, Local, Offset};
use regex::Regex;
use std::path::{Path, PathBuf};

pub use parse::{load_config, ConfigError};
pub use types::{Config, WebConfig};

const ENV_VAR_PATTERN: &str = r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}";

pub(crate) fn env_var_regex() -> Result<Regex, regex::Error> {
    Regex::new(ENV_VAR_PATTERN)
}

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax; unset variables are left unchanged.
pub fn expand_env_vars(text: &str) -> Result<String, regex::Error> {
    let re = env_var_regex()?;

    Ok(re
        .replace_all(text, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string())
}

/// Expands a leading `~` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path based on explicit argument or default locations.
/// Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/chatdigest/config.yml
/// 3. /etc/chatdigest/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/chatdigest/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/chatdigest/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Parse a `+HH:MM` style offset, falling back to the host's current offset
pub fn resolve_utc_offset(offset: Option<&str>) -> Result<FixedOffset, String> {
    match offset {
        Some(text) => text
            .trim()
            .parse::<FixedOffset>()
            .map_err(|e| format!("invalid utc_offset '{}': {}", text, e)),
        None => Ok(Local::now().offset().fix()),
    }
}
