//! Client configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::path::PathBuf;

use crate::call::media::MediaConstraints;
use crate::error::ErrorCode;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_STATE_DIR: &str = ".mapmeet";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    Parse { var: &'static str, value: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "E_CONFIG_PARSE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub state_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Start the POI call automatically when another participant starts it.
    pub auto_join_calls: bool,
    pub media: MediaConstraints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_owned(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            auto_join_calls: true,
            media: MediaConstraints::default(),
        }
    }
}

impl ClientConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `MAPMEET_API_URL`: default `http://127.0.0.1:3000`
    /// - `MAPMEET_STATE_DIR`: default `.mapmeet`
    /// - `MAPMEET_REQUEST_TIMEOUT_SECS`: default 10
    /// - `MAPMEET_CONNECT_TIMEOUT_SECS`: default 5
    /// - `MAPMEET_AUTO_JOIN_CALLS`: default true
    /// - `MAPMEET_CALL_AUDIO` / `MAPMEET_CALL_VIDEO`: default true
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for a boolean that is not one of
    /// `true/false/1/0/yes/no`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] over an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url =
            lookup("MAPMEET_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_owned()).trim_end_matches('/').to_owned();
        let state_dir = lookup("MAPMEET_STATE_DIR").map_or_else(|| PathBuf::from(DEFAULT_STATE_DIR), PathBuf::from);

        Ok(Self {
            api_base_url,
            state_dir,
            request_timeout_secs: env_parse(&lookup, "MAPMEET_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout_secs: env_parse(&lookup, "MAPMEET_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            auto_join_calls: env_bool(&lookup, "MAPMEET_AUTO_JOIN_CALLS", true)?,
            media: MediaConstraints {
                audio: env_bool(&lookup, "MAPMEET_CALL_AUDIO", true)?,
                video: env_bool(&lookup, "MAPMEET_CALL_VIDEO", true)?,
            },
        })
    }
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.trim().parse::<T>().ok()).unwrap_or(default)
}

fn env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Parse { var: key, value: raw }),
    }
}
