//! Session and request-throttling configuration.
//!
//! Configuration is stored at `~/.config/procura/config.json`. A missing
//! file yields the defaults; `PROCURA_*` environment variables override
//! individual values after loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "procura";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Prefix for environment overrides, e.g. `PROCURA_IDLE_TIMEOUT_MINUTES`
const ENV_PREFIX: &str = "PROCURA_";

/// Longest accepted session, idle or warning duration (one year)
pub const MAX_DURATION_MINUTES: i64 = 525_600;

/// Longest accepted rate-limit window (one year)
pub const MAX_WINDOW_MS: i64 = MAX_DURATION_MINUTES * 60_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find {0} directory")]
    MissingDirectory(&'static str),

    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },

    #[error("{key} must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: &'static str,
        value: String,
        min: i64,
        max: i64,
    },
}

fn check_range<T>(key: &'static str, value: T, min: i64, max: i64) -> Result<(), ConfigError>
where
    T: Copy + ToString + TryInto<i64>,
{
    match value.try_into() {
        Ok(v) if (min..=max).contains(&v) => Ok(()),
        _ => Err(ConfigError::OutOfRange {
            key,
            value: value.to_string(),
            min,
            max,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a stored token
    pub session_timeout_minutes: i64,
    /// How long before expiry a token is considered due for refresh
    pub refresh_buffer_minutes: i64,
    pub idle_timeout_minutes: u64,
    /// Lead time of the idle warning before the idle callback
    pub idle_warning_minutes: u64,
    pub rate_limit_max_attempts: u32,
    pub rate_limit_window_ms: u64,
    /// Upper bound on tracked rate-limit identifiers
    pub rate_limit_max_entries: usize,
    pub request_min_delay_ms: u64,
    pub request_max_retries: u32,
    pub request_retry_delay_ms: u64,
    pub api_base_url: String,
    pub login_route: String,
    pub token_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_minutes: 30,
            refresh_buffer_minutes: 5,
            idle_timeout_minutes: 30,
            idle_warning_minutes: 2,
            rate_limit_max_attempts: 5,
            rate_limit_window_ms: 60_000,
            rate_limit_max_entries: 10_000,
            request_min_delay_ms: 1_000,
            request_max_retries: 3,
            request_retry_delay_ms: 3_000,
            api_base_url: "http://localhost:3000/api".to_string(),
            login_route: "/login".to_string(),
            token_key: "auth_token".to_string(),
        }
    }
}

impl SessionConfig {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides(std::env::vars())?;
        Ok(config)
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject durations that are non-positive or too large to schedule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "session_timeout_minutes",
            self.session_timeout_minutes,
            1,
            MAX_DURATION_MINUTES,
        )?;
        check_range(
            "refresh_buffer_minutes",
            self.refresh_buffer_minutes,
            0,
            MAX_DURATION_MINUTES,
        )?;
        check_range(
            "idle_timeout_minutes",
            self.idle_timeout_minutes,
            1,
            MAX_DURATION_MINUTES,
        )?;
        check_range(
            "idle_warning_minutes",
            self.idle_warning_minutes,
            0,
            MAX_DURATION_MINUTES,
        )?;
        check_range("rate_limit_window_ms", self.rate_limit_window_ms, 1, MAX_WINDOW_MS)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let contents = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, contents).map_err(io_err)
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::MissingDirectory("config"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf, ConfigError> {
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::MissingDirectory("cache"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply `PROCURA_<FIELD>` overrides from the given variables.
    /// Unknown `PROCURA_` keys are ignored with a warning.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let invalid = || ConfigError::InvalidOverride {
                key: key.clone(),
                value: value.clone(),
            };
            match field {
                "SESSION_TIMEOUT_MINUTES" => {
                    self.session_timeout_minutes = value.parse().map_err(|_| invalid())?
                }
                "REFRESH_BUFFER_MINUTES" => {
                    self.refresh_buffer_minutes = value.parse().map_err(|_| invalid())?
                }
                "IDLE_TIMEOUT_MINUTES" => {
                    self.idle_timeout_minutes = value.parse().map_err(|_| invalid())?
                }
                "IDLE_WARNING_MINUTES" => {
                    self.idle_warning_minutes = value.parse().map_err(|_| invalid())?
                }
                "RATE_LIMIT_MAX_ATTEMPTS" => {
                    self.rate_limit_max_attempts = value.parse().map_err(|_| invalid())?
                }
                "RATE_LIMIT_WINDOW_MS" => {
                    self.rate_limit_window_ms = value.parse().map_err(|_| invalid())?
                }
                "RATE_LIMIT_MAX_ENTRIES" => {
                    self.rate_limit_max_entries = value.parse().map_err(|_| invalid())?
                }
                "REQUEST_MIN_DELAY_MS" => {
                    self.request_min_delay_ms = value.parse().map_err(|_| invalid())?
                }
                "REQUEST_MAX_RETRIES" => {
                    self.request_max_retries = value.parse().map_err(|_| invalid())?
                }
                "REQUEST_RETRY_DELAY_MS" => {
                    self.request_retry_delay_ms = value.parse().map_err(|_| invalid())?
                }
                "API_BASE_URL" => self.api_base_url = value,
                "LOGIN_ROUTE" => self.login_route = value,
                "TOKEN_KEY" => self.token_key = value,
                // Consumed by the CLI, not part of the session config
                "LOG_FILE" => {}
                other => warn!(key = other, "Ignoring unknown environment override"),
            }
        }
        self.validate()
    }

    // The accessors clamp into the accepted range, so a config built in code
    // without `validate` still yields schedulable durations.

    pub fn session_timeout(&self) -> chrono::Duration {
        minutes(self.session_timeout_minutes.clamp(1, MAX_DURATION_MINUTES))
    }

    pub fn refresh_buffer(&self) -> chrono::Duration {
        minutes(self.refresh_buffer_minutes.clamp(0, MAX_DURATION_MINUTES))
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        minutes_std(self.idle_timeout_minutes.max(1))
    }

    pub fn idle_warning_lead(&self) -> std::time::Duration {
        minutes_std(self.idle_warning_minutes)
    }

    pub fn rate_limit_window(&self) -> chrono::Duration {
        let ms = i64::try_from(self.rate_limit_window_ms).unwrap_or(MAX_WINDOW_MS);
        chrono::Duration::try_milliseconds(ms.clamp(1, MAX_WINDOW_MS))
            .unwrap_or_else(chrono::Duration::zero)
    }
}

fn minutes(value: i64) -> chrono::Duration {
    chrono::Duration::try_minutes(value).unwrap_or_else(chrono::Duration::zero)
}

fn minutes_std(value: u64) -> std::time::Duration {
    let capped = value.min(MAX_DURATION_MINUTES as u64);
    std::time::Duration::from_secs(capped.saturating_mul(60))
}
