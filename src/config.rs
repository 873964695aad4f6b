//! File-based configuration.
//!
//! ```toml
//! logging = true
//!
//! [errors]
//! debug = false
//! format = "json"        # html | json | text
//!
//! [auth]
//! token = "change-me"
//! realm = "api"
//! public_paths = ["/", "/health", "/docs/*"]
//!
//! [rate_limit]
//! limit = 200
//! window_secs = 60
//! ```
//!
//! Every section is optional; a missing `[auth]` or `[rate_limit]` leaves
//! that layer out of [`Pipeline::from_config`](crate::Pipeline::from_config).

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::middleware::{AuthConfig, RateLimitConfig};
use crate::render::ErrorFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value: {0}")]
    Invalid(String),
}

/// Error-boundary settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ErrorConfig {
    /// Include failure details in 500 bodies. Development only.
    pub debug: bool,
    pub format: ErrorFormat,
}

/// Root configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Add the access-log middleware.
    pub logging: bool,
    pub errors: ErrorConfig,
    pub auth: Option<AuthConfig>,
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self { logging: true, errors: ErrorConfig::default(), auth: None, rate_limit: None }
    }
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_toml_str(&input)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(auth) = &self.auth {
            if auth.token.is_empty() {
                return Err(ConfigError::Invalid("auth.token must not be empty".into()));
            }
        }
        if let Some(rl) = &self.rate_limit {
            if rl.window_secs == 0 {
                return Err(ConfigError::Invalid("rate_limit.window_secs must be at least 1".into()));
            }
            if rl.backend_timeout_ms == 0 {
                return Err(ConfigError::Invalid("rate_limit.backend_timeout_ms must be at least 1".into()));
            }
        }
        Ok(())
    }
}
