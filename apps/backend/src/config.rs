//! Service configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use kobo_core::progress::DEFAULT_PART_PATTERN;
use kobo_core::PartPattern;
use thiserror::Error;

pub const DEFAULT_LOCAL_DB_PATH: &str = "/tmp/KoboReader.sqlite";
pub const DEFAULT_REMOTE_DB_KEY: &str = "kobo/KoboReader.sqlite";
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_COVERS_PREFIX: &str = "covers/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime configuration.
///
/// Storage credentials are read separately by `StorageService::new`.
#[derive(Debug, Clone)]
pub struct Config {
    pub local_db_path: PathBuf,
    pub remote_db_key: String,
    pub remote_timeout: Duration,
    pub covers_prefix: String,
    /// Bearer token guarding `/api/*`; `None` disables auth.
    pub api_token: Option<String>,
    pub part_pattern: PartPattern,
    pub host: String,
    pub port: String,
}

impl Config {
    /// Read configuration from environment variables.
    ///
    /// Optional env vars (defaults in parentheses):
    /// - LOCAL_DB_PATH (`/tmp/KoboReader.sqlite`)
    /// - REMOTE_DB_KEY (`kobo/KoboReader.sqlite`)
    /// - REMOTE_TIMEOUT_SECS (`120`)
    /// - COVERS_PREFIX (`covers/`)
    /// - API_TOKEN (unset: auth disabled)
    /// - PART_ID_PATTERN (`part\d+`)
    /// - HOST / PORT (`0.0.0.0` / `3000`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let remote_timeout_secs = match var("REMOTE_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                name: "REMOTE_TIMEOUT_SECS",
                reason: e.to_string(),
            })?,
            None => DEFAULT_REMOTE_TIMEOUT_SECS,
        };
        if remote_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "REMOTE_TIMEOUT_SECS",
                reason: "must be at least 1 second".to_string(),
            });
        }

        let pattern = var("PART_ID_PATTERN").unwrap_or_else(|| DEFAULT_PART_PATTERN.to_string());
        let part_pattern = PartPattern::new(&pattern).map_err(|e| ConfigError::Invalid {
            name: "PART_ID_PATTERN",
            reason: e.to_string(),
        })?;

        Ok(Self {
            local_db_path: PathBuf::from(
                var("LOCAL_DB_PATH").unwrap_or_else(|| DEFAULT_LOCAL_DB_PATH.to_string()),
            ),
            remote_db_key: var("REMOTE_DB_KEY")
                .unwrap_or_else(|| DEFAULT_REMOTE_DB_KEY.to_string()),
            remote_timeout: Duration::from_secs(remote_timeout_secs),
            covers_prefix: var("COVERS_PREFIX")
                .unwrap_or_else(|| DEFAULT_COVERS_PREFIX.to_string()),
            api_token: var("API_TOKEN"),
            part_pattern,
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PORT").unwrap_or_else(|| "3000".to_string()),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
