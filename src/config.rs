use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub max_connection_pooling: u32,
    pub port: u16,
    pub log_file: String,
    pub token_ttl: Duration,
    pub history_cache_ttl: Duration,
    pub cache_sweep_interval: Duration,
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // mandatory fields
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let jwt_secret = lookup("JWT_SECRET").unwrap_or("your-jwt-secret".to_string());

        // optional fields
        Ok(Self {
            database_url,
            jwt_secret,
            max_connection_pooling: parse_or(&lookup, "MAX_CONNECTION_POOLING", 5)?,
            port: parse_or(&lookup, "PORT", 8888)?,
            log_file: lookup("LOG_FILE").unwrap_or("app.log".to_string()),
            token_ttl: Duration::from_secs(parse_or(&lookup, "TOKEN_TTL_SECS", 4 * 60 * 60)?),
            history_cache_ttl: Duration::from_secs(parse_or(&lookup, "HISTORY_CACHE_TTL_SECS", 60 * 60)?),
            cache_sweep_interval: Duration::from_secs(parse_or(&lookup, "CACHE_SWEEP_INTERVAL_SECS", 10 * 60)?),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
