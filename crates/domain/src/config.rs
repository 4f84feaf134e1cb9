//! Environment-driven configuration structures shared by the binary and the
//! engines.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::model::{ApiKey, FinishStampPolicy, TerminalStatuses};
use crate::services::cache::ServiceCatalogCache;
use crate::services::retry::RetryPolicy;

const DEFAULT_ENDPOINT_PATH: &str = "/api";

/// HTTP surface configuration: listener, shared database and the key callers
/// must present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    database_url: String,
    api_bind_address: String,
    api_key: ApiKey,
    endpoint_path: String,
    seed_demo_data: bool,
}

impl ApiConfig {
    /// Loads only the environment variables required by the API binary.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let endpoint_path = get_optional_var("API_ENDPOINT_PATH")
            .map(|path| {
                if path.starts_with('/') {
                    path
                } else {
                    format!("/{path}")
                }
            })
            .unwrap_or_else(|| DEFAULT_ENDPOINT_PATH.to_string());

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            api_bind_address: get_required_var("API_BIND_ADDRESS")?,
            api_key: ApiKey::new(&get_required_var("API_KEY")?),
            endpoint_path,
            seed_demo_data: get_parsed_var("API_SEED_DEMO_DATA", parse_bool)?.unwrap_or(false),
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    pub fn endpoint_path(&self) -> &str {
        &self.endpoint_path
    }

    pub fn seed_demo_data(&self) -> bool {
        self.seed_demo_data
    }
}

/// Engine tuning: terminal statuses, finish stamping, retry budget and cache
/// size. Every knob has a default, so an empty environment is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub terminal_statuses: TerminalStatuses,
    pub stamp_policy: FinishStampPolicy,
    pub retry: RetryPolicy,
    pub service_cache_capacity: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            terminal_statuses: TerminalStatuses::default(),
            stamp_policy: FinishStampPolicy::default(),
            retry: RetryPolicy::default(),
            service_cache_capacity: ServiceCatalogCache::DEFAULT_CAPACITY,
        }
    }
}

impl PoolConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;
        let defaults = Self::default();

        let terminal_statuses = get_parsed_var("POOL_TERMINAL_STATUSES", parse_statuses)?
            .unwrap_or(defaults.terminal_statuses);
        let stamp_policy = match get_parsed_var("POOL_STAMP_NON_TERMINAL", parse_bool)? {
            Some(true) => FinishStampPolicy::Always,
            _ => defaults.stamp_policy,
        };

        let mut retry = defaults.retry;
        if let Some(attempts) = get_parsed_var("POOL_RETRY_MAX_ATTEMPTS", parse_number::<u32>)? {
            retry = retry.with_max_attempts(attempts);
        }
        if let Some(ms) = get_parsed_var("POOL_RETRY_BASE_DELAY_MS", parse_number::<u64>)? {
            retry = retry.with_base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = get_parsed_var("POOL_RETRY_MAX_DELAY_MS", parse_number::<u64>)? {
            retry = retry.with_max_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = get_parsed_var("POOL_STORE_TIMEOUT_MS", parse_number::<u64>)? {
            retry = retry.with_attempt_timeout(Duration::from_millis(ms));
        }

        let service_cache_capacity =
            get_parsed_var("POOL_SERVICE_CACHE_CAPACITY", parse_number::<u64>)?
                .unwrap_or(defaults.service_cache_capacity);

        Ok(Self {
            terminal_statuses,
            stamp_policy,
            retry,
            service_cache_capacity,
        })
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or(ConfigError::MissingVar { key })
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn get_parsed_var<T>(
    key: &'static str,
    parse: fn(&str) -> Result<T, String>,
) -> Result<Option<T>, ConfigError> {
    get_optional_var(key)
        .map(|raw| parse(&raw).map_err(|reason| ConfigError::InvalidValue { key, reason }))
        .transpose()
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("`{other}` is not a boolean")),
    }
}

fn parse_number<T>(raw: &str) -> Result<T, String>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    raw.parse().map_err(|err: std::num::ParseIntError| err.to_string())
}

fn parse_statuses(raw: &str) -> Result<TerminalStatuses, String> {
    let statuses = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i32>()
                .map_err(|err| format!("`{part}`: {err}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if statuses.is_empty() {
        return Err("at least one status is required".into());
    }
    Ok(TerminalStatuses::new(statuses))
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("SMS_POOL_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid value in `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
