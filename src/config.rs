//! Configuration loader for the `floodwatch-ingest` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Nothing else in the crate reads `env::var`.
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::ingest::IngestSettings;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Same as `parse_env_u32!`, for durations and other wide values.
macro_rules! parse_env_u64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// HTTP listen port.
    pub http_port: u16,

    /// Bearer key for write endpoints. `None` rejects every write.
    pub api_key: Option<String>,

    pub duplicate_window_secs: u64,
    pub duplicate_match_radius_ms: u64,
    pub alert_dedup_window_secs: u64,
    pub alert_retention_secs: u64,

    pub rate_limit_window_secs: u64,
    pub rate_limit_max: u32,

    /// Bound on each cache/store call made on a fail-open path.
    pub dependency_timeout_ms: u64,

    pub gateway_offline_secs: u64,
    pub maintenance_interval_secs: u64,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `HTTP_PORT` – listen port (default: 8080)
/// - `API_KEY_SECRET` – bearer key for write endpoints (default: unset)
/// - `DUPLICATE_WINDOW_SECS` (300), `DUPLICATE_MATCH_RADIUS_MS` (1000)
/// - `ALERT_DEDUP_WINDOW_SECS` (300), `ALERT_RETENTION_SECS` (7776000)
/// - `RATE_LIMIT_WINDOW_SECS` (60), `RATE_LIMIT_MAX` (20)
/// - `DEPENDENCY_TIMEOUT_MS` (3000)
/// - `GATEWAY_OFFLINE_SECS` (600), `MAINTENANCE_INTERVAL_SECS` (60)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let http_port = u16::try_from(parse_env_u32!("HTTP_PORT", 8080))
        .map_err(|e| anyhow!("Invalid HTTP_PORT: {}", e))?;
    let api_key = env::var("API_KEY_SECRET").ok().filter(|k| !k.is_empty());

    let config = Config {
        db_url,
        db_pool_max,
        http_port,
        api_key,
        duplicate_window_secs: parse_env_u64!("DUPLICATE_WINDOW_SECS", 300),
        duplicate_match_radius_ms: parse_env_u64!("DUPLICATE_MATCH_RADIUS_MS", 1000),
        alert_dedup_window_secs: parse_env_u64!("ALERT_DEDUP_WINDOW_SECS", 300),
        alert_retention_secs: parse_env_u64!("ALERT_RETENTION_SECS", 7_776_000),
        rate_limit_window_secs: parse_env_u64!("RATE_LIMIT_WINDOW_SECS", 60),
        rate_limit_max: parse_env_u32!("RATE_LIMIT_MAX", 20),
        dependency_timeout_ms: parse_env_u64!("DEPENDENCY_TIMEOUT_MS", 3000),
        gateway_offline_secs: parse_env_u64!("GATEWAY_OFFLINE_SECS", 600),
        maintenance_interval_secs: parse_env_u64!("MAINTENANCE_INTERVAL_SECS", 60),
    };

    if config.maintenance_interval_secs == 0 {
        return Err(anyhow!("MAINTENANCE_INTERVAL_SECS must be greater than 0"));
    }
    Ok(config)
}

impl Config {
    pub fn dependency_timeout(&self) -> Duration {
        Duration::from_millis(self.dependency_timeout_ms)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_dedup_window_secs)
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            duplicate_window: Duration::from_secs(self.duplicate_window_secs),
            match_radius: Duration::from_millis(self.duplicate_match_radius_ms),
            rate_limit_window: Duration::from_secs(self.rate_limit_window_secs),
            rate_limit_max: self.rate_limit_max,
            dependency_timeout: self.dependency_timeout(),
        }
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password and never prints the API key itself.
    pub fn log_config(&self) {
        // ---
        // Mask the password in the database URL for security
        let masked_db_url = if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                format!(
                    "{}:****{}",
                    &self.db_url[..colon_pos],
                    &self.db_url[at_pos..]
                )
            } else {
                self.db_url.clone()
            }
        } else {
            self.db_url.clone()
        };
        let api_key = if self.api_key.is_some() { "set" } else { "unset (writes disabled)" };

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL              : {}", masked_db_url);
        tracing::info!("  DB_POOL_MAX               : {}", self.db_pool_max);
        tracing::info!("  HTTP_PORT                 : {}", self.http_port);
        tracing::info!("  API_KEY_SECRET            : {}", api_key);
        tracing::info!("  DUPLICATE_WINDOW_SECS     : {}", self.duplicate_window_secs);
        tracing::info!("  DUPLICATE_MATCH_RADIUS_MS : {}", self.duplicate_match_radius_ms);
        tracing::info!("  ALERT_DEDUP_WINDOW_SECS   : {}", self.alert_dedup_window_secs);
        tracing::info!("  ALERT_RETENTION_SECS      : {}", self.alert_retention_secs);
        tracing::info!("  RATE_LIMIT_WINDOW_SECS    : {}", self.rate_limit_window_secs);
        tracing::info!("  RATE_LIMIT_MAX            : {}", self.rate_limit_max);
        tracing::info!("  DEPENDENCY_TIMEOUT_MS     : {}", self.dependency_timeout_ms);
        tracing::info!("  GATEWAY_OFFLINE_SECS      : {}", self.gateway_offline_secs);
        tracing::info!("  MAINTENANCE_INTERVAL_SECS : {}", self.maintenance_interval_secs);
    }
}
