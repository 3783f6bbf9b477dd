//! Runtime configuration loaded from the environment.
//!
//! Every deployable binary (worker, control interface) builds one
//! [`RuntimeConfig`] at startup and passes it down; nothing else reads the
//! environment. Unset variables fall back to development defaults, invalid
//! values fail startup.

use std::env;

use serde::{Deserialize, Serialize};

/// Default upload size cap when `MAX_FILE_SIZE` is unset.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 150 * 1024 * 1024;

/// Default number of jobs one worker processes concurrently.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 2;

/// Retention for completed jobs when `JOB_RETENTION_HOURS` is unset.
pub const DEFAULT_JOB_RETENTION_HOURS: u64 = 48;

/// Object store connection settings (MinIO or any S3-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub endpoint: String,
    pub port: u16,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
    pub upload_bucket: String,
    pub results_bucket: String,
}

impl StoreConfig {
    /// Full endpoint URL including scheme and port.
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.endpoint, self.port)
    }
}

/// Complete runtime configuration for worker and control interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub redis_url: String,

    pub store: StoreConfig,

    pub worker_concurrency: usize,

    /// Upload size cap in bytes.
    pub max_file_size: u64,

    pub admin_password: Option<String>,

    /// Retention for completed jobs, hours. Failed jobs are retained for
    /// seven times this horizon.
    pub job_retention_hours: u64,

    pub allowed_origins: Vec<String>,

    pub rate_limit_enabled: bool,
}

impl RuntimeConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = StoreConfig {
            endpoint: var_or("MINIO_ENDPOINT", "127.0.0.1"),
            port: parse_var("MINIO_PORT", 9000)?,
            access_key: var_or("MINIO_ACCESS_KEY", "minioadmin"),
            secret_key: var_or("MINIO_SECRET_KEY", "minioadmin"),
            use_ssl: parse_bool_var("MINIO_USE_SSL", false)?,
            upload_bucket: var_or("UPLOAD_BUCKET", "uploads"),
            results_bucket: var_or("RESULTS_BUCKET", "results"),
        };

        Ok(Self {
            redis_url: var_or("REDIS_URL", "redis://127.0.0.1:6379"),
            store,
            worker_concurrency: parse_var("WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?,
            max_file_size: match env::var("MAX_FILE_SIZE") {
                Ok(raw) => parse_size(&raw)?,
                Err(_) => DEFAULT_MAX_FILE_SIZE,
            },
            admin_password: env::var("ADMIN_PASSWORD").ok().filter(|p| !p.is_empty()),
            job_retention_hours: parse_var("JOB_RETENTION_HOURS", DEFAULT_JOB_RETENTION_HOURS)?,
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            rate_limit_enabled: parse_bool_var("RATE_LIMIT_ENABLED", false)?,
        })
    }

}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: name.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool_var(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                var: name.to_string(),
                value: raw,
            }),
        },
        Err(_) => Ok(default),
    }
}

/// Parses a size literal of the form `<number>[B|KB|MB|GB]`.
///
/// A bare number is taken as bytes. Units are decimal-insensitive but binary
/// valued (`1KB` = 1024 bytes), matching the upload limit semantics.
pub fn parse_size(raw: &str) -> Result<u64, ConfigError> {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (digits, multiplier) = if let Some(rest) = upper.strip_suffix("GB") {
        (rest, 1024 * 1024 * 1024)
    } else if let Some(rest) = upper.strip_suffix("MB") {
        (rest, 1024 * 1024)
    } else if let Some(rest) = upper.strip_suffix("KB") {
        (rest, 1024)
    } else if let Some(rest) = upper.strip_suffix('B') {
        (rest, 1)
    } else {
        (upper.as_str(), 1)
    };

    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| ConfigError::InvalidValue {
            var: "MAX_FILE_SIZE".to_string(),
            value: raw.to_string(),
        })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },
}
