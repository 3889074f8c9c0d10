//! Configuration module
//!
//! Environment-driven configuration for the store, the active storage provider and the
//! transfer queue. `.env` files are honoured through dotenvy.

use std::env;

use crate::network::ConnectionQuality;

const DEFAULT_DATABASE_URL: &str = "sqlite://driftbox.db?mode=rwc";
const DEFAULT_STORAGE_PROVIDER: &str = "gateway";
const DEFAULT_S3_KEY_PREFIX: &str = "files";
const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_MAX_MS: u64 = 60_000;
const CLEANUP_INTERVAL_SECS: u64 = 3_600;
const RETENTION_DAYS: u64 = 7;
const PROGRESS_THROTTLE_MS: u64 = 200;
const PRESIGN_EXPIRES_SECS: u64 = 900;
const WAIT_TIMEOUT_SECS: u64 = 120;

/// Storage provider selection and per-provider settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    /// Registry id of the active provider (`gateway`, `s3`, ...)
    pub provider: String,
    pub gateway_url: Option<String>,
    pub gateway_token: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // S3-compatible providers (MinIO, R2, ...)
    pub s3_key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_STORAGE_PROVIDER.to_string(),
            gateway_url: None,
            gateway_token: None,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            s3_key_prefix: DEFAULT_S3_KEY_PREFIX.to_string(),
        }
    }
}

/// Transfer queue tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferSettings {
    /// Explicit concurrency cap; `None` means adaptive from connection quality.
    pub concurrency: Option<usize>,
    pub connection_quality: Option<ConnectionQuality>,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub cleanup_interval_secs: u64,
    pub retention_days: u64,
    pub progress_throttle_ms: u64,
    pub presign_expires_secs: u64,
    pub wait_timeout_secs: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            concurrency: None,
            connection_quality: None,
            max_attempts: MAX_ATTEMPTS,
            backoff_base_ms: BACKOFF_BASE_MS,
            backoff_max_ms: BACKOFF_MAX_MS,
            cleanup_interval_secs: CLEANUP_INTERVAL_SECS,
            retention_days: RETENTION_DAYS,
            progress_throttle_ms: PROGRESS_THROTTLE_MS,
            presign_expires_secs: PRESIGN_EXPIRES_SECS,
            wait_timeout_secs: WAIT_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub storage: StorageConfig,
    pub transfer: TransferSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            storage: StorageConfig::default(),
            transfer: TransferSettings::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Malformed numbers fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage = StorageConfig {
            provider: non_empty("STORAGE_PROVIDER")
                .map(|v| v.trim().to_lowercase())
                .unwrap_or_else(|| DEFAULT_STORAGE_PROVIDER.to_string()),
            gateway_url: non_empty("STORAGE_GATEWAY_URL"),
            gateway_token: non_empty("STORAGE_GATEWAY_TOKEN"),
            s3_bucket: non_empty("S3_BUCKET"),
            s3_region: non_empty("S3_REGION").or_else(|| non_empty("AWS_REGION")),
            s3_endpoint: non_empty("S3_ENDPOINT"),
            s3_key_prefix: non_empty("S3_KEY_PREFIX")
                .map(|v| v.trim_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_S3_KEY_PREFIX.to_string()),
        };

        let connection_quality = match non_empty("TRANSFER_CONNECTION_QUALITY") {
            Some(value) => Some(value.parse::<ConnectionQuality>()?),
            None => None,
        };

        let transfer = TransferSettings {
            concurrency: non_empty("TRANSFER_CONCURRENCY")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .map(|v| v.max(1)),
            connection_quality,
            max_attempts: lookup("TRANSFER_MAX_ATTEMPTS")
                .unwrap_or_else(|| MAX_ATTEMPTS.to_string())
                .parse()
                .unwrap_or(MAX_ATTEMPTS)
                .max(1),
            backoff_base_ms: lookup("TRANSFER_BACKOFF_BASE_MS")
                .unwrap_or_else(|| BACKOFF_BASE_MS.to_string())
                .parse()
                .unwrap_or(BACKOFF_BASE_MS),
            backoff_max_ms: lookup("TRANSFER_BACKOFF_MAX_MS")
                .unwrap_or_else(|| BACKOFF_MAX_MS.to_string())
                .parse()
                .unwrap_or(BACKOFF_MAX_MS),
            cleanup_interval_secs: lookup("TRANSFER_CLEANUP_INTERVAL_SECS")
                .unwrap_or_else(|| CLEANUP_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(CLEANUP_INTERVAL_SECS),
            retention_days: lookup("TRANSFER_RETENTION_DAYS")
                .unwrap_or_else(|| RETENTION_DAYS.to_string())
                .parse()
                .unwrap_or(RETENTION_DAYS),
            progress_throttle_ms: lookup("TRANSFER_PROGRESS_THROTTLE_MS")
                .unwrap_or_else(|| PROGRESS_THROTTLE_MS.to_string())
                .parse()
                .unwrap_or(PROGRESS_THROTTLE_MS),
            presign_expires_secs: lookup("TRANSFER_PRESIGN_EXPIRES_SECS")
                .unwrap_or_else(|| PRESIGN_EXPIRES_SECS.to_string())
                .parse()
                .unwrap_or(PRESIGN_EXPIRES_SECS),
            wait_timeout_secs: lookup("TRANSFER_WAIT_TIMEOUT_SECS")
                .unwrap_or_else(|| WAIT_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(WAIT_TIMEOUT_SECS),
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            storage,
            transfer,
        })
    }
}
