use driftbox_core::{default_concurrency, Config, ConnectionQuality, TransferSettings};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferQueueConfig {
    /// Maximum number of transfers in flight at once. Never below 1.
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Minimum time between two retention sweeps triggered by scheduler passes.
    pub cleanup_interval: Duration,
    /// Terminal transfers older than this are deleted by the sweep.
    pub retention: Duration,
    /// Minimum time between two progress writes of one download.
    pub progress_throttle: Duration,
    pub presign_expires: Duration,
    /// Wait budget used by `ensure_downloaded_blob`.
    pub wait_timeout: Duration,
}

impl Default for TransferQueueConfig {
    fn default() -> Self {
        Self::from_settings(&TransferSettings::default())
    }
}

impl TransferQueueConfig {
    /// Build from environment settings. An explicit concurrency wins over the
    /// connection-quality default.
    pub fn from_settings(settings: &TransferSettings) -> Self {
        Self {
            concurrency: settings
                .concurrency
                .unwrap_or_else(|| default_concurrency(settings.connection_quality))
                .max(1),
            max_attempts: settings.max_attempts.max(1),
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_max: Duration::from_millis(settings.backoff_max_ms),
            cleanup_interval: Duration::from_secs(settings.cleanup_interval_secs),
            retention: Duration::from_secs(settings.retention_days.saturating_mul(24 * 60 * 60)),
            progress_throttle: Duration::from_millis(settings.progress_throttle_ms),
            presign_expires: Duration::from_secs(settings.presign_expires_secs),
            wait_timeout: Duration::from_secs(settings.wait_timeout_secs),
        }
    }

    /// Build from loaded configuration. `quality` is a live hint from the host and only
    /// applies when no explicit concurrency is configured.
    pub fn from_config(config: &Config, quality: Option<ConnectionQuality>) -> Self {
        let mut settings = config.transfer.clone();
        if quality.is_some() {
            settings.connection_quality = quality;
        }
        Self::from_settings(&settings)
    }

    /// Recompute the adaptive cap for a new connection quality.
    pub fn with_connection_quality(mut self, quality: Option<ConnectionQuality>) -> Self {
        self.concurrency = default_concurrency(quality);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}
