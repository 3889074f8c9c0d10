//! Provider registry
//!
//! Maps provider ids to constructors. The active provider is built on first resolution
//! and memoized for that exact [`StorageConfig`] until [`ProviderRegistry::reset`] is
//! called or a different configuration is resolved.

use driftbox_core::StorageConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::traits::{StorageError, StorageProvider, StorageResult};

/// Constructor for one provider id.
pub type ProviderFactory =
    Arc<dyn Fn(&StorageConfig) -> StorageResult<Arc<dyn StorageProvider>> + Send + Sync>;

/// Registry for provider constructors and the memoized active provider.
#[derive(Clone)]
pub struct ProviderRegistry {
    factories: Arc<RwLock<HashMap<String, ProviderFactory>>>,
    active: Arc<RwLock<Option<(StorageConfig, Arc<dyn StorageProvider>)>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(RwLock::new(None)),
        }
    }

    /// Registry with the built-in `gateway` (and, when compiled in, `s3`) providers.
    pub async fn with_defaults() -> Self {
        let registry = Self::new();
        registry
            .register(crate::gateway::GATEWAY_PROVIDER_ID, |config: &StorageConfig| {
                let base_url = config.gateway_url.clone().ok_or_else(|| {
                    StorageError::ConfigError("STORAGE_GATEWAY_URL not configured".to_string())
                })?;
                let provider =
                    crate::gateway::GatewayProvider::new(base_url, config.gateway_token.clone())?;
                Ok(Arc::new(provider) as Arc<dyn StorageProvider>)
            })
            .await;

        #[cfg(feature = "storage-s3")]
        registry
            .register(crate::s3::S3_PROVIDER_ID, |config: &StorageConfig| {
                let bucket = config.s3_bucket.clone().ok_or_else(|| {
                    StorageError::ConfigError("S3_BUCKET not configured".to_string())
                })?;
                let region = config.s3_region.clone().ok_or_else(|| {
                    StorageError::ConfigError("S3_REGION or AWS_REGION not configured".to_string())
                })?;
                let provider = crate::s3::S3Provider::new(
                    bucket,
                    region,
                    config.s3_endpoint.clone(),
                    config.s3_key_prefix.clone(),
                )?;
                Ok(Arc::new(provider) as Arc<dyn StorageProvider>)
            })
            .await;

        registry
    }

    /// Register (or replace) the constructor for `id`.
    pub async fn register<F>(&self, id: &str, factory: F)
    where
        F: Fn(&StorageConfig) -> StorageResult<Arc<dyn StorageProvider>> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write().await;
        factories.insert(id.to_string(), Arc::new(factory));
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.factories.read().await.contains_key(id)
    }

    /// Registered provider ids, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Resolve the provider selected by `config.provider`.
    pub async fn resolve(&self, config: &StorageConfig) -> StorageResult<Arc<dyn StorageProvider>> {
        if let Some((cached_config, provider)) = self.active.read().await.as_ref() {
            if cached_config == config {
                return Ok(provider.clone());
            }
        }

        let mut active = self.active.write().await;
        if let Some((cached_config, provider)) = active.as_ref() {
            if cached_config == config {
                return Ok(provider.clone());
            }
        }

        let factory = self
            .factories
            .read()
            .await
            .get(&config.provider)
            .cloned()
            .ok_or_else(|| StorageError::UnknownProvider(config.provider.clone()))?;
        let provider = factory(config)?;

        tracing::info!(
            provider = %config.provider,
            display_name = provider.display_name(),
            "Storage provider resolved"
        );

        *active = Some((config.clone(), provider.clone()));
        Ok(provider)
    }

    /// Drop the memoized provider so the next `resolve` rebuilds it.
    pub async fn reset(&self) {
        *self.active.write().await = None;
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
