use crate::{ProviderRegistry, StorageProvider, StorageResult};
use driftbox_core::Config;
use std::sync::Arc;

/// Create the storage provider selected by configuration, using the built-in providers.
pub async fn create_provider(config: &Config) -> StorageResult<Arc<dyn StorageProvider>> {
    let registry = ProviderRegistry::with_defaults().await;
    registry.resolve(&config.storage).await
}
