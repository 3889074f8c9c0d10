//! Store binding with rebind-on-handoff
//!
//! Hosts that swap the workspace database close the old pool while transfers are still
//! being scheduled. A call that observes [`StoreError::Closed`] asks the resolver for the
//! current handle, swaps it in and retries the call once.

use driftbox_db::{StoreError, StoreResolver, StoreResult, TransferStore};
use std::future::Future;
use std::sync::{Arc, RwLock};

pub struct StoreBinding {
    current: RwLock<Arc<dyn TransferStore>>,
    resolver: Option<Arc<dyn StoreResolver>>,
}

impl StoreBinding {
    pub fn new(store: Arc<dyn TransferStore>, resolver: Option<Arc<dyn StoreResolver>>) -> Self {
        Self {
            current: RwLock::new(store),
            resolver,
        }
    }

    pub fn current(&self) -> Arc<dyn TransferStore> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace(&self, store: Arc<dyn TransferStore>) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = store;
    }

    /// Run `op` against the bound store, rebinding once if the store reports closed.
    pub async fn call<T, F, Fut>(&self, op: F) -> StoreResult<T>
    where
        F: Fn(Arc<dyn TransferStore>) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        match op(self.current()).await {
            Err(StoreError::Closed) => {
                let Some(resolver) = &self.resolver else {
                    return Err(StoreError::Closed);
                };
                tracing::info!("Store closed, rebinding to current handle");
                let store = resolver.resolve().await?;
                self.replace(store.clone());
                op(store).await
            }
            other => other,
        }
    }
}
