//! Everything one pipeline run needs, borrowed from the queue for its duration.

use crate::binding::StoreBinding;
use crate::config::TransferQueueConfig;
use crate::transport::{Transport, TransportError};
use driftbox_core::{
    ActionHook, FileTransfer, PresignOptions, TransferAction, TransferDirection, TransferError,
    TransferHooks, UrlOptionsContext,
};
use driftbox_storage::{StorageError, StorageProvider};
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub struct TransferContext<'a> {
    pub store: &'a StoreBinding,
    pub provider: &'a dyn StorageProvider,
    pub transport: &'a dyn Transport,
    pub hooks: &'a TransferHooks,
    pub config: &'a TransferQueueConfig,
    pub cancel: CancellationToken,
}

impl TransferContext<'_> {
    /// Default presign options run through the url-options filters.
    pub fn presign_options(&self, transfer: &FileTransfer) -> PresignOptions {
        let defaults = PresignOptions {
            expires_in_ms: u64::try_from(self.config.presign_expires.as_millis())
                .unwrap_or(u64::MAX),
            disposition: None,
        };
        self.hooks.resolve_presign_options(
            defaults,
            &UrlOptionsContext {
                workspace_id: transfer.workspace_id.clone(),
                hash: transfer.hash.clone(),
                direction: transfer.direction,
            },
        )
    }

    pub fn emit(
        &self,
        hook: ActionHook,
        transfer: &FileTransfer,
        storage_id: Option<String>,
        bytes: Option<u64>,
    ) {
        self.hooks.emit(&TransferAction {
            hook,
            transfer_id: transfer.id.clone(),
            workspace_id: transfer.workspace_id.clone(),
            hash: transfer.hash.clone(),
            storage_id,
            bytes,
        });
    }

    /// Progress is advisory; a failed write never fails the transfer.
    pub async fn write_progress(
        &self,
        transfer: &FileTransfer,
        bytes_done: u64,
        bytes_total: u64,
    ) {
        let id = transfer.id.as_str();
        if let Err(e) = self
            .store
            .call(move |s| async move { s.update_progress(id, bytes_done, bytes_total).await })
            .await
        {
            tracing::warn!(error = %e, bytes_done, "Failed to record transfer progress");
        }
    }

    /// Await `fut` unless the transfer is cancelled first.
    pub async fn cancellable<T, Fut>(&self, fut: Fut) -> Result<T, TransferError>
    where
        Fut: Future<Output = T>,
    {
        cancellable(&self.cancel, fut).await
    }
}

pub async fn cancellable<T, Fut>(cancel: &CancellationToken, fut: Fut) -> Result<T, TransferError>
where
    Fut: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled("transfer cancelled".to_string())),
        out = fut => Ok(out),
    }
}

/// Map a provider failure onto the transfer taxonomy.
pub fn storage_error(err: StorageError, direction: TransferDirection) -> TransferError {
    match err {
        StorageError::PayloadTooLarge(message) => TransferError::FileTooLarge(message),
        err if err.is_retryable() => transport_failure(direction, err.to_string()),
        err => TransferError::ProviderError(err.to_string()),
    }
}

pub fn transport_error(err: TransportError, direction: TransferDirection) -> TransferError {
    match err {
        TransportError::Cancelled => TransferError::Cancelled("transfer cancelled".to_string()),
        err => transport_failure(direction, err.to_string()),
    }
}

pub fn transport_failure(direction: TransferDirection, message: String) -> TransferError {
    match direction {
        TransferDirection::Upload => TransferError::UploadFailed(message),
        TransferDirection::Download => TransferError::DownloadFailed(message),
    }
}
