//! Persistent store contract
//!
//! The queue only talks to storage through [`TransferStore`]: a narrow CRUD + query surface
//! over transfer rows, file metadata and cached blobs. Other subsystems read the same rows
//! to observe progress without going through the queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftbox_core::{FileBlob, FileMeta, FileTransfer, TransferDirection, TransferError};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The underlying handle was closed, typically during a workspace database swap.
    #[error("store is closed")]
    Closed,

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflicting record: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid stored value: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_closed(&self) -> bool {
        matches!(self, StoreError::Closed)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => StoreError::Closed,
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            other @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) => {
                StoreError::Decode(other.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        TransferError::Store(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert a new transfer row. Fails with `Conflict` if an active row already exists
    /// for the same `(workspace_id, hash, direction)`.
    async fn insert_transfer(&self, transfer: &FileTransfer) -> StoreResult<()>;

    async fn get_transfer(&self, id: &str) -> StoreResult<Option<FileTransfer>>;

    /// The `queued` or `running` transfer for a key, if any.
    async fn find_active_transfer(
        &self,
        workspace_id: &str,
        hash: &str,
        direction: TransferDirection,
    ) -> StoreResult<Option<FileTransfer>>;

    /// Up to `limit` queued transfers, oldest first.
    async fn list_queued(&self, workspace_id: &str, limit: usize)
        -> StoreResult<Vec<FileTransfer>>;

    /// Write the mutable columns of a transfer row through.
    ///
    /// Returns `false` if the row is gone or already terminal; terminal rows are never
    /// rewritten.
    async fn update_transfer(&self, transfer: &FileTransfer) -> StoreResult<bool>;

    /// Progress-only write for a running transfer.
    async fn update_progress(&self, id: &str, bytes_done: u64, bytes_total: u64)
        -> StoreResult<()>;

    /// Put `running` rows of a workspace back to `queued`, except `exclude_ids`.
    async fn requeue_running(&self, workspace_id: &str, exclude_ids: &[String])
        -> StoreResult<u64>;

    /// Delete `done`/`failed` rows created before `cutoff`.
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    async fn get_file_meta(&self, hash: &str) -> StoreResult<Option<FileMeta>>;

    /// Insert or replace metadata for a hash.
    async fn put_file_meta(&self, meta: &FileMeta) -> StoreResult<()>;

    /// Record where an upload landed, bumping `clock` in one transaction.
    async fn commit_storage_location(
        &self,
        hash: &str,
        storage_id: &str,
        storage_provider_id: Option<&str>,
    ) -> StoreResult<FileMeta>;

    async fn get_blob(&self, hash: &str) -> StoreResult<Option<FileBlob>>;

    /// Store blob bytes. A second write for the same hash is a no-op.
    async fn put_blob(&self, blob: &FileBlob) -> StoreResult<()>;
}

/// Supplies the current store handle after the previous one reported `Closed`.
#[async_trait]
pub trait StoreResolver: Send + Sync {
    async fn resolve(&self) -> StoreResult<Arc<dyn TransferStore>>;
}

/// A swappable store handle, for hosts that replace the database on workspace switch.
pub struct StoreHandle {
    current: RwLock<Arc<dyn TransferStore>>,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self {
            current: RwLock::new(store),
        }
    }

    pub fn current(&self) -> StoreResult<Arc<dyn TransferStore>> {
        self.current
            .read()
            .map(|store| store.clone())
            .map_err(|_| StoreError::Closed)
    }

    /// Point the handle at a new store; the next `resolve` returns it.
    pub fn swap(&self, store: Arc<dyn TransferStore>) {
        if let Ok(mut current) = self.current.write() {
            *current = store;
        }
    }
}

#[async_trait]
impl StoreResolver for StoreHandle {
    async fn resolve(&self) -> StoreResult<Arc<dyn TransferStore>> {
        self.current()
    }
}
