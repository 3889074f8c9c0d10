//! Storage provider contract
//!
//! A provider never moves bytes itself. It hands out presigned targets that the transfer
//! queue then reads from or writes to, and optionally records the final location
//! (`commit_upload`) or removes it (`delete_object`).

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use driftbox_core::FileKind;
use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The backend refused the object because of its size. Never worth retrying.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Operation not supported by provider {provider}: {operation}")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },

    #[error("Unknown storage provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Backend responded with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Whether a later attempt could succeed without any change on our side.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            StorageError::BackendError(_) => true,
            StorageError::PayloadTooLarge(_)
            | StorageError::Unsupported { .. }
            | StorageError::UnknownProvider(_)
            | StorageError::InvalidKey(_)
            | StorageError::InvalidResponse(_)
            | StorageError::ConfigError(_) => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// What a provider can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    pub presigned_upload: bool,
    pub presigned_download: bool,
    pub multipart: bool,
    pub commit_upload: bool,
    pub delete_object: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignUploadRequest {
    pub workspace_id: String,
    pub hash: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignDownloadRequest {
    pub workspace_id: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
}

/// A time-limited URL plus whatever the transfer must send with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedTarget {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Expiry as milliseconds since the Unix epoch.
    pub expires_at: i64,
    /// Backend-assigned id, when known at presign time (uploads only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
}

impl PresignedTarget {
    /// The declared HTTP method, or `default` when absent or unparseable.
    pub fn http_method(&self, default: Method) -> Method {
        self.method
            .as_deref()
            .and_then(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
            .unwrap_or(default)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expires_at).single()
    }
}

/// Descriptive metadata recorded alongside a committed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCommitMeta {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub kind: FileKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitUploadRequest {
    pub workspace_id: String,
    pub hash: String,
    pub storage_id: String,
    pub meta: UploadCommitMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_provider_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteObjectRequest {
    pub workspace_id: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
}

/// Storage provider abstraction
///
/// Implementations must be cheap to share (`Arc<dyn StorageProvider>`) and safe to call
/// from several transfers at once.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Stable registry id, persisted as `FileMeta.storage_provider_id`.
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn presign_upload(&self, request: &PresignUploadRequest)
        -> StorageResult<PresignedTarget>;

    async fn presign_download(
        &self,
        request: &PresignDownloadRequest,
    ) -> StorageResult<PresignedTarget>;

    /// Record a finished upload. Only called when `capabilities().commit_upload` is set.
    async fn commit_upload(&self, _request: &CommitUploadRequest) -> StorageResult<()> {
        Err(StorageError::Unsupported {
            provider: self.id().to_string(),
            operation: "commit_upload",
        })
    }

    async fn delete_object(&self, _request: &DeleteObjectRequest) -> StorageResult<()> {
        Err(StorageError::Unsupported {
            provider: self.id().to_string(),
            operation: "delete_object",
        })
    }
}
