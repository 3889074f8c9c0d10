//! Error types module
//!
//! `TransferError` is the single error type surfaced by the transfer queue: to waiters,
//! to the error reporter, and (as `error_code` + `last_error`) in persisted transfer rows.
//! Variants self-describe their machine-readable code and whether the queue may retry them.

use crate::hash::HashError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like transport hiccups
    Warn,
    /// Error level - for unexpected or final failures
    Error,
}

/// Metadata describing how an error should be classified and logged
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "FILE_NOT_FOUND")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File validation failed: {0}")]
    FileValidation(String),

    #[error("File too large: {0}")]
    FileTooLarge(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Timed out waiting for transfer {id} after {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },

    #[error("Transfer cancelled: {0}")]
    Cancelled(String),

    #[error("Transfer not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),
}

/// Static metadata for each variant: (error_code, recoverable, log_level).
fn transfer_error_static_metadata(err: &TransferError) -> (&'static str, bool, LogLevel) {
    match err {
        TransferError::FileNotFound(_) => ("FILE_NOT_FOUND", false, LogLevel::Warn),
        TransferError::FileValidation(_) => ("FILE_VALIDATION", false, LogLevel::Debug),
        TransferError::FileTooLarge(_) => ("FILE_TOO_LARGE", false, LogLevel::Warn),
        TransferError::UploadFailed(_) => ("UPLOAD_FAILED", true, LogLevel::Warn),
        TransferError::DownloadFailed(_) => ("DOWNLOAD_FAILED", true, LogLevel::Warn),
        TransferError::ProviderError(_) => ("PROVIDER_ERROR", false, LogLevel::Error),
        TransferError::Timeout { .. } => ("TRANSFER_TIMEOUT", false, LogLevel::Debug),
        TransferError::Cancelled(_) => ("TRANSFER_CANCELLED", false, LogLevel::Debug),
        TransferError::NotFound(_) => ("TRANSFER_NOT_FOUND", false, LogLevel::Debug),
        TransferError::Store(_) => ("STORE_ERROR", true, LogLevel::Error),
    }
}

impl ErrorMetadata for TransferError {
    fn error_code(&self) -> &'static str {
        transfer_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        transfer_error_static_metadata(self).1
    }

    fn log_level(&self) -> LogLevel {
        transfer_error_static_metadata(self).2
    }
}

impl TransferError {
    /// Message without the variant prefix, as stored in `FileTransfer.last_error`.
    pub fn detail(&self) -> String {
        match self {
            TransferError::FileNotFound(m)
            | TransferError::FileValidation(m)
            | TransferError::FileTooLarge(m)
            | TransferError::UploadFailed(m)
            | TransferError::DownloadFailed(m)
            | TransferError::ProviderError(m)
            | TransferError::Cancelled(m)
            | TransferError::NotFound(m)
            | TransferError::Store(m) => m.clone(),
            TransferError::Timeout { .. } => self.to_string(),
        }
    }

    /// Rebuild a typed error from a persisted `(error_code, last_error)` pair.
    ///
    /// Unknown or missing codes map to `ProviderError`, the generic final failure.
    pub fn from_code(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        match code.unwrap_or_default() {
            "FILE_NOT_FOUND" => TransferError::FileNotFound(message),
            "FILE_VALIDATION" => TransferError::FileValidation(message),
            "FILE_TOO_LARGE" => TransferError::FileTooLarge(message),
            "UPLOAD_FAILED" => TransferError::UploadFailed(message),
            "DOWNLOAD_FAILED" => TransferError::DownloadFailed(message),
            "TRANSFER_CANCELLED" => TransferError::Cancelled(message),
            "TRANSFER_NOT_FOUND" => TransferError::NotFound(message),
            "STORE_ERROR" => TransferError::Store(message),
            _ => TransferError::ProviderError(message),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled(_))
    }
}

impl From<HashError> for TransferError {
    fn from(err: HashError) -> Self {
        TransferError::FileValidation(err.to_string())
    }
}
