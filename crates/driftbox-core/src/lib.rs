//! Driftbox Core Library
//!
//! Domain models, the content hash utility, the transfer error taxonomy, hook points
//! and configuration shared by every driftbox crate.

pub mod config;
pub mod error;
pub mod hash;
pub mod hooks;
pub mod models;
pub mod network;

// Re-export commonly used types
pub use config::{Config, StorageConfig, TransferSettings};
pub use error::{ErrorMetadata, LogLevel, TransferError};
pub use hash::{ContentHash, ContentHasher, HashAlgorithm, HashError};
pub use hooks::{
    ActionHook, ErrorReporter, NoOpErrorReporter, PolicyDecision, PresignOptions,
    TracingErrorReporter, TransferAction, TransferFailure, TransferHooks, UploadPolicyInput,
    UrlOptionsContext,
};
pub use models::{FileBlob, FileKind, FileMeta, FileTransfer, TransferDirection, TransferState};
pub use network::{default_concurrency, ConnectionQuality, DEFAULT_CONCURRENCY};
