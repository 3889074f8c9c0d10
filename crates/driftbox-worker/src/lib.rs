//! Driftbox Worker
//!
//! The transfer queue: it schedules uploads and downloads of content-addressed blobs
//! between the local store and a remote storage provider, within a concurrency budget,
//! with retry, cancellation and integrity verification.

pub mod backoff;
pub mod binding;
pub mod config;
pub mod context;
pub mod download;
pub mod queue;
pub mod telemetry;
pub mod transport;
pub mod upload;
pub mod waiters;

pub use backoff::compute_backoff;
pub use binding::StoreBinding;
pub use config::TransferQueueConfig;
pub use queue::{TransferQueue, TransferQueueBuilder};
pub use telemetry::init_telemetry;
pub use transport::{
    ByteStream, DownloadResponse, ReqwestTransport, Transport, TransportError, UploadResponse,
};
pub use waiters::Waiters;
