//! Driftbox Storage Library
//!
//! Backend-agnostic storage provider contract, the provider registry and the built-in
//! providers:
//!
//! - `gateway`: presigning and commits are delegated to an HTTP gateway.
//! - `s3` (feature `storage-s3`): URLs are presigned locally with `object_store`.
//!
//! # Object key format
//!
//! Providers that address objects directly use `{prefix}/{workspace_id}/{algorithm}/{hex}`.
//! Keys must not contain `..` or a leading `/`; generation is centralized in `keys`.

pub mod factory;
pub mod gateway;
pub mod keys;
pub mod registry;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_provider;
pub use gateway::{GatewayProvider, GATEWAY_PROVIDER_ID};
pub use registry::{ProviderFactory, ProviderRegistry};
#[cfg(feature = "storage-s3")]
pub use s3::{S3Provider, S3_PROVIDER_ID};
pub use traits::{
    CommitUploadRequest, DeleteObjectRequest, PresignDownloadRequest, PresignUploadRequest,
    PresignedTarget, ProviderCapabilities, StorageError, StorageProvider, StorageResult,
    UploadCommitMeta,
};
