use async_trait::async_trait;
use chrono::Utc;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{ObjectStoreExt, Result as ObjectResult};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::keys::{object_key, validate_key};
use crate::traits::{
    DeleteObjectRequest, PresignDownloadRequest, PresignUploadRequest, PresignedTarget,
    ProviderCapabilities, StorageError, StorageProvider, StorageResult,
};

pub const S3_PROVIDER_ID: &str = "s3";

const DEFAULT_EXPIRES_MS: u64 = 15 * 60 * 1000;

/// Direct-to-bucket provider: presigns `PUT`/`GET` URLs locally, no commit step.
#[derive(Clone)]
pub struct S3Provider {
    store: AmazonS3,
    bucket: String,
    key_prefix: String,
}

impl S3Provider {
    /// Create a provider from environment credentials plus explicit settings
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    /// * `key_prefix` - Leading key segment for every object
    pub fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
        key_prefix: String,
    ) -> StorageResult<Self> {
        let builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());
        Self::from_builder(builder, bucket, endpoint_url, key_prefix)
    }

    pub fn from_builder(
        mut builder: AmazonS3Builder,
        bucket: String,
        endpoint_url: Option<String>,
        key_prefix: String,
    ) -> StorageResult<Self> {
        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Provider {
            store,
            bucket,
            key_prefix: key_prefix.trim_matches('/').to_string(),
        })
    }

    async fn sign(
        &self,
        method: Method,
        key: &str,
        expires_in_ms: Option<u64>,
    ) -> StorageResult<(String, i64)> {
        let expires_in = Duration::from_millis(expires_in_ms.unwrap_or(DEFAULT_EXPIRES_MS));
        let location = Path::from(key.to_string());
        let url_result: ObjectResult<_> = self
            .store
            .signed_url(method, &location, expires_in)
            .await;

        let url = url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string();
        let expires_at = Utc::now().timestamp_millis() + expires_in.as_millis() as i64;
        Ok((url, expires_at))
    }
}

#[async_trait]
impl StorageProvider for S3Provider {
    fn id(&self) -> &str {
        S3_PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        "Amazon S3"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            presigned_upload: true,
            presigned_download: true,
            multipart: false,
            commit_upload: false,
            delete_object: true,
        }
    }

    async fn presign_upload(
        &self,
        request: &PresignUploadRequest,
    ) -> StorageResult<PresignedTarget> {
        let key = object_key(&self.key_prefix, &request.workspace_id, &request.hash)?;
        let (url, expires_at) = self.sign(Method::PUT, &key, request.expires_in_ms).await?;

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), request.mime_type.clone());

        tracing::debug!(bucket = %self.bucket, key = %key, "Presigned S3 upload");

        Ok(PresignedTarget {
            url,
            method: Some(Method::PUT.to_string()),
            headers,
            expires_at,
            storage_id: Some(key),
        })
    }

    async fn presign_download(
        &self,
        request: &PresignDownloadRequest,
    ) -> StorageResult<PresignedTarget> {
        let key = match &request.storage_id {
            Some(storage_id) => {
                validate_key(storage_id)?;
                storage_id.clone()
            }
            None => object_key(&self.key_prefix, &request.workspace_id, &request.hash)?,
        };
        let (url, expires_at) = self.sign(Method::GET, &key, request.expires_in_ms).await?;

        tracing::debug!(bucket = %self.bucket, key = %key, "Presigned S3 download");

        Ok(PresignedTarget {
            url,
            method: Some(Method::GET.to_string()),
            headers: BTreeMap::new(),
            expires_at,
            storage_id: None,
        })
    }

    async fn delete_object(&self, request: &DeleteObjectRequest) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let key = match &request.storage_id {
            Some(storage_id) => {
                validate_key(storage_id)?;
                storage_id.clone()
            }
            None => object_key(&self.key_prefix, &request.workspace_id, &request.hash)?,
        };
        let location = Path::from(key.clone());

        let result: ObjectResult<_> = self.store.delete(&location).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 delete failed"
            );
            StorageError::BackendError(e.to_string())
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }
}
