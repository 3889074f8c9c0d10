//! Server-mediated provider
//!
//! Presigning and commit bookkeeping happen on an HTTP gateway owned by the backend:
//!
//! - `POST {base}/files/presign/upload`
//! - `POST {base}/files/presign/download`
//! - `POST {base}/files/commit`
//! - `DELETE {base}/files/{hash}?workspaceId=..&storageId=..`
//!
//! Bodies are JSON with camelCase fields.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::traits::{
    CommitUploadRequest, DeleteObjectRequest, PresignDownloadRequest, PresignUploadRequest,
    PresignedTarget, ProviderCapabilities, StorageError, StorageProvider, StorageResult,
};

pub const GATEWAY_PROVIDER_ID: &str = "gateway";

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct GatewayProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GatewayProvider {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;
        Ok(Self::with_client(client, base_url, token))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> StorageResult<Response> {
        let start = std::time::Instant::now();
        let response = self.authorize(request).send().await.map_err(|e| {
            tracing::warn!(
                error = %e,
                operation = operation,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Gateway request failed"
            );
            StorageError::BackendError(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                operation = operation,
                status = status.as_u16(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Gateway request completed"
            );
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        tracing::warn!(
            operation = operation,
            status = status.as_u16(),
            body = %message,
            "Gateway rejected request"
        );
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(StorageError::PayloadTooLarge(message));
        }
        Err(StorageError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> StorageResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl StorageProvider for GatewayProvider {
    fn id(&self) -> &str {
        GATEWAY_PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        "Storage gateway"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            presigned_upload: true,
            presigned_download: true,
            multipart: false,
            commit_upload: true,
            delete_object: true,
        }
    }

    #[tracing::instrument(
        skip(self, request),
        fields(hash = %request.hash, workspace_id = %request.workspace_id)
    )]
    async fn presign_upload(
        &self,
        request: &PresignUploadRequest,
    ) -> StorageResult<PresignedTarget> {
        let response = self
            .send(
                self.client
                    .post(self.endpoint("files/presign/upload"))
                    .json(request),
                "presign_upload",
            )
            .await?;
        Self::read_json(response).await
    }

    #[tracing::instrument(
        skip(self, request),
        fields(hash = %request.hash, workspace_id = %request.workspace_id)
    )]
    async fn presign_download(
        &self,
        request: &PresignDownloadRequest,
    ) -> StorageResult<PresignedTarget> {
        let response = self
            .send(
                self.client
                    .post(self.endpoint("files/presign/download"))
                    .json(request),
                "presign_download",
            )
            .await?;
        Self::read_json(response).await
    }

    async fn commit_upload(&self, request: &CommitUploadRequest) -> StorageResult<()> {
        self.send(
            self.client.post(self.endpoint("files/commit")).json(request),
            "commit_upload",
        )
        .await?;
        Ok(())
    }

    async fn delete_object(&self, request: &DeleteObjectRequest) -> StorageResult<()> {
        let mut query = vec![("workspaceId", request.workspace_id.as_str())];
        if let Some(storage_id) = &request.storage_id {
            query.push(("storageId", storage_id.as_str()));
        }
        let path = format!("files/{}", urlencoding::encode(&request.hash));
        self.send(
            self.client.delete(self.endpoint(&path)).query(&query),
            "delete_object",
        )
        .await?;
        Ok(())
    }
}
