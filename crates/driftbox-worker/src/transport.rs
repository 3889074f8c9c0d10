//! HTTP transport seam
//!
//! The pipelines never talk to `reqwest` directly: they hand a presigned target to a
//! [`Transport`], which lets tests substitute an instrumented in-memory implementation.

use async_trait::async_trait;
use bytes::Bytes;
use driftbox_storage::PresignedTarget;
use futures::stream::BoxStream;
use futures::StreamExt;
use http::Method;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub status: u16,
    pub body: Bytes,
}

impl UploadResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct DownloadResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

impl std::fmt::Debug for DownloadResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl DownloadResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `body` to the target with its declared method (default `PUT`) and headers.
    async fn upload(
        &self,
        target: &PresignedTarget,
        body: Bytes,
        cancel: CancellationToken,
    ) -> Result<UploadResponse, TransportError>;

    /// Open the target (default `GET`) and return the response body as a stream.
    async fn download(
        &self,
        target: &PresignedTarget,
        cancel: CancellationToken,
    ) -> Result<DownloadResponse, TransportError>;
}

#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn request(
        &self,
        target: &PresignedTarget,
        default_method: Method,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let url = reqwest::Url::parse(&target.url)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let mut request = self
            .client
            .request(target.http_method(default_method), url);
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        Ok(request)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn upload(
        &self,
        target: &PresignedTarget,
        body: Bytes,
        cancel: CancellationToken,
    ) -> Result<UploadResponse, TransportError> {
        let request = self.request(target, Method::PUT)?.body(body);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            response = request.send() => {
                response.map_err(|e| TransportError::Network(e.to_string()))?
            }
        };
        let status = response.status().as_u16();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            body = response.bytes() => body.map_err(|e| TransportError::Network(e.to_string()))?,
        };

        Ok(UploadResponse { status, body })
    }

    async fn download(
        &self,
        target: &PresignedTarget,
        cancel: CancellationToken,
    ) -> Result<DownloadResponse, TransportError> {
        let request = self.request(target, Method::GET)?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            response = request.send() => {
                response.map_err(|e| TransportError::Network(e.to_string()))?
            }
        };
        let status = response.status().as_u16();
        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Network(e.to_string())))
            .take_until(cancel.cancelled_owned())
            .boxed();

        Ok(DownloadResponse {
            status,
            content_length,
            stream,
        })
    }
}
