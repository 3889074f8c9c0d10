use async_trait::async_trait;
use bytes::Bytes;
use driftbox_core::{ErrorReporter, TransferFailure};
use driftbox_storage::{
    CommitUploadRequest, PresignDownloadRequest, PresignUploadRequest, PresignedTarget,
    ProviderCapabilities, StorageProvider, StorageResult,
};
use driftbox_worker::{DownloadResponse, Transport, TransportError, UploadResponse};
use futures::StreamExt;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

pub const MOCK_PROVIDER_ID: &str = "mock";

/// Provider that presigns `mock://` targets and records commits.
#[allow(dead_code)]
pub struct MockProvider {
    pub storage_id: Option<String>,
    pub commit: bool,
    pub commits: Mutex<Vec<CommitUploadRequest>>,
    pub upload_presigns: AtomicUsize,
}

#[allow(dead_code)]
impl MockProvider {
    pub fn new() -> Self {
        Self {
            storage_id: Some("st_1".to_string()),
            commit: true,
            commits: Mutex::new(Vec::new()),
            upload_presigns: AtomicUsize::new(0),
        }
    }

    /// Presign responses carry no storage id; the write response body must.
    pub fn without_storage_id() -> Self {
        Self {
            storage_id: None,
            ..Self::new()
        }
    }

    pub fn committed(&self) -> Vec<CommitUploadRequest> {
        self.commits.lock().unwrap().clone()
    }
}

fn target(url: String, method: &str, storage_id: Option<String>) -> PresignedTarget {
    PresignedTarget {
        url,
        method: Some(method.to_string()),
        headers: BTreeMap::new(),
        expires_at: chrono::Utc::now().timestamp_millis() + 60_000,
        storage_id,
    }
}

#[async_trait]
impl StorageProvider for MockProvider {
    fn id(&self) -> &str {
        MOCK_PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        "Mock storage"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            presigned_upload: true,
            presigned_download: true,
            multipart: false,
            commit_upload: self.commit,
            delete_object: false,
        }
    }

    async fn presign_upload(&self, req: &PresignUploadRequest) -> StorageResult<PresignedTarget> {
        self.upload_presigns.fetch_add(1, Ordering::SeqCst);
        Ok(target(
            format!("mock://upload/{}", req.hash),
            "PUT",
            self.storage_id.clone(),
        ))
    }

    async fn presign_download(
        &self,
        req: &PresignDownloadRequest,
    ) -> StorageResult<PresignedTarget> {
        let storage_id = req.storage_id.clone().unwrap_or_default();
        Ok(target(format!("mock://download/{storage_id}"), "GET", None))
    }

    async fn commit_upload(&self, req: &CommitUploadRequest) -> StorageResult<()> {
        self.commits.lock().unwrap().push(req.clone());
        Ok(())
    }
}

/// In-memory transport that tracks concurrency and can hold calls until released.
#[allow(dead_code)]
pub struct MockTransport {
    upload_statuses: Mutex<VecDeque<u16>>,
    upload_body: Mutex<Bytes>,
    download_body: Mutex<Bytes>,
    delay: Duration,
    gated: AtomicBool,
    gate: Semaphore,
    pub started: Notify,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    upload_calls: AtomicUsize,
    download_calls: AtomicUsize,
    tokens: Mutex<Vec<CancellationToken>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            upload_statuses: Mutex::new(VecDeque::new()),
            upload_body: Mutex::new(Bytes::new()),
            download_body: Mutex::new(Bytes::new()),
            delay: Duration::ZERO,
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            started: Notify::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// Calls block until [`open_gate`](Self::open_gate) or cancellation.
    pub fn gated() -> Self {
        let transport = Self::new();
        transport.gated.store(true, Ordering::SeqCst);
        transport
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Statuses returned by successive uploads; `200` once exhausted.
    pub fn with_upload_statuses(self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.upload_statuses.lock().unwrap().extend(statuses);
        self
    }

    pub fn with_upload_body(self, body: impl Into<Bytes>) -> Self {
        *self.upload_body.lock().unwrap() = body.into();
        self
    }

    pub fn with_download_body(self, body: impl Into<Bytes>) -> Self {
        *self.download_body.lock().unwrap() = body.into();
        self
    }

    pub fn open_gate(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().unwrap().clone()
    }

    async fn enter(&self, cancel: &CancellationToken) -> Result<InFlight<'_>, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        self.tokens.lock().unwrap().push(cancel.clone());
        self.started.notify_one();

        if self.gated.load(Ordering::SeqCst) {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                permit = self.gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
            }
        }
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        Ok(guard)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn upload(
        &self,
        _target: &PresignedTarget,
        _body: Bytes,
        cancel: CancellationToken,
    ) -> Result<UploadResponse, TransportError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter(&cancel).await?;
        let status = self.upload_statuses.lock().unwrap().pop_front().unwrap_or(200);
        Ok(UploadResponse {
            status,
            body: self.upload_body.lock().unwrap().clone(),
        })
    }

    async fn download(
        &self,
        _target: &PresignedTarget,
        cancel: CancellationToken,
    ) -> Result<DownloadResponse, TransportError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter(&cancel).await?;
        let body = self.download_body.lock().unwrap().clone();
        let split = body.len() / 2;
        let chunks = vec![Ok(body.slice(..split)), Ok(body.slice(split..))];
        Ok(DownloadResponse {
            status: 200,
            content_length: Some(body.len() as u64),
            stream: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// Collects every reported failure.
#[derive(Default)]
pub struct RecordingReporter {
    failures: Mutex<Vec<TransferFailure>>,
}

#[allow(dead_code)]
impl RecordingReporter {
    pub fn failures(&self) -> Vec<TransferFailure> {
        self.failures.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErrorReporter for RecordingReporter {
    async fn report_transfer_failure(&self, failure: &TransferFailure) {
        self.failures.lock().unwrap().push(failure.clone());
    }
}
