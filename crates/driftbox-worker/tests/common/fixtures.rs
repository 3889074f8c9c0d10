use super::mocks::{MockProvider, MockTransport, RecordingReporter};
use driftbox_core::{ContentHash, FileBlob, FileMeta, HashAlgorithm};
use driftbox_db::{SqliteTransferStore, TransferStore};
use driftbox_worker::{TransferQueue, TransferQueueConfig};
use std::sync::Arc;
use std::time::Duration;

pub const WORKSPACE: &str = "ws-1";

pub fn hash_of(data: &[u8]) -> String {
    ContentHash::compute(HashAlgorithm::Sha256, data).to_string()
}

/// Small backoffs and a short wait budget so retry paths finish quickly.
pub fn fast_config() -> TransferQueueConfig {
    TransferQueueConfig {
        concurrency: 2,
        max_attempts: 3,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(40),
        progress_throttle: Duration::ZERO,
        wait_timeout: Duration::from_secs(5),
        ..TransferQueueConfig::default()
    }
}

/// Metadata plus cached bytes, ready to upload.
pub async fn seed_local_file(store: &dyn TransferStore, name: &str, data: &[u8]) -> String {
    let hash = hash_of(data);
    store
        .put_file_meta(&FileMeta::new(&hash, name, "text/plain", data.len() as u64))
        .await
        .unwrap();
    store
        .put_blob(&FileBlob::new(&hash, data.to_vec()))
        .await
        .unwrap();
    hash
}

/// Metadata for a file that only exists remotely under `storage_id`.
pub async fn seed_remote_file(
    store: &dyn TransferStore,
    hash: &str,
    size: u64,
    storage_id: &str,
) {
    let mut meta = FileMeta::new(hash, "remote.bin", "application/octet-stream", size);
    meta.storage_id = Some(storage_id.to_string());
    meta.storage_provider_id = Some("mock".to_string());
    store.put_file_meta(&meta).await.unwrap();
}

#[allow(dead_code)]
pub struct Harness {
    pub store: Arc<SqliteTransferStore>,
    pub provider: Arc<MockProvider>,
    pub transport: Arc<MockTransport>,
    pub reporter: Arc<RecordingReporter>,
    pub queue: TransferQueue,
}

#[allow(dead_code)]
impl Harness {
    pub async fn new(transport: MockTransport) -> Self {
        Self::with(MockProvider::new(), transport, fast_config()).await
    }

    pub async fn with(
        provider: MockProvider,
        transport: MockTransport,
        config: TransferQueueConfig,
    ) -> Self {
        let store = Arc::new(SqliteTransferStore::in_memory().await.unwrap());
        Self::on_store(store, provider, transport, config)
    }

    pub fn on_store(
        store: Arc<SqliteTransferStore>,
        provider: MockProvider,
        transport: MockTransport,
        config: TransferQueueConfig,
    ) -> Self {
        let provider = Arc::new(provider);
        let transport = Arc::new(transport);
        let reporter = Arc::new(RecordingReporter::default());
        let queue = TransferQueue::builder(store.clone(), provider.clone())
            .transport(transport.clone())
            .reporter(reporter.clone())
            .config(config)
            .workspace_id(WORKSPACE)
            .build();
        Self {
            store,
            provider,
            transport,
            reporter,
            queue,
        }
    }

    /// Wait for the transport to see its next call.
    pub async fn transport_started(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.transport.started.notified())
            .await
            .expect("transport was never called");
    }
}
