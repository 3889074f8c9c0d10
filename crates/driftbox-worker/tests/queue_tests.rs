mod common;

use chrono::Utc;
use common::{
    fast_config, hash_of, seed_local_file, seed_remote_file, Harness, MockProvider,
    MockTransport, MOCK_PROVIDER_ID, WORKSPACE,
};
use driftbox_core::{
    ActionHook, ErrorMetadata, FileTransfer, PolicyDecision, TransferDirection, TransferError,
    TransferState,
};
use driftbox_db::{SqliteTransferStore, StoreHandle, TransferStore};
use driftbox_worker::{TransferQueue, TransferQueueConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_duplicate_enqueue_returns_active_transfer() {
    let h = Harness::new(MockTransport::gated()).await;
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"dedup payload").await;

    let first = h
        .queue
        .enqueue(&hash, TransferDirection::Upload)
        .await
        .unwrap()
        .unwrap();
    let second = h
        .queue
        .enqueue(&hash, TransferDirection::Upload)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, second.id);

    h.transport.open_gate();
    let done = h.queue.wait_for_transfer(&first.id, WAIT).await.unwrap();
    assert_eq!(done.state, TransferState::Done);

    let third = h
        .queue
        .enqueue(&hash, TransferDirection::Upload)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(third.id, first.id);
}

#[tokio::test]
async fn test_concurrency_cap_of_one_serializes_transfers() {
    let config = TransferQueueConfig {
        concurrency: 1,
        ..fast_config()
    };
    let h = Harness::with(
        MockProvider::new(),
        MockTransport::new().with_delay(Duration::from_millis(50)),
        config,
    )
    .await;
    let a = seed_local_file(h.store.as_ref(), "a.txt", b"first file").await;
    let b = seed_local_file(h.store.as_ref(), "b.txt", b"second file").await;

    let ta = h.queue.enqueue(&a, TransferDirection::Upload).await.unwrap().unwrap();
    let tb = h.queue.enqueue(&b, TransferDirection::Upload).await.unwrap().unwrap();
    h.queue.wait_for_transfer(&ta.id, WAIT).await.unwrap();
    h.queue.wait_for_transfer(&tb.id, WAIT).await.unwrap();

    assert_eq!(h.transport.upload_calls(), 2);
    assert_eq!(h.transport.max_in_flight(), 1);
}

#[tokio::test]
async fn test_payload_too_large_fails_after_one_attempt() {
    let config = TransferQueueConfig {
        max_attempts: 5,
        ..fast_config()
    };
    let h = Harness::with(
        MockProvider::new(),
        MockTransport::new().with_upload_statuses([413]),
        config,
    )
    .await;
    let hash = seed_local_file(h.store.as_ref(), "big.bin", b"too large").await;

    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    let err = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap_err();
    assert_eq!(err.error_code(), "FILE_TOO_LARGE");

    let row = h.store.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.state, TransferState::Failed);
    assert_eq!(row.attempts, 1);
    assert_eq!(h.transport.upload_calls(), 1);

    let reported = h.reporter.failures();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].error.error_code(), "FILE_TOO_LARGE");
}

#[tokio::test]
async fn test_hash_mismatch_never_writes_blob() {
    let config = TransferQueueConfig {
        max_attempts: 2,
        ..fast_config()
    };
    let h = Harness::with(
        MockProvider::new(),
        MockTransport::new().with_download_body(&b"tampered bytes"[..]),
        config,
    )
    .await;
    let hash = hash_of(b"expected bytes");
    seed_remote_file(h.store.as_ref(), &hash, 14, "st_remote").await;

    let transfer = h
        .queue
        .enqueue(&hash, TransferDirection::Download)
        .await
        .unwrap()
        .unwrap();
    let err = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap_err();
    assert_eq!(err.error_code(), "PROVIDER_ERROR");

    let row = h.store.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.state, TransferState::Failed);
    assert_eq!(row.attempts, 2);
    assert!(row.last_error.unwrap().contains("hash mismatch"));
    assert!(h.store.get_blob(&hash).await.unwrap().is_none());
}

#[tokio::test]
async fn test_ensure_downloaded_blob_fetches_once_then_serves_cache() {
    let payload = &b"remote bytes"[..];
    let h = Harness::new(MockTransport::new().with_download_body(payload)).await;
    let hash = hash_of(payload);
    seed_remote_file(h.store.as_ref(), &hash, payload.len() as u64, "st_remote").await;

    let bytes = h.queue.ensure_downloaded_blob(&hash).await.unwrap().unwrap();
    assert_eq!(&bytes[..], payload);
    assert_eq!(h.transport.download_calls(), 1);

    let cached = h.queue.ensure_downloaded_blob(&hash).await.unwrap().unwrap();
    assert_eq!(&cached[..], payload);
    assert_eq!(h.transport.download_calls(), 1);

    let blob = h.store.get_blob(&hash).await.unwrap().unwrap();
    assert_eq!(blob.size_bytes(), payload.len() as u64);
}

#[tokio::test]
async fn test_download_records_final_progress() {
    let payload = &b"progress payload"[..];
    let h = Harness::new(MockTransport::new().with_download_body(payload)).await;
    let hash = hash_of(payload);
    seed_remote_file(h.store.as_ref(), &hash, payload.len() as u64, "st_remote").await;

    let transfer = h
        .queue
        .enqueue(&hash, TransferDirection::Download)
        .await
        .unwrap()
        .unwrap();
    let done = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap();
    assert_eq!(done.bytes_done, payload.len() as u64);
    assert_eq!(done.bytes_total, payload.len() as u64);

    let row = h.store.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.bytes_done, row.bytes_total);
}

#[tokio::test]
async fn test_workspace_switch_cancels_running_transfer() {
    let h = Harness::new(MockTransport::gated()).await;
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"switch me").await;

    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    h.transport_started().await;
    let token = h.transport.tokens().pop().unwrap();
    assert!(!token.is_cancelled());

    h.queue.set_workspace_id(Some("ws-2".to_string()));
    assert!(token.is_cancelled());

    let err = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap_err();
    assert_eq!(err.error_code(), "TRANSFER_CANCELLED");

    let row = h.store.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.state, TransferState::Failed);
    assert_eq!(row.error_code.as_deref(), Some("TRANSFER_CANCELLED"));
    // Cancellation is terminal and never reported as an error.
    assert!(h.reporter.failures().is_empty());
}

#[tokio::test]
async fn test_clearing_workspace_keeps_running_transfer() {
    let h = Harness::new(MockTransport::gated()).await;
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"keep running").await;

    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    h.transport_started().await;
    let token = h.transport.tokens().pop().unwrap();

    h.queue.set_workspace_id(None);
    assert!(!token.is_cancelled());
    assert!(h
        .queue
        .enqueue(&hash, TransferDirection::Upload)
        .await
        .unwrap()
        .is_none());

    h.transport.open_gate();
    let done = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap();
    assert_eq!(done.state, TransferState::Done);
}

#[tokio::test]
async fn test_wait_on_finished_transfers_resolves_immediately() {
    let h = Harness::new(MockTransport::new()).await;
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"already done").await;
    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap();

    let again = h
        .queue
        .wait_for_transfer(&transfer.id, Duration::from_millis(1))
        .await
        .unwrap();
    assert_eq!(again.state, TransferState::Done);
    assert_eq!(h.queue.pending_waiters(&transfer.id), 0);

    let mut failed = FileTransfer::new(WORKSPACE, hash_of(b"failed"), TransferDirection::Upload);
    failed.mark_failed(&TransferError::FileNotFound("meta gone".into()), true);
    h.store.insert_transfer(&failed).await.unwrap();

    let err = h
        .queue
        .wait_for_transfer(&failed.id, Duration::from_millis(1))
        .await
        .unwrap_err();
    assert_eq!(err, TransferError::FileNotFound("meta gone".into()));
    assert_eq!(h.queue.pending_waiters(&failed.id), 0);
}

#[tokio::test]
async fn test_wait_on_unknown_transfer_is_not_found() {
    let h = Harness::new(MockTransport::new()).await;
    let err = h
        .queue
        .wait_for_transfer("does-not-exist", WAIT)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "TRANSFER_NOT_FOUND");
    assert_eq!(h.queue.pending_waiters("does-not-exist"), 0);
}

#[tokio::test]
async fn test_wait_timeout_leaves_transfer_running() {
    let h = Harness::new(MockTransport::gated()).await;
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"slow upload").await;
    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    h.transport_started().await;

    let err = h
        .queue
        .wait_for_transfer(&transfer.id, Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Timeout { timeout_ms: 30, .. }));
    assert_eq!(h.queue.pending_waiters(&transfer.id), 0);

    let row = h.store.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.state, TransferState::Running);

    h.transport.open_gate();
    h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap();
}

fn aged_transfer(seed: &[u8], state: TransferState, age_days: i64) -> FileTransfer {
    let mut transfer = FileTransfer::new(WORKSPACE, hash_of(seed), TransferDirection::Upload);
    transfer.created_at = Utc::now() - chrono::Duration::days(age_days);
    match state {
        TransferState::Queued => {}
        TransferState::Running => transfer.mark_running(),
        TransferState::Done => transfer.mark_done(4),
        TransferState::Failed => {
            transfer.mark_failed(&TransferError::FileNotFound("gone".into()), true)
        }
    }
    transfer
}

#[tokio::test]
async fn test_cleanup_removes_only_expired_terminal_rows() {
    let store = Arc::new(SqliteTransferStore::in_memory().await.unwrap());
    // No workspace: no scheduler pass runs its own sweep underneath the test.
    let queue = TransferQueue::builder(store.clone(), Arc::new(MockProvider::new()))
        .transport(Arc::new(MockTransport::new()))
        .build();

    let expired_failed = aged_transfer(b"old failed", TransferState::Failed, 8);
    let expired_done = aged_transfer(b"old done", TransferState::Done, 8);
    let expired_queued = aged_transfer(b"old queued", TransferState::Queued, 8);
    let expired_running = aged_transfer(b"old running", TransferState::Running, 8);
    let recent_failed = aged_transfer(b"new failed", TransferState::Failed, 0);
    let recent_done = aged_transfer(b"new done", TransferState::Done, 0);
    for transfer in [
        &expired_failed,
        &expired_done,
        &expired_queued,
        &expired_running,
        &recent_failed,
        &recent_done,
    ] {
        store.insert_transfer(transfer).await.unwrap();
    }

    assert_eq!(queue.run_cleanup().await.unwrap(), 2);
    assert!(store.get_transfer(&expired_failed.id).await.unwrap().is_none());
    assert!(store.get_transfer(&expired_done.id).await.unwrap().is_none());

    let queued = store.get_transfer(&expired_queued.id).await.unwrap().unwrap();
    assert_eq!(queued.state, TransferState::Queued);
    let running = store.get_transfer(&expired_running.id).await.unwrap().unwrap();
    assert_eq!(running.state, TransferState::Running);
    assert!(store.get_transfer(&recent_failed.id).await.unwrap().is_some());
    assert!(store.get_transfer(&recent_done.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_scheduler_sweeps_once_per_cleanup_interval() {
    let store = Arc::new(SqliteTransferStore::in_memory().await.unwrap());
    let first = aged_transfer(b"swept by first pass", TransferState::Done, 8);
    store.insert_transfer(&first).await.unwrap();

    let config = TransferQueueConfig {
        cleanup_interval: Duration::from_secs(60 * 60),
        ..fast_config()
    };
    let h = Harness::on_store(store, MockProvider::new(), MockTransport::new(), config);

    tokio::time::timeout(WAIT, async {
        while h.store.get_transfer(&first.id).await.unwrap().is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first scheduler pass never swept the expired row");

    let second = aged_transfer(b"inside the interval", TransferState::Done, 8);
    h.store.insert_transfer(&second).await.unwrap();

    // Run more passes: the enqueue and the worker completion both trigger one.
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"more passes").await;
    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.store.get_transfer(&second.id).await.unwrap().is_some());
    assert_eq!(h.queue.run_cleanup().await.unwrap(), 1);
    assert!(h.store.get_transfer(&second.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_upload_commits_storage_id_and_fires_after_hook() {
    let h = Harness::new(MockTransport::new()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.queue.hooks().on_action(ActionHook::UploadAfter, move |action| {
        sink.lock()
            .unwrap()
            .push((action.hash.clone(), action.storage_id.clone(), action.bytes));
    });

    let hash = seed_local_file(h.store.as_ref(), "ten.txt", b"0123456789").await;
    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    let done = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap();
    assert_eq!(done.state, TransferState::Done);

    let meta = h.store.get_file_meta(&hash).await.unwrap().unwrap();
    assert_eq!(meta.storage_id.as_deref(), Some("st_1"));
    assert_eq!(meta.storage_provider_id.as_deref(), Some(MOCK_PROVIDER_ID));
    assert_eq!(meta.clock, 1);

    let commits = h.provider.committed();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].storage_id, "st_1");
    assert_eq!(commits[0].meta.size_bytes, 10);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(hash, Some("st_1".to_string()), Some(10))]);
}

#[tokio::test]
async fn test_panicking_hooks_do_not_stop_the_transfer() {
    let h = Harness::new(MockTransport::new()).await;
    h.queue
        .hooks()
        .on_action(ActionHook::UploadBefore, |_| panic!("broken extension"));
    h.queue.hooks().on_upload_policy(|_| panic!("broken policy"));

    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"still uploads").await;
    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    let done = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap();
    assert_eq!(done.state, TransferState::Done);
    assert_eq!(h.provider.committed().len(), 1);
}

#[tokio::test]
async fn test_storage_id_can_come_from_write_response() {
    let h = Harness::with(
        MockProvider::without_storage_id(),
        MockTransport::new().with_upload_body(r#"{"storageId":"st_body"}"#),
        fast_config(),
    )
    .await;
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"body id").await;

    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap();

    let meta = h.store.get_file_meta(&hash).await.unwrap().unwrap();
    assert_eq!(meta.storage_id.as_deref(), Some("st_body"));
}

#[tokio::test]
async fn test_retryable_failure_then_success() {
    let config = TransferQueueConfig {
        max_attempts: 5,
        ..fast_config()
    };
    let h = Harness::with(
        MockProvider::new(),
        MockTransport::new().with_upload_statuses([503, 500]),
        config,
    )
    .await;
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"flaky upload").await;

    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    let done = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap();
    assert_eq!(done.state, TransferState::Done);
    assert_eq!(done.attempts, 2);
    assert_eq!(h.transport.upload_calls(), 3);
    assert!(h.reporter.failures().is_empty());
}

#[tokio::test]
async fn test_retry_runs_after_backoff_longer_than_a_pass() {
    let config = TransferQueueConfig {
        max_attempts: 5,
        backoff_base: Duration::from_millis(200),
        backoff_max: Duration::from_millis(400),
        ..fast_config()
    };
    let h = Harness::with(
        MockProvider::new(),
        MockTransport::new().with_upload_statuses([503]),
        config,
    )
    .await;
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"one busy response").await;

    let started = std::time::Instant::now();
    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    let done = h
        .queue
        .wait_for_transfer(&transfer.id, Duration::from_secs(3))
        .await
        .unwrap();

    assert_eq!(done.state, TransferState::Done);
    assert_eq!(done.attempts, 1);
    assert_eq!(h.transport.upload_calls(), 2);
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_exhausted_retries_surface_provider_error() {
    let h = Harness::with(
        MockProvider::new(),
        MockTransport::new().with_upload_statuses([503; 10]),
        fast_config(),
    )
    .await;
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"always busy").await;

    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    let err = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap_err();
    assert_eq!(err.error_code(), "PROVIDER_ERROR");

    let row = h.store.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.attempts, 3);
    assert_eq!(row.error_code.as_deref(), Some("PROVIDER_ERROR"));
    assert_eq!(h.transport.upload_calls(), 3);

    let reported = h.reporter.failures();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].attempts, 3);
    assert_eq!(reported[0].transfer_id, transfer.id);
}

#[tokio::test]
async fn test_policy_rejection_is_validation_failure() {
    let h = Harness::new(MockTransport::new()).await;
    h.queue.hooks().on_upload_policy(|input| {
        if input.size_bytes > 4 {
            PolicyDecision::Reject("files over 4 bytes are not allowed".to_string())
        } else {
            PolicyDecision::Allow
        }
    });
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"oversized").await;

    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    let err = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap_err();
    assert_eq!(
        err,
        TransferError::FileValidation("files over 4 bytes are not allowed".to_string())
    );
    assert_eq!(h.transport.upload_calls(), 0);
    assert_eq!(h.provider.upload_presigns.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_enqueue_without_workspace_or_with_bad_hash() {
    let store = Arc::new(SqliteTransferStore::in_memory().await.unwrap());
    let queue = TransferQueue::builder(store.clone(), Arc::new(MockProvider::new()))
        .transport(Arc::new(MockTransport::new()))
        .config(fast_config())
        .build();

    let hash = hash_of(b"anything");
    assert!(queue
        .enqueue(&hash, TransferDirection::Upload)
        .await
        .unwrap()
        .is_none());
    assert!(queue.ensure_downloaded_blob(&hash).await.unwrap().is_none());

    let err = queue
        .enqueue("not-a-hash", TransferDirection::Upload)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "FILE_VALIDATION");
    assert!(store.list_queued(WORKSPACE, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_local_metadata_is_file_not_found() {
    let h = Harness::new(MockTransport::new()).await;
    let hash = hash_of(b"never seeded");

    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    let err = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap_err();
    assert_eq!(err.error_code(), "FILE_NOT_FOUND");

    let row = h.store.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.attempts, 1);
    assert_eq!(h.transport.upload_calls(), 0);
}

#[tokio::test]
async fn test_interrupted_transfers_resume_on_start() {
    let store = Arc::new(SqliteTransferStore::in_memory().await.unwrap());
    let hash = seed_local_file(store.as_ref(), "a.txt", b"left running").await;

    let mut stale = FileTransfer::new(WORKSPACE, &hash, TransferDirection::Upload);
    store.insert_transfer(&stale).await.unwrap();
    stale.mark_running();
    assert!(store.update_transfer(&stale).await.unwrap());

    let h = Harness::on_store(store, MockProvider::new(), MockTransport::new(), fast_config());
    let done = h.queue.wait_for_transfer(&stale.id, WAIT).await.unwrap();
    assert_eq!(done.state, TransferState::Done);
    assert_eq!(h.transport.upload_calls(), 1);
}

#[tokio::test]
async fn test_cancel_queued_and_running_transfers() {
    let config = TransferQueueConfig {
        concurrency: 1,
        ..fast_config()
    };
    let h = Harness::with(MockProvider::new(), MockTransport::gated(), config).await;
    let a = seed_local_file(h.store.as_ref(), "a.txt", b"running one").await;
    let b = seed_local_file(h.store.as_ref(), "b.txt", b"queued one").await;

    let running = h.queue.enqueue(&a, TransferDirection::Upload).await.unwrap().unwrap();
    h.transport_started().await;
    let queued = h.queue.enqueue(&b, TransferDirection::Upload).await.unwrap().unwrap();

    assert!(h.queue.cancel_transfer(&queued.id).await.unwrap());
    let row = h.store.get_transfer(&queued.id).await.unwrap().unwrap();
    assert_eq!(row.state, TransferState::Failed);
    assert_eq!(row.attempts, 0);
    let err = h.queue.wait_for_transfer(&queued.id, WAIT).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(!h.queue.cancel_transfer(&queued.id).await.unwrap());

    assert!(h.queue.cancel_transfer(&running.id).await.unwrap());
    let err = h.queue.wait_for_transfer(&running.id, WAIT).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(h.transport.upload_calls(), 1);

    let unknown = h.queue.cancel_transfer("nope").await.unwrap_err();
    assert_eq!(unknown.error_code(), "TRANSFER_NOT_FOUND");
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_work() {
    let h = Harness::new(MockTransport::gated()).await;
    let hash = seed_local_file(h.store.as_ref(), "a.txt", b"shutting down").await;

    let transfer = h.queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    h.transport_started().await;
    h.queue.shutdown();

    assert!(h.transport.tokens().iter().all(|t| t.is_cancelled()));
    let err = h.queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_rebinds_after_store_closed() {
    let old = Arc::new(SqliteTransferStore::in_memory().await.unwrap());
    let current = Arc::new(SqliteTransferStore::in_memory().await.unwrap());
    let hash = seed_local_file(current.as_ref(), "a.txt", b"after swap").await;
    let handle = Arc::new(StoreHandle::new(current.clone()));

    let queue = TransferQueue::builder(old.clone(), Arc::new(MockProvider::new()))
        .transport(Arc::new(MockTransport::new()))
        .resolver(handle)
        .config(fast_config())
        .workspace_id(WORKSPACE)
        .build();
    old.close().await;

    let transfer = queue.enqueue(&hash, TransferDirection::Upload).await.unwrap().unwrap();
    let done = queue.wait_for_transfer(&transfer.id, WAIT).await.unwrap();
    assert_eq!(done.state, TransferState::Done);

    let row = current.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.state, TransferState::Done);
    let meta = current.get_file_meta(&hash).await.unwrap().unwrap();
    assert_eq!(meta.storage_id.as_deref(), Some("st_1"));
}
