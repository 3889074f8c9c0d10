//! Transfer queue: enqueue/dedup, coalesced scheduler passes, bounded workers, retry with
//! backoff, cancellation and waiters.
//!
//! Every state transition is written through to the [`TransferStore`] before the queue acts
//! on it, so a restarted process resumes from the persisted rows: `running` leftovers are
//! put back to `queued` on the first pass for a workspace.
//!
//! Scheduler timers hold a weak reference to the queue. Dropping the last handle stops
//! future passes; workers already in flight run to completion.

use crate::backoff::compute_backoff;
use crate::binding::StoreBinding;
use crate::config::TransferQueueConfig;
use crate::context::TransferContext;
use crate::transport::{ReqwestTransport, Transport};
use crate::waiters::Waiters;
use crate::{download, upload};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use driftbox_core::{
    ContentHash, ErrorMetadata, ErrorReporter, FileTransfer, NoOpErrorReporter,
    TransferDirection, TransferError, TransferFailure, TransferHooks,
};
use driftbox_db::{StoreError, StoreResolver, StoreResult, TransferStore};
use driftbox_storage::StorageProvider;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct RunningTransfer {
    workspace_id: String,
    cancel: CancellationToken,
}

struct ScheduledPass {
    at: Instant,
    handle: JoinHandle<()>,
}

struct QueueState {
    workspace_id: Option<String>,
    running: HashMap<String, RunningTransfer>,
    /// Transfers waiting out their backoff. A pass skips them until the instant passes.
    retry_after: HashMap<String, Instant>,
    scheduled: Option<ScheduledPass>,
    pass_in_progress: bool,
    rerun_requested: bool,
    last_cleanup: Option<Instant>,
    /// Requeue stale `running` rows before the next selection.
    needs_resume: bool,
}

struct QueueInner {
    me: Weak<QueueInner>,
    store: StoreBinding,
    provider: Arc<dyn StorageProvider>,
    transport: Arc<dyn Transport>,
    hooks: Arc<TransferHooks>,
    reporter: Arc<dyn ErrorReporter>,
    config: TransferQueueConfig,
    enqueue_lock: tokio::sync::Mutex<()>,
    state: Mutex<QueueState>,
    waiters: Waiters,
    shutdown: CancellationToken,
}

pub struct TransferQueueBuilder {
    store: Arc<dyn TransferStore>,
    provider: Arc<dyn StorageProvider>,
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn StoreResolver>>,
    hooks: Option<Arc<TransferHooks>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    config: TransferQueueConfig,
    workspace_id: Option<String>,
}

impl TransferQueueBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Resolver consulted when the store reports it was closed mid-operation.
    pub fn resolver(mut self, resolver: Arc<dyn StoreResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn hooks(mut self, hooks: Arc<TransferHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(mut self, config: TransferQueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    /// Build the queue. With a workspace set, a first pass is scheduled right away to
    /// resume persisted work (when called inside a Tokio runtime).
    pub fn build(self) -> TransferQueue {
        let has_workspace = self.workspace_id.is_some();
        let inner = Arc::new_cyclic(|me| QueueInner {
            me: me.clone(),
            store: StoreBinding::new(self.store, self.resolver),
            provider: self.provider,
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(ReqwestTransport::new())),
            hooks: self.hooks.unwrap_or_default(),
            reporter: self
                .reporter
                .unwrap_or_else(|| Arc::new(NoOpErrorReporter)),
            config: self.config,
            enqueue_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(QueueState {
                workspace_id: self.workspace_id,
                running: HashMap::new(),
                retry_after: HashMap::new(),
                scheduled: None,
                pass_in_progress: false,
                rerun_requested: false,
                last_cleanup: None,
                needs_resume: true,
            }),
            waiters: Waiters::new(),
            shutdown: CancellationToken::new(),
        });
        if has_workspace {
            inner.schedule_pass(Duration::ZERO);
        }
        TransferQueue { inner }
    }
}

#[derive(Clone)]
pub struct TransferQueue {
    inner: Arc<QueueInner>,
}

impl TransferQueue {
    pub fn builder(
        store: Arc<dyn TransferStore>,
        provider: Arc<dyn StorageProvider>,
    ) -> TransferQueueBuilder {
        TransferQueueBuilder {
            store,
            provider,
            transport: None,
            resolver: None,
            hooks: None,
            reporter: None,
            config: TransferQueueConfig::default(),
            workspace_id: None,
        }
    }

    pub fn hooks(&self) -> &Arc<TransferHooks> {
        &self.inner.hooks
    }

    pub fn config(&self) -> &TransferQueueConfig {
        &self.inner.config
    }

    pub fn workspace_id(&self) -> Option<String> {
        self.inner.lock_state().workspace_id.clone()
    }

    /// Queue a transfer for `hash`, or return the active one for the same key.
    ///
    /// Returns `Ok(None)` when no workspace is active. A malformed hash fails with
    /// `FILE_VALIDATION` and nothing is persisted.
    #[tracing::instrument(skip(self))]
    pub async fn enqueue(
        &self,
        hash: &str,
        direction: TransferDirection,
    ) -> Result<Option<FileTransfer>, TransferError> {
        let hash = ContentHash::parse(hash)?.to_string();
        let Some(workspace_id) = self.workspace_id() else {
            tracing::debug!("No active workspace, transfer not queued");
            return Ok(None);
        };
        let inner = &self.inner;
        let (ws, h) = (workspace_id.as_str(), hash.as_str());

        let transfer = {
            let _guard = inner.enqueue_lock.lock().await;
            if let Some(existing) = inner.find_active(ws, h, direction).await? {
                tracing::debug!(transfer.id = %existing.id, "Returning active transfer");
                return Ok(Some(existing));
            }

            let transfer = FileTransfer::new(ws, h, direction);
            let inserted = inner
                .store
                .call(|s| {
                    let transfer = &transfer;
                    async move { s.insert_transfer(transfer).await }
                })
                .await;
            match inserted {
                Ok(()) => transfer,
                // Another writer holds the key.
                Err(StoreError::Conflict(_)) => {
                    return match inner.find_active(ws, h, direction).await? {
                        Some(existing) => Ok(Some(existing)),
                        None => Err(TransferError::Store(format!(
                            "conflicting transfer for {h} disappeared"
                        ))),
                    };
                }
                Err(e) => return Err(e.into()),
            }
        };

        tracing::info!(transfer.id = %transfer.id, workspace_id = %ws, "Transfer enqueued");
        inner.schedule_pass(Duration::ZERO);
        Ok(Some(transfer))
    }

    /// Wait until transfer `id` is `done` (Ok) or `failed` (its terminal error).
    ///
    /// Timing out only affects the caller; the transfer keeps retrying in the background.
    pub async fn wait_for_transfer(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<FileTransfer, TransferError> {
        let inner = &self.inner;
        // Register before reading so a completion between the read and the wait is not lost.
        let (waiter_id, rx) = inner.waiters.register(id);

        let current = match inner
            .store
            .call(move |s| async move { s.get_transfer(id).await })
            .await
        {
            Ok(current) => current,
            Err(e) => {
                inner.waiters.remove(id, waiter_id);
                return Err(e.into());
            }
        };
        match current {
            None => {
                inner.waiters.remove(id, waiter_id);
                return Err(TransferError::NotFound(id.to_string()));
            }
            Some(transfer) if transfer.state.is_terminal() => {
                inner.waiters.remove(id, waiter_id);
                return match transfer.failure() {
                    Some(err) => Err(err),
                    None => Ok(transfer),
                };
            }
            Some(_) => {}
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransferError::Cancelled(
                "transfer queue shut down".to_string(),
            )),
            Err(_) => {
                inner.waiters.remove(id, waiter_id);
                Err(TransferError::Timeout {
                    id: id.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Cached bytes for `hash`, downloading them first if needed.
    ///
    /// Returns `Ok(None)` when the blob is not cached and no workspace is active. A download
    /// that ends `failed`, or a wait that exceeds `wait_timeout`, is an error.
    pub async fn ensure_downloaded_blob(&self, hash: &str) -> Result<Option<Bytes>, TransferError> {
        let hash = ContentHash::parse(hash)?.to_string();
        if let Some(data) = self.inner.cached_blob(&hash).await? {
            return Ok(Some(data));
        }

        let Some(transfer) = self.enqueue(&hash, TransferDirection::Download).await? else {
            return Ok(None);
        };
        self.wait_for_transfer(&transfer.id, self.inner.config.wait_timeout)
            .await?;

        self.inner
            .cached_blob(&hash)
            .await?
            .map(Some)
            .ok_or_else(|| {
                TransferError::FileNotFound(format!("blob {hash} missing after download"))
            })
    }

    /// Cancel a transfer. In-flight work is signalled through its token and ends `failed`
    /// with `TRANSFER_CANCELLED`; a queued transfer is failed directly.
    ///
    /// Returns `false` if the transfer had already finished.
    pub async fn cancel_transfer(&self, id: &str) -> Result<bool, TransferError> {
        let inner = &self.inner;
        if let Some(token) = inner.running_token(id) {
            tracing::info!(transfer.id = %id, "Cancelling in-flight transfer");
            token.cancel();
            return Ok(true);
        }

        let Some(mut transfer) = inner
            .store
            .call(move |s| async move { s.get_transfer(id).await })
            .await?
        else {
            return Err(TransferError::NotFound(id.to_string()));
        };
        if !transfer.is_active() {
            return Ok(false);
        }

        let err = TransferError::Cancelled("cancelled by caller".to_string());
        transfer.mark_failed(&err, false);
        if !inner.write_transfer(&transfer).await? {
            return Ok(false);
        }
        inner.lock_state().retry_after.remove(id);
        // A pass may have picked it up between the lookup and the write.
        if let Some(token) = inner.running_token(id) {
            token.cancel();
        }
        tracing::info!(transfer.id = %id, "Cancelled queued transfer");
        inner.waiters.resolve(id, Err(err));
        Ok(true)
    }

    /// Switch the active workspace.
    ///
    /// Moving from one workspace to a different one cancels everything still running under
    /// the previous workspace before any work for the new one is scheduled.
    pub fn set_workspace_id(&self, workspace_id: Option<String>) {
        let inner = &self.inner;
        {
            let mut state = inner.lock_state();
            if state.workspace_id == workspace_id {
                return;
            }
            let previous = std::mem::replace(&mut state.workspace_id, workspace_id.clone());
            if let (Some(previous), Some(_)) = (&previous, &workspace_id) {
                let mut cancelled = 0usize;
                for running in state
                    .running
                    .values()
                    .filter(|r| &r.workspace_id == previous)
                {
                    running.cancel.cancel();
                    cancelled += 1;
                }
                tracing::info!(
                    previous = %previous,
                    cancelled,
                    "Workspace switched, cancelled running transfers"
                );
            }
            state.needs_resume = true;
        }
        if workspace_id.is_some() {
            inner.schedule_pass(Duration::ZERO);
        }
    }

    /// Delete terminal transfers older than the retention window.
    pub async fn run_cleanup(&self) -> Result<u64, TransferError> {
        Ok(self.inner.run_cleanup().await?)
    }

    pub fn pending_waiters(&self, id: &str) -> usize {
        self.inner.waiters.count(id)
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock_state().running.len()
    }

    /// Cancel every in-flight transfer and stop scheduling. Does not wait for workers.
    pub fn shutdown(&self) {
        tracing::info!("Initiating transfer queue shutdown");
        self.inner.shutdown.cancel();
        if let Some(scheduled) = self.inner.lock_state().scheduled.take() {
            scheduled.handle.abort();
        }
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn running_token(&self, id: &str) -> Option<CancellationToken> {
        self.lock_state()
            .running
            .get(id)
            .map(|running| running.cancel.clone())
    }

    async fn find_active(
        &self,
        workspace_id: &str,
        hash: &str,
        direction: TransferDirection,
    ) -> StoreResult<Option<FileTransfer>> {
        self.store
            .call(move |s| async move {
                s.find_active_transfer(workspace_id, hash, direction)
                    .await
            })
            .await
    }

    async fn write_transfer(&self, transfer: &FileTransfer) -> StoreResult<bool> {
        self.store
            .call(move |s| async move { s.update_transfer(transfer).await })
            .await
    }

    async fn cached_blob(&self, hash: &str) -> StoreResult<Option<Bytes>> {
        Ok(self
            .store
            .call(move |s| async move { s.get_blob(hash).await })
            .await?
            .map(|blob| blob.data))
    }

    /// Request a pass `delay` from now. Requests coalesce to the earliest time.
    fn schedule_pass(&self, delay: Duration) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("No Tokio runtime available, scheduler pass skipped");
            return;
        };
        let at = Instant::now() + delay;

        let mut state = self.lock_state();
        if let Some(scheduled) = &state.scheduled {
            if scheduled.at <= at {
                return;
            }
            // Still sleeping: a timer clears `scheduled` before it runs its pass.
            scheduled.handle.abort();
        }
        let me = self.me.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep_until(at).await;
            let Some(inner) = me.upgrade() else {
                return;
            };
            inner.lock_state().scheduled = None;
            inner.run_pass().await;
        });
        state.scheduled = Some(ScheduledPass { at, handle });
    }

    async fn run_pass(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            if state.pass_in_progress {
                state.rerun_requested = true;
                return;
            }
            state.pass_in_progress = true;
        }

        loop {
            if let Err(e) = self.pass_once().await {
                tracing::error!(error = %e, "Scheduler pass failed");
                self.schedule_pass(self.config.backoff_base);
            }
            let rerun = {
                let mut state = self.lock_state();
                if state.rerun_requested {
                    state.rerun_requested = false;
                    true
                } else {
                    state.pass_in_progress = false;
                    false
                }
            };
            if !rerun {
                break;
            }
        }
    }

    async fn pass_once(self: &Arc<Self>) -> StoreResult<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        let (workspace_id, cleanup_due, needs_resume) = {
            let mut state = self.lock_state();
            let Some(workspace_id) = state.workspace_id.clone() else {
                return Ok(());
            };
            let cleanup_due = state
                .last_cleanup
                .map_or(true, |at| at.elapsed() >= self.config.cleanup_interval);
            let needs_resume = std::mem::take(&mut state.needs_resume);
            (workspace_id, cleanup_due, needs_resume)
        };
        let ws = workspace_id.as_str();

        if cleanup_due {
            if let Err(e) = self.run_cleanup().await {
                tracing::warn!(error = %e, "Transfer retention sweep failed");
            }
        }

        if needs_resume {
            let exclude: Vec<String> = self.lock_state().running.keys().cloned().collect();
            let exclude = exclude.as_slice();
            match self
                .store
                .call(move |s| async move { s.requeue_running(ws, exclude).await })
                .await
            {
                Ok(0) => {}
                Ok(requeued) => {
                    tracing::info!(workspace_id = %ws, requeued, "Resumed interrupted transfers")
                }
                Err(e) => {
                    self.lock_state().needs_resume = true;
                    return Err(e);
                }
            }
        }

        let limit = {
            let state = self.lock_state();
            let available = self.config.concurrency.saturating_sub(state.running.len());
            if available == 0 {
                return Ok(());
            }
            // Over-fetch so rows already running or backing off cannot starve the window.
            available + state.running.len() + state.retry_after.len()
        };
        let candidates = self
            .store
            .call(move |s| async move { s.list_queued(ws, limit).await })
            .await?;

        let now = Instant::now();
        for transfer in candidates {
            let cancel = {
                let mut state = self.lock_state();
                if state.workspace_id.as_deref() != Some(ws)
                    || state.running.len() >= self.config.concurrency
                {
                    break;
                }
                if state.running.contains_key(&transfer.id) {
                    continue;
                }
                if let Some(&at) = state.retry_after.get(&transfer.id) {
                    if at > now {
                        continue;
                    }
                    state.retry_after.remove(&transfer.id);
                }
                let cancel = self.shutdown.child_token();
                state.running.insert(
                    transfer.id.clone(),
                    RunningTransfer {
                        workspace_id: workspace_id.clone(),
                        cancel: cancel.clone(),
                    },
                );
                cancel
            };
            self.spawn_worker(transfer, cancel);
        }

        // A sooner request may have replaced the delayed timer; keep one pending for backoffs.
        let next_retry = {
            let mut state = self.lock_state();
            let now = Instant::now();
            state.retry_after.retain(|_, at| *at > now);
            state.retry_after.values().min().copied()
        };
        if let Some(at) = next_retry {
            self.schedule_pass(at.saturating_duration_since(Instant::now()));
        }
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>, transfer: FileTransfer, cancel: CancellationToken) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let id = transfer.id.clone();
            inner.process(transfer, cancel).await;
            inner.lock_state().running.remove(&id);
            inner.schedule_pass(Duration::ZERO);
        });
    }

    #[tracing::instrument(
        skip(self, transfer, cancel),
        fields(
            transfer.id = %transfer.id,
            hash = %transfer.hash,
            direction = %transfer.direction,
            attempts = transfer.attempts
        )
    )]
    async fn process(&self, mut transfer: FileTransfer, cancel: CancellationToken) {
        transfer.mark_running();
        match self.write_transfer(&transfer).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Transfer no longer active, skipping");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to mark transfer running");
                self.lock_state()
                    .retry_after
                    .insert(transfer.id.clone(), Instant::now() + self.config.backoff_base);
                self.schedule_pass(self.config.backoff_base);
                return;
            }
        }
        tracing::info!("Transfer started");

        let ctx = TransferContext {
            store: &self.store,
            provider: self.provider.as_ref(),
            transport: self.transport.as_ref(),
            hooks: &self.hooks,
            config: &self.config,
            cancel,
        };
        let outcome = match transfer.direction {
            TransferDirection::Upload => upload::run(&ctx, &transfer).await,
            TransferDirection::Download => download::run(&ctx, &transfer).await,
        };

        match outcome {
            Ok(bytes) => self.complete(transfer, bytes).await,
            Err(err) => self.fail_attempt(transfer, err).await,
        }
    }

    async fn complete(&self, mut transfer: FileTransfer, bytes: u64) {
        transfer.mark_done(bytes);
        match self.write_transfer(&transfer).await {
            Ok(true) => tracing::info!(bytes, "Transfer completed"),
            Ok(false) => tracing::warn!("Transfer finished after it was terminated elsewhere"),
            Err(e) => tracing::error!(error = %e, "Failed to record completed transfer"),
        }
        let id = transfer.id.clone();
        self.waiters.resolve(&id, Ok(transfer));
    }

    async fn fail_attempt(&self, mut transfer: FileTransfer, err: TransferError) {
        let attempts = transfer.attempts.saturating_add(1);
        let is_final =
            err.is_cancelled() || !err.is_recoverable() || attempts >= self.config.max_attempts;

        if !is_final {
            transfer.mark_retry(&err);
            let delay = compute_backoff(
                transfer.attempts,
                self.config.backoff_base,
                self.config.backoff_max,
            );
            match self.write_transfer(&transfer).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("Transfer terminated during attempt, not retrying");
                    return;
                }
                Err(e) => tracing::error!(error = %e, "Failed to record transfer retry"),
            }
            tracing::warn!(
                attempts = transfer.attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Transfer attempt failed, retrying"
            );
            self.lock_state()
                .retry_after
                .insert(transfer.id.clone(), Instant::now() + delay);
            self.schedule_pass(delay);
            return;
        }

        // Retryable errors that ran out of attempts surface as a provider failure.
        let surfaced = if err.is_recoverable() {
            TransferError::ProviderError(err.to_string())
        } else {
            err
        };
        transfer.mark_failed(&surfaced, true);
        if let Err(e) = self.write_transfer(&transfer).await {
            tracing::error!(error = %e, "Failed to record failed transfer");
        }
        self.lock_state().retry_after.remove(&transfer.id);

        if surfaced.is_cancelled() {
            tracing::info!(attempts = transfer.attempts, "Transfer cancelled");
        } else {
            tracing::error!(
                attempts = transfer.attempts,
                error_code = surfaced.error_code(),
                error = %surfaced,
                "Transfer failed"
            );
        }
        self.waiters.resolve(&transfer.id, Err(surfaced.clone()));

        if !surfaced.is_cancelled() {
            self.reporter
                .report_transfer_failure(&TransferFailure {
                    transfer_id: transfer.id.clone(),
                    workspace_id: transfer.workspace_id.clone(),
                    hash: transfer.hash.clone(),
                    direction: transfer.direction,
                    attempts: transfer.attempts,
                    error: surfaced,
                })
                .await;
        }
    }

    async fn run_cleanup(&self) -> StoreResult<u64> {
        self.lock_state().last_cleanup = Some(Instant::now());
        let cutoff = retention_cutoff(Utc::now(), self.config.retention);
        let deleted = self
            .store
            .call(move |s| async move { s.delete_finished_before(cutoff).await })
            .await?;
        if deleted > 0 {
            tracing::info!(deleted, cutoff = %cutoff, "Removed expired transfer records");
        }
        Ok(deleted)
    }
}

fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
