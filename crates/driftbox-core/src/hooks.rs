//! Hook points and error reporting for the transfer queue
//!
//! The queue does not know who consumes its events. Embedding applications (sync engine,
//! telemetry, policy layers) register filters and actions on a [`TransferHooks`] value and
//! implement [`ErrorReporter`] to receive final failures.
//!
//! Filters return a value (transformed data or an explicit rejection) and actions are
//! fire-and-forget. Every callable runs under `catch_unwind`, so a panicking extension is
//! logged and skipped instead of taking the worker down with it.

use async_trait::async_trait;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::error::{ErrorMetadata, LogLevel, TransferError};
use crate::models::TransferDirection;

pub const UPLOAD_POLICY_FILTER: &str = "storage.files.upload:filter:policy";
pub const URL_OPTIONS_FILTER: &str = "storage.files.url:filter:options";
pub const UPLOAD_BEFORE_ACTION: &str = "storage.files.upload:action:before";
pub const UPLOAD_AFTER_ACTION: &str = "storage.files.upload:action:after";
pub const DOWNLOAD_BEFORE_ACTION: &str = "storage.files.download:action:before";
pub const DOWNLOAD_AFTER_ACTION: &str = "storage.files.download:action:after";

/// Default lifetime of a presigned URL.
pub const DEFAULT_PRESIGN_EXPIRES_MS: u64 = 15 * 60 * 1000;

/// Input to the upload policy filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicyInput {
    pub hash: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Outcome of the upload policy filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Reject(String),
}

/// Presign options, overridable through the url-options filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignOptions {
    pub expires_in_ms: u64,
    /// `Content-Disposition` to request from the backend (e.g. `attachment`).
    pub disposition: Option<String>,
}

impl Default for PresignOptions {
    fn default() -> Self {
        Self {
            expires_in_ms: DEFAULT_PRESIGN_EXPIRES_MS,
            disposition: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlOptionsContext {
    pub workspace_id: String,
    pub hash: String,
    pub direction: TransferDirection,
}

/// The four action hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionHook {
    UploadBefore,
    UploadAfter,
    DownloadBefore,
    DownloadAfter,
}

impl ActionHook {
    pub fn name(&self) -> &'static str {
        match self {
            ActionHook::UploadBefore => UPLOAD_BEFORE_ACTION,
            ActionHook::UploadAfter => UPLOAD_AFTER_ACTION,
            ActionHook::DownloadBefore => DOWNLOAD_BEFORE_ACTION,
            ActionHook::DownloadAfter => DOWNLOAD_AFTER_ACTION,
        }
    }
}

/// Event payload delivered to action hooks.
///
/// `storage_id` is set on `UploadAfter` and on both download events; `bytes` is set on
/// the `*After` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferAction {
    pub hook: ActionHook,
    pub transfer_id: String,
    pub workspace_id: String,
    pub hash: String,
    pub storage_id: Option<String>,
    pub bytes: Option<u64>,
}

type PolicyFilter = Arc<dyn Fn(&UploadPolicyInput) -> PolicyDecision + Send + Sync>;
type OptionsFilter =
    Arc<dyn Fn(PresignOptions, &UrlOptionsContext) -> PresignOptions + Send + Sync>;
type ActionCallback = Arc<dyn Fn(&TransferAction) + Send + Sync>;

/// Ordered registry of filters and actions.
#[derive(Default)]
pub struct TransferHooks {
    policy_filters: RwLock<Vec<PolicyFilter>>,
    options_filters: RwLock<Vec<OptionsFilter>>,
    actions: RwLock<Vec<(ActionHook, ActionCallback)>>,
}

impl TransferHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_upload_policy<F>(&self, filter: F)
    where
        F: Fn(&UploadPolicyInput) -> PolicyDecision + Send + Sync + 'static,
    {
        if let Ok(mut filters) = self.policy_filters.write() {
            filters.push(Arc::new(filter));
        }
    }

    pub fn on_url_options<F>(&self, filter: F)
    where
        F: Fn(PresignOptions, &UrlOptionsContext) -> PresignOptions + Send + Sync + 'static,
    {
        if let Ok(mut filters) = self.options_filters.write() {
            filters.push(Arc::new(filter));
        }
    }

    pub fn on_action<F>(&self, hook: ActionHook, callback: F)
    where
        F: Fn(&TransferAction) + Send + Sync + 'static,
    {
        if let Ok(mut actions) = self.actions.write() {
            actions.push((hook, Arc::new(callback)));
        }
    }

    /// Run policy filters in registration order. The first rejection wins.
    pub fn check_upload_policy(&self, input: &UploadPolicyInput) -> PolicyDecision {
        let filters = match self.policy_filters.read() {
            Ok(filters) => filters.clone(),
            Err(_) => return PolicyDecision::Allow,
        };
        for filter in filters {
            match catch_unwind(AssertUnwindSafe(|| filter(input))) {
                Ok(PolicyDecision::Allow) => {}
                Ok(reject @ PolicyDecision::Reject(_)) => return reject,
                Err(_) => {
                    tracing::warn!(
                        hook = UPLOAD_POLICY_FILTER,
                        hash = %input.hash,
                        "Policy filter panicked, skipping"
                    );
                }
            }
        }
        PolicyDecision::Allow
    }

    /// Thread presign options through every url-options filter.
    pub fn resolve_presign_options(
        &self,
        options: PresignOptions,
        context: &UrlOptionsContext,
    ) -> PresignOptions {
        let filters = match self.options_filters.read() {
            Ok(filters) => filters.clone(),
            Err(_) => return options,
        };
        filters.into_iter().fold(options, |current, filter| {
            let input = current.clone();
            match catch_unwind(AssertUnwindSafe(|| filter(input, context))) {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!(
                        hook = URL_OPTIONS_FILTER,
                        hash = %context.hash,
                        "Options filter panicked, skipping"
                    );
                    current
                }
            }
        })
    }

    pub fn emit(&self, action: &TransferAction) {
        let callbacks: Vec<ActionCallback> = match self.actions.read() {
            Ok(actions) => actions
                .iter()
                .filter(|(hook, _)| *hook == action.hook)
                .map(|(_, callback)| callback.clone())
                .collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(action))).is_err() {
                tracing::warn!(
                    hook = action.hook.name(),
                    hash = %action.hash,
                    "Action hook panicked"
                );
            }
        }
    }
}

/// A transfer that reached `failed`.
#[derive(Debug, Clone)]
pub struct TransferFailure {
    pub transfer_id: String,
    pub workspace_id: String,
    pub hash: String,
    pub direction: TransferDirection,
    pub attempts: u32,
    pub error: TransferError,
}

/// Receives final transfer failures. Reporting is best-effort and never fails the queue.
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report_transfer_failure(&self, failure: &TransferFailure);
}

/// No-op implementation for hosts without error reporting
pub struct NoOpErrorReporter;

#[async_trait]
impl ErrorReporter for NoOpErrorReporter {
    async fn report_transfer_failure(&self, _failure: &TransferFailure) {}
}

/// Logs failures through `tracing` at the error's own log level.
pub struct TracingErrorReporter;

#[async_trait]
impl ErrorReporter for TracingErrorReporter {
    async fn report_transfer_failure(&self, failure: &TransferFailure) {
        let code = failure.error.error_code();
        match failure.error.log_level() {
            LogLevel::Debug => tracing::debug!(
                transfer.id = %failure.transfer_id,
                workspace_id = %failure.workspace_id,
                hash = %failure.hash,
                direction = %failure.direction,
                attempts = failure.attempts,
                error_code = code,
                error = %failure.error,
                "Transfer failed"
            ),
            LogLevel::Warn => tracing::warn!(
                transfer.id = %failure.transfer_id,
                workspace_id = %failure.workspace_id,
                hash = %failure.hash,
                direction = %failure.direction,
                attempts = failure.attempts,
                error_code = code,
                error = %failure.error,
                "Transfer failed"
            ),
            LogLevel::Error => tracing::error!(
                transfer.id = %failure.transfer_id,
                workspace_id = %failure.workspace_id,
                hash = %failure.hash,
                direction = %failure.direction,
                attempts = failure.attempts,
                error_code = code,
                error = %failure.error,
                "Transfer failed"
            ),
        }
    }
}
