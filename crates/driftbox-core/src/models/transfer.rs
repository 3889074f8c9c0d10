use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ErrorMetadata, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Upload => "upload",
            TransferDirection::Download => "download",
        }
    }
}

impl Display for TransferDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(TransferDirection::Upload),
            "download" => Ok(TransferDirection::Download),
            _ => Err(anyhow::anyhow!("Invalid transfer direction: {}", s)),
        }
    }
}

/// Transfer state machine: `queued -> running -> done`, `running -> queued` on a
/// retryable failure, `running -> failed` on a final one. `done` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Queued,
    Running,
    Done,
    Failed,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Queued => "queued",
            TransferState::Running => "running",
            TransferState::Done => "done",
            TransferState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Done | TransferState::Failed)
    }

    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Queued, Running) | (Running, Done) | (Running, Queued) | (Running, Failed)
                | (Queued, Failed)
        )
    }
}

impl Display for TransferState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TransferState::Queued),
            "running" => Ok(TransferState::Running),
            "done" => Ok(TransferState::Done),
            "failed" => Ok(TransferState::Failed),
            _ => Err(anyhow::anyhow!("Invalid transfer state: {}", s)),
        }
    }
}

/// One transfer attempt-series for a `(hash, direction)` pair within a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransfer {
    pub id: String,
    pub workspace_id: String,
    pub hash: String,
    pub direction: TransferDirection,
    pub bytes_total: u64,
    pub bytes_done: u64,
    pub state: TransferState,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Machine-readable code of `last_error`, see [`TransferError::from_code`].
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileTransfer {
    pub fn new(
        workspace_id: impl Into<String>,
        hash: impl Into<String>,
        direction: TransferDirection,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            hash: hash.into(),
            direction,
            bytes_total: 0,
            bytes_done: 0,
            state: TransferState::Queued,
            attempts: 0,
            last_error: None,
            error_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TransferState::Queued | TransferState::Running)
    }

    pub fn mark_running(&mut self) {
        self.state = TransferState::Running;
        self.updated_at = Utc::now();
    }

    /// Record progress, keeping `bytes_done <= bytes_total` once the total is known.
    pub fn record_progress(&mut self, bytes_done: u64, bytes_total: u64) {
        self.bytes_total = bytes_total;
        self.bytes_done = if bytes_total > 0 {
            bytes_done.min(bytes_total)
        } else {
            bytes_done
        };
        self.updated_at = Utc::now();
    }

    pub fn mark_done(&mut self, bytes: u64) {
        self.record_progress(bytes, bytes.max(self.bytes_total));
        self.state = TransferState::Done;
        self.last_error = None;
        self.error_code = None;
    }

    /// Count a failed attempt and return to the queue.
    pub fn mark_retry(&mut self, error: &TransferError) {
        self.attempts += 1;
        self.state = TransferState::Queued;
        self.set_error(error);
    }

    /// Count a failed attempt (when one was in flight) and terminate.
    pub fn mark_failed(&mut self, error: &TransferError, attempted: bool) {
        if attempted {
            self.attempts += 1;
        }
        self.state = TransferState::Failed;
        self.set_error(error);
    }

    /// The terminal error a waiter should see for this record, if it failed.
    pub fn failure(&self) -> Option<TransferError> {
        (self.state == TransferState::Failed).then(|| {
            TransferError::from_code(
                self.error_code.as_deref(),
                self.last_error.clone().unwrap_or_default(),
            )
        })
    }

    fn set_error(&mut self, error: &TransferError) {
        self.last_error = Some(error.detail());
        self.error_code = Some(error.error_code().to_string());
        self.updated_at = Utc::now();
    }
}
