use driftbox_core::{FileTransfer, TransferError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

pub type WaitOutcome = Result<FileTransfer, TransferError>;

type PendingMap = HashMap<String, Vec<(u64, oneshot::Sender<WaitOutcome>)>>;

/// Callers blocked on a transfer reaching a terminal state, keyed by transfer id.
#[derive(Default)]
pub struct Waiters {
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
}

impl Waiters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, transfer_id: &str) -> (u64, oneshot::Receiver<WaitOutcome>) {
        let waiter_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock()
            .entry(transfer_id.to_string())
            .or_default()
            .push((waiter_id, tx));
        (waiter_id, rx)
    }

    pub fn remove(&self, transfer_id: &str, waiter_id: u64) {
        let mut pending = self.lock();
        if let Some(list) = pending.get_mut(transfer_id) {
            list.retain(|(id, _)| *id != waiter_id);
            if list.is_empty() {
                pending.remove(transfer_id);
            }
        }
    }

    /// Hand `outcome` to every waiter of `transfer_id`, in registration order.
    pub fn resolve(&self, transfer_id: &str, outcome: WaitOutcome) -> usize {
        let Some(list) = self.lock().remove(transfer_id) else {
            return 0;
        };
        let count = list.len();
        for (_, tx) in list {
            // Receiver may have timed out already.
            let _ = tx.send(outcome.clone());
        }
        count
    }

    pub fn count(&self, transfer_id: &str) -> usize {
        self.lock().get(transfer_id).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
