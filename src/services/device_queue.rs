//! Device Command Queue
//!
//! Serializes execution per device while letting different devices run in
//! parallel. Every attempt is a persisted `queue_entries` row; the routine that
//! actually talks to the device lives only in memory (see [`QueueState::pending`]).
//!
//! One worker loop at most runs per device. `enqueue` and the loop's decision to
//! exit both happen under that device's gate, so an entry can never be inserted
//! after the loop looked for work but before it cleared its drain flag. Gates
//! are per device: a slow store round-trip for one device never holds up
//! another. The shared bookkeeping lock is only taken for in-memory updates.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, oneshot};

use crate::domain::{
    DomainError, EXECUTION_CONTEXT_LOST_ERROR, ExecutionResult, QueueEntry, QueueEntryFilter,
    QueueEntryRepository, QueueSnapshot, QueueStatus, RESTART_INTERRUPTED_ERROR,
};

/// Pause before retrying a failed queue store access
const STORE_RETRY_DELAY: Duration = Duration::from_secs(5);

pub type ExecuteFuture = BoxFuture<'static, Result<ExecutionResult, DomainError>>;

/// Caller-supplied routine run when the entry reaches the head of its device queue
pub type ExecuteFn = Box<dyn FnOnce() -> ExecuteFuture + Send>;

struct PendingExecution {
    change_id: String,
    execute: ExecuteFn,
    reply: oneshot::Sender<ExecutionResult>,
}

#[derive(Default)]
struct QueueState {
    /// Per-device exclusion between `enqueue` and the worker's claim/exit
    gates: HashMap<String, Arc<Mutex<()>>>,
    /// Devices with a running worker loop
    draining: HashSet<String>,
    /// Execution routines keyed by entry id.
    ///
    /// Process-local and never persisted: closures cannot be serialized. This is
    /// why a restart can only fail in-flight entries, never resume them.
    pending: HashMap<i32, PendingExecution>,
}

/// Resolves exactly once, when the entry reaches a terminal status
#[derive(Debug)]
pub struct QueueHandle {
    entry_id: i32,
    rx: oneshot::Receiver<ExecutionResult>,
}

impl QueueHandle {
    pub fn entry_id(&self) -> i32 {
        self.entry_id
    }
}

impl Future for QueueHandle {
    type Output = ExecutionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| ExecutionResult::failure(EXECUTION_CONTEXT_LOST_ERROR))
        })
    }
}

struct Job {
    entry: QueueEntry,
    pending: PendingExecution,
}

#[derive(Clone)]
pub struct DeviceCommandQueue {
    repo: Arc<dyn QueueEntryRepository>,
    state: Arc<Mutex<QueueState>>,
}

impl DeviceCommandQueue {
    /// Build the queue and run the restart sweep.
    ///
    /// Entries left `queued` or `processing` by a previous process are failed
    /// with [`RESTART_INTERRUPTED_ERROR`]; their routines died with that process.
    pub async fn new(repo: Arc<dyn QueueEntryRepository>) -> Result<Self, DomainError> {
        let recovered = repo.fail_unfinished(RESTART_INTERRUPTED_ERROR).await?;
        if recovered > 0 {
            tracing::warn!(
                "⚠️ Recovery sweep failed {} queue entries interrupted by a restart",
                recovered
            );
        }

        Ok(Self {
            repo,
            state: Arc::new(Mutex::new(QueueState::default())),
        })
    }

    /// Queue `execute` for `device_id` and return a handle to its eventual result.
    ///
    /// Returns as soon as the entry is persisted; the routine runs on the
    /// device's worker loop after every earlier entry for that device.
    pub async fn enqueue(
        &self,
        device_id: &str,
        change_id: &str,
        execute: ExecuteFn,
    ) -> Result<QueueHandle, DomainError> {
        let (reply, rx) = oneshot::channel();

        let gate = self.gate(device_id).await;
        let guard = gate.lock().await;
        let entry = self.repo.insert_queued(device_id, change_id).await?;
        let start_worker = {
            let mut state = self.state.lock().await;
            state.pending.insert(
                entry.id,
                PendingExecution {
                    change_id: change_id.to_string(),
                    execute,
                    reply,
                },
            );
            state.draining.insert(device_id.to_string())
        };
        drop(guard);

        tracing::info!(
            device_id,
            change_id,
            entry_id = entry.id,
            "📥 Queued change for device"
        );

        if start_worker {
            let queue = self.clone();
            let device_id = device_id.to_string();
            tokio::spawn(async move { queue.drain(device_id).await });
        }

        Ok(QueueHandle {
            entry_id: entry.id,
            rx,
        })
    }

    /// Number of queued + processing entries for the device
    pub async fn queue_length(&self, device_id: &str) -> Result<u64, DomainError> {
        self.repo.count_unfinished(device_id).await
    }

    /// Whether a worker loop is currently draining the device
    pub async fn is_processing(&self, device_id: &str) -> bool {
        self.state.lock().await.draining.contains(device_id)
    }

    pub async fn status(&self) -> Result<QueueSnapshot, DomainError> {
        let counts = self.repo.unfinished_counts().await?;

        let mut snapshot = QueueSnapshot::default();
        for row in counts {
            match row.status {
                QueueStatus::Queued => snapshot.total_queued += row.count,
                QueueStatus::Processing => snapshot.total_processing += row.count,
                _ => continue,
            }
            *snapshot
                .per_device_queue_lengths
                .entry(row.device_id)
                .or_insert(0) += row.count;
        }

        let mut devices: Vec<String> = self.state.lock().await.draining.iter().cloned().collect();
        devices.sort();
        snapshot.devices_processing = devices;

        Ok(snapshot)
    }

    pub async fn entries(&self, filter: QueueEntryFilter) -> Result<Vec<QueueEntry>, DomainError> {
        self.repo.find_all(filter).await
    }

    /// Delete completed/failed entries that finished more than `max_age` ago
    pub async fn cleanup_old_entries(&self, max_age: Duration) -> Result<u64, DomainError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|_| DomainError::Validation("max age out of range".to_string()))?;
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .ok_or_else(|| DomainError::Validation("max age out of range".to_string()))?;

        let removed = self.repo.delete_finished_before(cutoff).await?;
        if removed > 0 {
            tracing::info!("🧹 Removed {} finished queue entries", removed);
        }
        Ok(removed)
    }

    async fn gate(&self, device_id: &str) -> Arc<Mutex<()>> {
        let mut state = self.state.lock().await;
        Arc::clone(state.gates.entry(device_id.to_string()).or_default())
    }

    /// Worker loop for one device; exits when no queued entry is left
    async fn drain(self, device_id: String) {
        tracing::debug!(device_id = %device_id, "Worker loop started");
        let gate = self.gate(&device_id).await;

        loop {
            let job = {
                let guard = gate.lock().await;
                match self.claim_next(&device_id).await {
                    Ok(Some(job)) => job,
                    Ok(None) => {
                        self.state.lock().await.draining.remove(&device_id);
                        drop(guard);
                        break;
                    }
                    Err(e) => {
                        drop(guard);
                        tracing::error!(device_id = %device_id, "❌ Queue store error: {}", e);
                        tokio::time::sleep(STORE_RETRY_DELAY).await;
                        continue;
                    }
                }
            };

            self.run(job).await;
        }

        tracing::debug!(device_id = %device_id, "Worker loop exited");
    }

    /// Pick the oldest queued entry and move it to processing.
    ///
    /// A queued row without a routine (persistence and memory diverged) is
    /// failed on the spot and the search continues.
    async fn claim_next(&self, device_id: &str) -> Result<Option<Job>, DomainError> {
        loop {
            let Some(entry) = self.repo.next_queued(device_id).await? else {
                return Ok(None);
            };

            let pending = self.state.lock().await.pending.remove(&entry.id);
            let Some(pending) = pending else {
                tracing::error!(
                    device_id,
                    entry_id = entry.id,
                    change_id = %entry.change_id,
                    "❌ Queued entry has no execution routine"
                );
                self.repo
                    .fail_queued(entry.id, EXECUTION_CONTEXT_LOST_ERROR)
                    .await?;
                continue;
            };

            return match self.repo.mark_processing(entry.id).await {
                Ok(entry) => Ok(Some(Job { entry, pending })),
                Err(e) => {
                    // Keep the routine so the retry can still claim the row
                    self.state.lock().await.pending.insert(entry.id, pending);
                    Err(e)
                }
            };
        }
    }

    async fn run(&self, job: Job) {
        let Job { entry, pending } = job;
        let PendingExecution {
            change_id,
            execute,
            reply,
        } = pending;

        tracing::info!(
            device_id = %entry.device_id,
            entry_id = entry.id,
            change_id = %change_id,
            "⚙️ Executing change"
        );

        // Calling inside the async block means a panic while building the future is caught too
        let outcome = AssertUnwindSafe(async move { execute().await })
            .catch_unwind()
            .await;

        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ExecutionResult::failure(e.to_string()),
            Err(panic) => ExecutionResult::failure(format!(
                "execution routine panicked: {}",
                panic_message(panic.as_ref())
            )),
        };
        if !result.success && result.error.is_none() {
            result.error = result.error_text();
        }

        self.finish(&entry, &result).await;

        if result.success {
            tracing::info!(
                device_id = %entry.device_id,
                entry_id = entry.id,
                "✅ Change completed"
            );
        } else {
            tracing::warn!(
                device_id = %entry.device_id,
                entry_id = entry.id,
                "⚠️ Change failed: {}",
                result.error.as_deref().unwrap_or_default()
            );
        }

        if reply.send(result).is_err() {
            tracing::debug!(entry_id = entry.id, "Result receiver dropped");
        }
    }

    /// Record the terminal status; the next entry must not start while this row
    /// still says `processing`, so store errors are retried.
    async fn finish(&self, entry: &QueueEntry, result: &ExecutionResult) {
        loop {
            match self
                .repo
                .mark_finished(entry.id, result.success, result.error_text())
                .await
            {
                Ok(_) => return,
                Err(DomainError::Database(e)) => {
                    tracing::error!(entry_id = entry.id, "❌ Failed to record result: {}", e);
                    tokio::time::sleep(STORE_RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::error!(entry_id = entry.id, "❌ Failed to record result: {}", e);
                    return;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
