//! Change Service - approval workflow over change requests
//!
//! Owns every status move of a [`ChangeRequest`]. Execution is delegated to the
//! [`DeviceCommandQueue`]; this service only decides *whether* a request may be
//! handed off and writes the outcome back once the queue reports it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;

use super::device_queue::DeviceCommandQueue;
use crate::connector::ExecutionConnector;
use crate::domain::{
    ChangeFilter, ChangeRequest, ChangeRequestRepository, ChangeStatus, CreateChangeInput,
    DeviceRepository, DomainError, ExecutionResult, RESTART_INTERRUPTED_ERROR, StatusUpdate,
};

/// Pause before retrying a failed outcome write-back
const STORE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Outcome of executing one change request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub change_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Set when the device outcome ran but could not be written to the change request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_error: Option<String>,
}

/// Approved request that a guard refused to hand off
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedChange {
    pub change_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<ExecutionReport>,
    pub skipped: Vec<SkippedChange>,
    pub executed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ChangeService {
    changes: Arc<dyn ChangeRequestRepository>,
    devices: Arc<dyn DeviceRepository>,
    queue: DeviceCommandQueue,
    connector: Arc<dyn ExecutionConnector>,
    store_retry_delay: Duration,
}

fn required(value: &str, field: &str) -> Result<String, DomainError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ChangeService {
    pub fn new(
        changes: Arc<dyn ChangeRequestRepository>,
        devices: Arc<dyn DeviceRepository>,
        queue: DeviceCommandQueue,
        connector: Arc<dyn ExecutionConnector>,
    ) -> Self {
        Self {
            changes,
            devices,
            queue,
            connector,
            store_retry_delay: STORE_RETRY_DELAY,
        }
    }

    pub fn with_store_retry_delay(mut self, delay: Duration) -> Self {
        self.store_retry_delay = delay;
        self
    }

    pub fn queue(&self) -> &DeviceCommandQueue {
        &self.queue
    }

    /// Create a change request in status `pending`
    pub async fn create(&self, input: CreateChangeInput) -> Result<ChangeRequest, DomainError> {
        let input = input.validate()?;

        for dependency in &input.dependencies {
            if self.changes.find_by_id(dependency).await?.is_none() {
                return Err(DomainError::Validation(format!(
                    "unknown dependency '{}'",
                    dependency
                )));
            }
        }

        let change = self.changes.create(input).await?;
        tracing::info!(
            change_id = %change.id,
            device_id = %change.device_id,
            "📝 Change request created ({} {} {})",
            change.operation,
            change.category,
            change.target_type
        );
        Ok(change)
    }

    pub async fn get(&self, id: &str) -> Result<ChangeRequest, DomainError> {
        self.changes.find_by_id(id).await?.ok_or(DomainError::NotFound)
    }

    pub async fn list(&self, filter: ChangeFilter) -> Result<Vec<ChangeRequest>, DomainError> {
        self.changes.find_all(filter).await
    }

    /// pending -> approved
    pub async fn approve(
        &self,
        id: &str,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<ChangeRequest, DomainError> {
        let reviewer = required(reviewer, "reviewer")?;
        let change = self
            .changes
            .transition(
                id,
                ChangeStatus::Pending,
                ChangeStatus::Approved,
                StatusUpdate {
                    reviewed_by: Some(reviewer.clone()),
                    reviewed_at: Some(Utc::now()),
                    review_notes: non_empty(notes),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(change_id = %id, "👍 Change approved by {}", reviewer);
        Ok(change)
    }

    /// pending -> cancelled
    pub async fn reject(
        &self,
        id: &str,
        reviewer: &str,
        reason: Option<String>,
    ) -> Result<ChangeRequest, DomainError> {
        let reviewer = required(reviewer, "reviewer")?;
        let change = self
            .changes
            .transition(
                id,
                ChangeStatus::Pending,
                ChangeStatus::Cancelled,
                StatusUpdate {
                    reviewed_by: Some(reviewer.clone()),
                    reviewed_at: Some(Utc::now()),
                    review_notes: non_empty(reason),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(change_id = %id, "👎 Change rejected by {}", reviewer);
        Ok(change)
    }

    /// Audit note; allowed in every status
    pub async fn annotate(
        &self,
        id: &str,
        author: &str,
        note: &str,
    ) -> Result<ChangeRequest, DomainError> {
        let author = required(author, "author")?;
        let note = required(note, "note")?;
        self.changes.annotate(id, author, note).await
    }

    /// Execute one approved request and wait for its result
    pub async fn execute(&self, id: &str) -> Result<ExecutionReport, DomainError> {
        let task = self.submit(id).await?;
        task.await
            .map_err(|e| DomainError::Internal(format!("execution task failed: {}", e)))
    }

    /// Hand every approved request (optionally for one device) to the queue, then
    /// wait for all of them. Requests in any other status are not touched.
    pub async fn execute_all_approved(
        &self,
        device_id: Option<String>,
    ) -> Result<BatchReport, DomainError> {
        let approved = self
            .changes
            .find_all(ChangeFilter {
                device_id,
                status: Some(ChangeStatus::Approved),
            })
            .await?;

        let mut report = BatchReport::default();
        let mut tasks = Vec::with_capacity(approved.len());

        for change in approved {
            match self.submit(&change.id).await {
                Ok(task) => tasks.push((change.id, task)),
                Err(e) => {
                    tracing::warn!(change_id = %change.id, "⏭️ Skipped: {}", e);
                    report.skipped.push(SkippedChange {
                        change_id: change.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let outcomes = futures::future::join_all(
            tasks
                .into_iter()
                .map(|(id, task)| task.map(move |outcome| (id, outcome))),
        )
        .await;

        for (change_id, outcome) in outcomes {
            let execution = outcome.unwrap_or_else(|e| ExecutionReport {
                success: false,
                change_id,
                output: None,
                error: Some(format!("execution task failed: {}", e)),
                executed_at: Utc::now(),
                duration_ms: 0,
                record_error: None,
            });
            if execution.success {
                report.executed += 1;
            } else {
                report.failed += 1;
            }
            report.results.push(execution);
        }

        tracing::info!(
            "📦 Batch finished: {} executed, {} failed, {} skipped",
            report.executed,
            report.failed,
            report.skipped.len()
        );
        Ok(report)
    }

    /// Fail every request left `executing` by a previous process. Run after the
    /// queue's own recovery sweep, at startup only.
    pub async fn reconcile_interrupted(&self) -> Result<Vec<String>, DomainError> {
        let ids = self.changes.fail_executing(RESTART_INTERRUPTED_ERROR).await?;
        if !ids.is_empty() {
            tracing::warn!(
                "⚠️ {} change requests were executing when the server stopped",
                ids.len()
            );
        }
        Ok(ids)
    }

    /// Guards, approved -> executing, enqueue.
    ///
    /// The returned task records the outcome on the request by itself, so a caller
    /// that stops waiting cannot leave the request stuck in `executing`.
    async fn submit(&self, id: &str) -> Result<JoinHandle<ExecutionReport>, DomainError> {
        let change = self.get(id).await?;

        if change.status != ChangeStatus::Approved {
            return Err(DomainError::Validation(format!(
                "change request {} is '{}'; only approved requests can be executed",
                change.id, change.status
            )));
        }

        self.check_dependencies(&change).await?;

        let device = self
            .devices
            .find_by_id(&change.device_id)
            .await?
            .ok_or_else(|| {
                DomainError::Validation(format!(
                    "device '{}' is not registered",
                    change.device_id
                ))
            })?;

        // The only path into `executing`; the compare-and-set makes it happen once
        self.changes
            .transition(
                &change.id,
                ChangeStatus::Approved,
                ChangeStatus::Executing,
                StatusUpdate::default(),
            )
            .await?;

        let connector = Arc::clone(&self.connector);
        let address = device.address;
        let commands = change.commands;
        let handle = self
            .queue
            .enqueue(
                &change.device_id,
                &change.id,
                Box::new(move || {
                    async move { connector.execute(&address, &commands).await }.boxed()
                }),
            )
            .await;

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                // Never queued: do not leave the request claiming to execute.
                // One attempt only; the caller is told about the enqueue error.
                let result = ExecutionResult::failure(format!("failed to queue change: {}", e));
                if let Err(record) = self
                    .changes
                    .transition(
                        &change.id,
                        ChangeStatus::Executing,
                        ChangeStatus::Failed,
                        outcome_update(&result, Utc::now()),
                    )
                    .await
                {
                    tracing::error!(change_id = %change.id, "❌ Failed to record enqueue failure: {}", record);
                }
                return Err(e);
            }
        };

        let service = self.clone();
        let change_id = change.id;
        Ok(tokio::spawn(async move {
            let result = handle.await;
            let executed_at = Utc::now();
            let record_error = service
                .record_outcome(&change_id, &result, executed_at)
                .await
                .err()
                .map(|e| e.to_string());
            ExecutionReport {
                success: result.success,
                change_id,
                output: result.output,
                error: result.error,
                executed_at,
                duration_ms: result.duration_ms,
                record_error,
            }
        }))
    }

    async fn check_dependencies(&self, change: &ChangeRequest) -> Result<(), DomainError> {
        let mut unmet = Vec::new();
        for dependency in &change.dependencies {
            match self.changes.find_by_id(dependency).await? {
                Some(dep) if dep.status == ChangeStatus::Completed => {}
                Some(dep) => unmet.push(format!("{} ({})", dep.id, dep.status)),
                None => unmet.push(format!("{} (missing)", dependency)),
            }
        }

        if unmet.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Validation(format!(
                "change request {} has unmet dependencies: {}",
                change.id,
                unmet.join(", ")
            )))
        }
    }

    /// executing -> completed/failed, copying the queue result verbatim.
    ///
    /// The queue entry is already terminal at this point, so store errors are
    /// retried until the request row agrees with it.
    async fn record_outcome(
        &self,
        change_id: &str,
        result: &ExecutionResult,
        executed_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let to = if result.success {
            ChangeStatus::Completed
        } else {
            ChangeStatus::Failed
        };

        loop {
            match self
                .changes
                .transition(
                    change_id,
                    ChangeStatus::Executing,
                    to,
                    outcome_update(result, executed_at),
                )
                .await
            {
                Ok(_) => return Ok(()),
                Err(DomainError::Database(e)) => {
                    tracing::error!(change_id, "❌ Failed to record execution outcome: {}", e);
                    tokio::time::sleep(self.store_retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(change_id, "❌ Failed to record execution outcome: {}", e);
                    return Err(e);
                }
            }
        }
    }
}

fn outcome_update(result: &ExecutionResult, executed_at: DateTime<Utc>) -> StatusUpdate {
    StatusUpdate {
        executed_at: Some(executed_at),
        result: result.output.clone(),
        error_message: result.error_text(),
        duration_ms: Some(result.duration_ms.min(i64::MAX as u64) as i64),
        ..Default::default()
    }
}
