//! Application state: the composition root for repositories, queue and services

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::connector::ExecutionConnector;
use crate::domain::{ChangeRequestRepository, DeviceRepository, DomainError};
use crate::infrastructure::{
    SeaOrmChangeRequestRepository, SeaOrmDeviceRepository, SeaOrmQueueEntryRepository,
};
use crate::services::{ChangeService, DeviceCommandQueue};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    db: DatabaseConnection,
    /// Change request repository
    pub change_repo: Arc<dyn ChangeRequestRepository>,
    /// Device repository
    pub device_repo: Arc<dyn DeviceRepository>,
    /// The single per-process device queue
    pub queue: DeviceCommandQueue,
    /// Approval workflow
    pub changes: ChangeService,
}

impl AppState {
    /// Wire everything together.
    ///
    /// Building the queue runs its restart sweep; change requests that were
    /// executing when the previous process died are failed right after.
    pub async fn new(
        db: DatabaseConnection,
        connector: Arc<dyn ExecutionConnector>,
    ) -> Result<Self, DomainError> {
        let change_repo: Arc<dyn ChangeRequestRepository> =
            Arc::new(SeaOrmChangeRequestRepository::new(db.clone()));
        let device_repo: Arc<dyn DeviceRepository> =
            Arc::new(SeaOrmDeviceRepository::new(db.clone()));
        let queue_repo = Arc::new(SeaOrmQueueEntryRepository::new(db.clone()));

        let queue = DeviceCommandQueue::new(queue_repo).await?;
        let changes = ChangeService::new(
            change_repo.clone(),
            device_repo.clone(),
            queue.clone(),
            connector,
        );
        changes.reconcile_interrupted().await?;

        Ok(Self {
            db,
            change_repo,
            device_repo,
            queue,
            changes,
        })
    }

    /// Get the database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

// Implement FromRef to allow extracting DatabaseConnection from AppState
impl axum::extract::FromRef<AppState> for DatabaseConnection {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}
