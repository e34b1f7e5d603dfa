//! Repository trait definitions
//!
//! These traits define the contract for data access.
//! Implementations live in the infrastructure layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    ChangeFilter, ChangeRequest, ChangeStatus, CreateChangeInput, Device, DeviceStatusCount,
    DomainError, QueueEntry, QueueEntryFilter, StatusUpdate, UpsertDeviceInput,
};

/// Repository trait for ChangeRequest entity
#[async_trait]
pub trait ChangeRequestRepository: Send + Sync {
    /// Insert a new request in status `pending`
    async fn create(&self, input: CreateChangeInput) -> Result<ChangeRequest, DomainError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<ChangeRequest>, DomainError>;

    /// Requests matching the filter, oldest first
    async fn find_all(&self, filter: ChangeFilter) -> Result<Vec<ChangeRequest>, DomainError>;

    /// Compare-and-set status change.
    ///
    /// Applies `update` only if the row is still in `from`; a request that moved
    /// concurrently yields a validation error, a missing one `NotFound`.
    async fn transition(
        &self,
        id: &str,
        from: ChangeStatus,
        to: ChangeStatus,
        update: StatusUpdate,
    ) -> Result<ChangeRequest, DomainError>;

    /// Append an audit annotation, regardless of status
    async fn annotate(
        &self,
        id: &str,
        author: String,
        note: String,
    ) -> Result<ChangeRequest, DomainError>;

    /// Move every `executing` request to `failed` with `error`; returns the ids touched
    async fn fail_executing(&self, error: &str) -> Result<Vec<String>, DomainError>;
}

/// Repository trait for QueueEntry entity
#[async_trait]
pub trait QueueEntryRepository: Send + Sync {
    /// Insert a new entry in status `queued`
    async fn insert_queued(
        &self,
        device_id: &str,
        change_id: &str,
    ) -> Result<QueueEntry, DomainError>;

    /// Oldest queued entry for the device (queued_at, then id)
    async fn next_queued(&self, device_id: &str) -> Result<Option<QueueEntry>, DomainError>;

    /// queued -> processing, stamping started_at
    async fn mark_processing(&self, id: i32) -> Result<QueueEntry, DomainError>;

    /// processing -> completed/failed, stamping completed_at
    async fn mark_finished(
        &self,
        id: i32,
        success: bool,
        error: Option<String>,
    ) -> Result<QueueEntry, DomainError>;

    /// queued -> failed without ever running
    async fn fail_queued(&self, id: i32, error: &str) -> Result<(), DomainError>;

    /// Every queued/processing entry becomes failed with `error`; returns how many
    async fn fail_unfinished(&self, error: &str) -> Result<u64, DomainError>;

    async fn find_all(&self, filter: QueueEntryFilter) -> Result<Vec<QueueEntry>, DomainError>;

    /// Count of queued + processing entries for one device
    async fn count_unfinished(&self, device_id: &str) -> Result<u64, DomainError>;

    /// Unfinished entries grouped by device and status
    async fn unfinished_counts(&self) -> Result<Vec<DeviceStatusCount>, DomainError>;

    /// Delete terminal entries completed before `cutoff`; returns how many
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError>;
}

/// Repository trait for Device entity
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn find_all(&self) -> Result<Vec<Device>, DomainError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Device>, DomainError>;

    /// Create or update a device by id
    async fn upsert(&self, input: UpsertDeviceInput) -> Result<Device, DomainError>;
}
