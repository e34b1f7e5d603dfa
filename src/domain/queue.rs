//! Queue entries: one execution attempt of an approved change

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    QueueStatus {
        Queued => "queued",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i32,
    pub device_id: String,
    pub change_id: String,
    pub status: QueueStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Filter criteria for queue entry listings
#[derive(Debug, Default, Clone)]
pub struct QueueEntryFilter {
    pub device_id: Option<String>,
    pub change_id: Option<String>,
}

/// Number of unfinished entries per device and status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatusCount {
    pub device_id: String,
    pub status: QueueStatus,
    pub count: u64,
}

/// Read-only snapshot of the whole queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub total_queued: u64,
    pub total_processing: u64,
    /// Devices with an active worker loop, sorted
    pub devices_processing: Vec<String>,
    /// queued + processing entries per device
    pub per_device_queue_lengths: BTreeMap<String, u64>,
}
