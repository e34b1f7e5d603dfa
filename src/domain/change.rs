//! Change requests and their approval state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DomainError;

string_enum! {
    /// Configuration area a change touches
    ChangeCategory {
        Network => "network",
        Wireless => "wireless",
        Firewall => "firewall",
        Dhcp => "dhcp",
        Qos => "qos",
        Packages => "packages",
        Mesh => "mesh",
        System => "system",
    }
}

string_enum! {
    ChangeOperation {
        Create => "create",
        Update => "update",
        Delete => "delete",
    }
}

string_enum! {
    ImpactLevel {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

string_enum! {
    /// Lifecycle of a change request
    ///
    /// ```text
    /// pending ──approve──▶ approved ──hand-off──▶ executing ──▶ completed
    ///    │                                            └──────▶ failed
    ///    └──reject──▶ cancelled
    /// ```
    ChangeStatus {
        Pending => "pending",
        Approved => "approved",
        Executing => "executing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl ChangeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChangeStatus::Completed | ChangeStatus::Failed | ChangeStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: ChangeStatus) -> bool {
        use ChangeStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Cancelled)
                | (Approved, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
        )
    }

    /// Validation error for an illegal move out of this status
    pub fn check_transition(&self, next: ChangeStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::Validation(format!(
                "change request cannot move from '{}' to '{}'",
                self, next
            )))
        }
    }
}

impl Default for ImpactLevel {
    fn default() -> Self {
        ImpactLevel::Medium
    }
}

/// Out-of-band audit note; the only thing that may still be added once a request is terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub author: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: String,
    pub device_id: String,
    pub category: ChangeCategory,
    pub operation: ChangeOperation,
    pub target_type: String,
    pub target_id: Option<String>,
    pub target_name: Option<String>,
    /// Snapshots kept for audit and rollback, never interpreted here
    pub previous_value: Option<Value>,
    pub proposed_value: Option<Value>,
    pub commands: Vec<String>,
    pub rollback_commands: Vec<String>,
    pub impact: ImpactLevel,
    pub requires_reboot: bool,
    pub affected_services: Vec<String>,
    pub dependencies: Vec<String>,
    pub status: ChangeStatus,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub annotations: Vec<Annotation>,
}

/// Input for creating a change request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChangeInput {
    pub device_id: String,
    pub category: ChangeCategory,
    pub operation: ChangeOperation,
    pub target_type: String,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub previous_value: Option<Value>,
    #[serde(default)]
    pub proposed_value: Option<Value>,
    pub commands: Vec<String>,
    #[serde(default)]
    pub rollback_commands: Vec<String>,
    #[serde(default)]
    pub impact: ImpactLevel,
    #[serde(default)]
    pub requires_reboot: bool,
    #[serde(default)]
    pub affected_services: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl CreateChangeInput {
    /// Reject malformed input and normalise the set-valued fields (trimmed, deduplicated, order kept)
    pub fn validate(mut self) -> Result<Self, DomainError> {
        self.device_id = self.device_id.trim().to_string();
        self.target_type = self.target_type.trim().to_string();

        if self.device_id.is_empty() {
            return Err(DomainError::Validation("device_id is required".to_string()));
        }
        if self.target_type.is_empty() {
            return Err(DomainError::Validation("target_type is required".to_string()));
        }
        if self.commands.iter().all(|c| c.trim().is_empty()) {
            return Err(DomainError::Validation(
                "at least one command is required".to_string(),
            ));
        }

        self.commands.retain(|c| !c.trim().is_empty());
        self.rollback_commands.retain(|c| !c.trim().is_empty());
        self.affected_services = dedup_trimmed(self.affected_services);
        self.dependencies = dedup_trimmed(self.dependencies);

        Ok(self)
    }
}

fn dedup_trimmed(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim().to_string();
        if !value.is_empty() && !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

/// Fields written together with a status change
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

/// Filter criteria for change request queries
#[derive(Debug, Default, Clone)]
pub struct ChangeFilter {
    pub device_id: Option<String>,
    pub status: Option<ChangeStatus>,
}
