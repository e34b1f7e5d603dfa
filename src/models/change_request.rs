use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "change_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub device_id: String,
    pub category: String,
    pub operation: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub target_name: Option<String>,
    pub previous_value: Option<String>, // JSON snapshot
    pub proposed_value: Option<String>, // JSON snapshot
    pub commands: String,                // JSON array of strings
    pub rollback_commands: String,       // JSON array of strings
    pub impact: String,
    pub requires_reboot: bool,
    pub affected_services: String, // JSON array of strings
    pub dependencies: String,      // JSON array of change ids
    #[sea_orm(default_value = "pending")]
    pub status: String, // pending, approved, executing, completed, failed, cancelled
    pub created_by: Option<String>,
    pub created_at: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub review_notes: Option<String>,
    pub executed_at: Option<String>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub annotations: String, // JSON array of {author, note, created_at}
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::queue_entry::Entity")]
    QueueEntry,
}

impl Related<super::queue_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QueueEntry.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
