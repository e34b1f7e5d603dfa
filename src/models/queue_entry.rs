use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "queue_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub device_id: String,
    pub change_id: String,
    #[sea_orm(default_value = "queued")]
    pub status: String, // queued, processing, completed, failed
    pub queued_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::change_request::Entity",
        from = "Column::ChangeId",
        to = "super::change_request::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    ChangeRequest,
}

impl Related<super::change_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChangeRequest.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
