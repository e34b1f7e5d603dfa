//! SeaORM implementation of ChangeRequestRepository

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};

use super::{decode_list, encode_list, format_timestamp, parse_optional_timestamp, parse_timestamp};
use crate::domain::{
    Annotation, ChangeFilter, ChangeRequest, ChangeRequestRepository, ChangeStatus,
    CreateChangeInput, DomainError, StatusUpdate,
};
use crate::models::change_request::{ActiveModel, Column, Entity as ChangeEntity, Model};

/// SeaORM-based implementation of ChangeRequestRepository
pub struct SeaOrmChangeRequestRepository {
    db: DatabaseConnection,
}

impl SeaOrmChangeRequestRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn get(&self, id: &str) -> Result<ChangeRequest, DomainError> {
        self.find_by_id(id).await?.ok_or(DomainError::NotFound)
    }
}

fn to_domain(model: Model) -> Result<ChangeRequest, DomainError> {
    let previous_value = model
        .previous_value
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let proposed_value = model
        .proposed_value
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let annotations: Vec<Annotation> = if model.annotations.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&model.annotations)?
    };

    Ok(ChangeRequest {
        category: model.category.parse()?,
        operation: model.operation.parse()?,
        impact: model.impact.parse()?,
        status: model.status.parse()?,
        target_type: model.target_type,
        target_id: model.target_id,
        target_name: model.target_name,
        previous_value,
        proposed_value,
        commands: decode_list(&model.commands)?,
        rollback_commands: decode_list(&model.rollback_commands)?,
        requires_reboot: model.requires_reboot,
        affected_services: decode_list(&model.affected_services)?,
        dependencies: decode_list(&model.dependencies)?,
        created_by: model.created_by,
        created_at: parse_timestamp(&model.created_at)?,
        reviewed_by: model.reviewed_by,
        reviewed_at: parse_optional_timestamp(model.reviewed_at.as_deref())?,
        review_notes: model.review_notes,
        executed_at: parse_optional_timestamp(model.executed_at.as_deref())?,
        result: model.result,
        error_message: model.error_message,
        duration_ms: model.duration_ms,
        annotations,
        id: model.id,
        device_id: model.device_id,
    })
}

#[async_trait]
impl ChangeRequestRepository for SeaOrmChangeRequestRepository {
    async fn create(&self, input: CreateChangeInput) -> Result<ChangeRequest, DomainError> {
        let now = format_timestamp(Utc::now());

        let change = ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            device_id: Set(input.device_id),
            category: Set(input.category.as_str().to_string()),
            operation: Set(input.operation.as_str().to_string()),
            target_type: Set(input.target_type),
            target_id: Set(input.target_id),
            target_name: Set(input.target_name),
            previous_value: Set(input
                .previous_value
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?),
            proposed_value: Set(input
                .proposed_value
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?),
            commands: Set(encode_list(&input.commands)?),
            rollback_commands: Set(encode_list(&input.rollback_commands)?),
            impact: Set(input.impact.as_str().to_string()),
            requires_reboot: Set(input.requires_reboot),
            affected_services: Set(encode_list(&input.affected_services)?),
            dependencies: Set(encode_list(&input.dependencies)?),
            status: Set(ChangeStatus::Pending.as_str().to_string()),
            created_by: Set(input.created_by),
            created_at: Set(now.clone()),
            reviewed_by: Set(None),
            reviewed_at: Set(None),
            review_notes: Set(None),
            executed_at: Set(None),
            result: Set(None),
            error_message: Set(None),
            duration_ms: Set(None),
            annotations: Set("[]".to_string()),
            updated_at: Set(now),
        };

        let result = change.insert(&self.db).await?;
        to_domain(result)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ChangeRequest>, DomainError> {
        ChangeEntity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .map(to_domain)
            .transpose()
    }

    async fn find_all(&self, filter: ChangeFilter) -> Result<Vec<ChangeRequest>, DomainError> {
        let mut condition = Condition::all();

        if let Some(device_id) = filter.device_id {
            condition = condition.add(Column::DeviceId.eq(device_id));
        }

        if let Some(status) = filter.status {
            condition = condition.add(Column::Status.eq(status.as_str()));
        }

        ChangeEntity::find()
            .filter(condition)
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_domain)
            .collect()
    }

    async fn transition(
        &self,
        id: &str,
        from: ChangeStatus,
        to: ChangeStatus,
        update: StatusUpdate,
    ) -> Result<ChangeRequest, DomainError> {
        from.check_transition(to)?;

        let mut stmt = ChangeEntity::update_many()
            .col_expr(Column::Status, Expr::value(to.as_str()))
            .col_expr(
                Column::UpdatedAt,
                Expr::value(format_timestamp(Utc::now())),
            );

        if let Some(reviewed_by) = update.reviewed_by {
            stmt = stmt.col_expr(Column::ReviewedBy, Expr::value(reviewed_by));
        }
        if let Some(reviewed_at) = update.reviewed_at {
            stmt = stmt.col_expr(Column::ReviewedAt, Expr::value(format_timestamp(reviewed_at)));
        }
        if let Some(notes) = update.review_notes {
            stmt = stmt.col_expr(Column::ReviewNotes, Expr::value(notes));
        }
        if let Some(executed_at) = update.executed_at {
            stmt = stmt.col_expr(Column::ExecutedAt, Expr::value(format_timestamp(executed_at)));
        }
        if let Some(result) = update.result {
            stmt = stmt.col_expr(Column::Result, Expr::value(result));
        }
        if let Some(error) = update.error_message {
            stmt = stmt.col_expr(Column::ErrorMessage, Expr::value(error));
        }
        if let Some(duration_ms) = update.duration_ms {
            stmt = stmt.col_expr(Column::DurationMs, Expr::value(duration_ms));
        }

        let result = stmt
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(from.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            let current = self.get(id).await?;
            return Err(DomainError::Validation(format!(
                "change request {} is '{}', expected '{}'",
                id, current.status, from
            )));
        }

        self.get(id).await
    }

    async fn annotate(
        &self,
        id: &str,
        author: String,
        note: String,
    ) -> Result<ChangeRequest, DomainError> {
        let existing = ChangeEntity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .ok_or(DomainError::NotFound)?;

        let mut annotations: Vec<Annotation> = if existing.annotations.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&existing.annotations)?
        };
        annotations.push(Annotation {
            author,
            note,
            created_at: Utc::now(),
        });

        let mut active: ActiveModel = existing.into();
        active.annotations = Set(serde_json::to_string(&annotations)?);
        active.updated_at = Set(format_timestamp(Utc::now()));

        let result = active.update(&self.db).await?;
        to_domain(result)
    }

    async fn fail_executing(&self, error: &str) -> Result<Vec<String>, DomainError> {
        let ids: Vec<String> = ChangeEntity::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::Status.eq(ChangeStatus::Executing.as_str()))
            .into_tuple()
            .all(&self.db)
            .await?;

        if ids.is_empty() {
            return Ok(ids);
        }

        let now = format_timestamp(Utc::now());
        ChangeEntity::update_many()
            .col_expr(Column::Status, Expr::value(ChangeStatus::Failed.as_str()))
            .col_expr(Column::ErrorMessage, Expr::value(error))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.is_in(ids.clone()))
            .filter(Column::Status.eq(ChangeStatus::Executing.as_str()))
            .exec(&self.db)
            .await?;

        Ok(ids)
    }
}
