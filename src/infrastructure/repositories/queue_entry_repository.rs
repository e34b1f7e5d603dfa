//! SeaORM implementation of QueueEntryRepository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, FromQueryResult,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use crate::domain::{
    DeviceStatusCount, DomainError, QueueEntry, QueueEntryFilter, QueueEntryRepository,
    QueueStatus,
};
use crate::models::queue_entry::{ActiveModel, Column, Entity as QueueEntity, Model};

const UNFINISHED: [&str; 2] = ["queued", "processing"];
const FINISHED: [&str; 2] = ["completed", "failed"];

/// SeaORM-based implementation of QueueEntryRepository
pub struct SeaOrmQueueEntryRepository {
    db: DatabaseConnection,
}

impl SeaOrmQueueEntryRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn get(&self, id: i32) -> Result<QueueEntry, DomainError> {
        QueueEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(to_domain)
            .transpose()?
            .ok_or(DomainError::NotFound)
    }

    /// Guarded status update: only rows still in `from` are touched
    async fn move_entry(
        &self,
        id: i32,
        from: QueueStatus,
        to: QueueStatus,
        stamp: Column,
        error: Option<String>,
    ) -> Result<QueueEntry, DomainError> {
        let result = QueueEntity::update_many()
            .col_expr(Column::Status, Expr::value(to.as_str()))
            .col_expr(stamp, Expr::value(format_timestamp(Utc::now())))
            .col_expr(Column::Error, Expr::value(error))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(from.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            let current = self.get(id).await?;
            let message = if current.status.is_terminal() {
                format!("queue entry {} already finished as '{}'", id, current.status)
            } else {
                format!(
                    "queue entry {} is '{}', expected '{}'",
                    id, current.status, from
                )
            };
            return Err(DomainError::Internal(message));
        }

        self.get(id).await
    }
}

fn to_domain(model: Model) -> Result<QueueEntry, DomainError> {
    Ok(QueueEntry {
        status: model.status.parse()?,
        queued_at: parse_timestamp(&model.queued_at)?,
        started_at: parse_optional_timestamp(model.started_at.as_deref())?,
        completed_at: parse_optional_timestamp(model.completed_at.as_deref())?,
        id: model.id,
        device_id: model.device_id,
        change_id: model.change_id,
        error: model.error,
    })
}

#[derive(Debug, FromQueryResult)]
struct StatusCountRow {
    device_id: String,
    status: String,
    count: i64,
}

#[async_trait]
impl QueueEntryRepository for SeaOrmQueueEntryRepository {
    async fn insert_queued(
        &self,
        device_id: &str,
        change_id: &str,
    ) -> Result<QueueEntry, DomainError> {
        let entry = ActiveModel {
            device_id: Set(device_id.to_string()),
            change_id: Set(change_id.to_string()),
            status: Set(QueueStatus::Queued.as_str().to_string()),
            queued_at: Set(format_timestamp(Utc::now())),
            started_at: Set(None),
            completed_at: Set(None),
            error: Set(None),
            ..Default::default()
        };

        let result = entry.insert(&self.db).await?;
        to_domain(result)
    }

    async fn next_queued(&self, device_id: &str) -> Result<Option<QueueEntry>, DomainError> {
        QueueEntity::find()
            .filter(Column::DeviceId.eq(device_id))
            .filter(Column::Status.eq(QueueStatus::Queued.as_str()))
            .order_by_asc(Column::QueuedAt)
            .order_by_asc(Column::Id)
            .one(&self.db)
            .await?
            .map(to_domain)
            .transpose()
    }

    async fn mark_processing(&self, id: i32) -> Result<QueueEntry, DomainError> {
        self.move_entry(
            id,
            QueueStatus::Queued,
            QueueStatus::Processing,
            Column::StartedAt,
            None,
        )
        .await
    }

    async fn mark_finished(
        &self,
        id: i32,
        success: bool,
        error: Option<String>,
    ) -> Result<QueueEntry, DomainError> {
        let to = if success {
            QueueStatus::Completed
        } else {
            QueueStatus::Failed
        };
        self.move_entry(id, QueueStatus::Processing, to, Column::CompletedAt, error)
            .await
    }

    async fn fail_queued(&self, id: i32, error: &str) -> Result<(), DomainError> {
        self.move_entry(
            id,
            QueueStatus::Queued,
            QueueStatus::Failed,
            Column::CompletedAt,
            Some(error.to_string()),
        )
        .await?;
        Ok(())
    }

    async fn fail_unfinished(&self, error: &str) -> Result<u64, DomainError> {
        let result = QueueEntity::update_many()
            .col_expr(Column::Status, Expr::value(QueueStatus::Failed.as_str()))
            .col_expr(
                Column::CompletedAt,
                Expr::value(format_timestamp(Utc::now())),
            )
            .col_expr(Column::Error, Expr::value(error))
            .filter(Column::Status.is_in(UNFINISHED))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }

    async fn find_all(&self, filter: QueueEntryFilter) -> Result<Vec<QueueEntry>, DomainError> {
        let mut condition = Condition::all();

        if let Some(device_id) = filter.device_id {
            condition = condition.add(Column::DeviceId.eq(device_id));
        }

        if let Some(change_id) = filter.change_id {
            condition = condition.add(Column::ChangeId.eq(change_id));
        }

        QueueEntity::find()
            .filter(condition)
            .order_by_asc(Column::QueuedAt)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_domain)
            .collect()
    }

    async fn count_unfinished(&self, device_id: &str) -> Result<u64, DomainError> {
        let count = QueueEntity::find()
            .filter(Column::DeviceId.eq(device_id))
            .filter(Column::Status.is_in(UNFINISHED))
            .count(&self.db)
            .await?;
        Ok(count)
    }

    async fn unfinished_counts(&self) -> Result<Vec<DeviceStatusCount>, DomainError> {
        let rows = QueueEntity::find()
            .select_only()
            .column(Column::DeviceId)
            .column(Column::Status)
            .column_as(Expr::col(Column::Id).count(), "count")
            .filter(Column::Status.is_in(UNFINISHED))
            .group_by(Column::DeviceId)
            .group_by(Column::Status)
            .order_by_asc(Column::DeviceId)
            .into_model::<StatusCountRow>()
            .all(&self.db)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DeviceStatusCount {
                    status: row.status.parse()?,
                    device_id: row.device_id,
                    count: row.count.max(0) as u64,
                })
            })
            .collect()
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError> {
        let result = QueueEntity::delete_many()
            .filter(Column::Status.is_in(FINISHED))
            .filter(Column::CompletedAt.lt(format_timestamp(cutoff)))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
