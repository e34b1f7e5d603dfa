//! SeaORM implementation of DeviceRepository

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};

use super::{format_timestamp, parse_timestamp};
use crate::domain::{Device, DeviceRepository, DomainError, UpsertDeviceInput};
use crate::models::device::{ActiveModel, Column, Entity as DeviceEntity, Model};

/// SeaORM-based implementation of DeviceRepository
pub struct SeaOrmDeviceRepository {
    db: DatabaseConnection,
}

impl SeaOrmDeviceRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_domain(model: Model) -> Result<Device, DomainError> {
    Ok(Device {
        created_at: parse_timestamp(&model.created_at)?,
        updated_at: parse_timestamp(&model.updated_at)?,
        id: model.id,
        name: model.name,
        address: model.address,
    })
}

#[async_trait]
impl DeviceRepository for SeaOrmDeviceRepository {
    async fn find_all(&self) -> Result<Vec<Device>, DomainError> {
        DeviceEntity::find()
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_domain)
            .collect()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Device>, DomainError> {
        DeviceEntity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .map(to_domain)
            .transpose()
    }

    async fn upsert(&self, input: UpsertDeviceInput) -> Result<Device, DomainError> {
        let now = format_timestamp(Utc::now());

        let existing = DeviceEntity::find_by_id(input.id.clone())
            .one(&self.db)
            .await?;

        let result = match existing {
            Some(existing) => {
                let mut active: ActiveModel = existing.into();
                if let Some(name) = input.name {
                    active.name = Set(name);
                }
                active.address = Set(input.address);
                active.updated_at = Set(now);
                active.update(&self.db).await?
            }
            None => {
                let device = ActiveModel {
                    name: Set(input.name.unwrap_or_else(|| input.id.clone())),
                    id: Set(input.id),
                    address: Set(input.address),
                    created_at: Set(now.clone()),
                    updated_at: Set(now),
                };
                device.insert(&self.db).await?
            }
        };

        to_domain(result)
    }
}
