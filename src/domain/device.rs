//! Device directory entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    /// Host name or IP the execution connector talks to
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertDeviceInput {
    pub id: String,
    pub name: Option<String>,
    pub address: String,
}

impl UpsertDeviceInput {
    pub fn validate(mut self) -> Result<Self, DomainError> {
        self.id = self.id.trim().to_string();
        self.address = self.address.trim().to_string();
        if self.id.is_empty() {
            return Err(DomainError::Validation("device id is required".to_string()));
        }
        if self.address.is_empty() {
            return Err(DomainError::Validation(
                "device address is required".to_string(),
            ));
        }
        Ok(self)
    }
}
