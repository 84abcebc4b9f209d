use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

/// Remediation action, typically raised out of an audit finding.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActionItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub audit_id: Option<Uuid>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for ActionItem {
    fn entity_type() -> &'static str {
        "action"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbActionItem {
    pub id: String,
    pub tenant_id: String,
    pub audit_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub owner: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbActionItem> for ActionItem {
    type Error = AppError;

    fn try_from(value: DbActionItem) -> Result<Self, Self::Error> {
        Ok(ActionItem {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("malformed action id: {err}")))?,
            tenant_id: Uuid::parse_str(&value.tenant_id)
                .map_err(|err| AppError::internal(format!("malformed tenant id: {err}")))?,
            audit_id: value.audit_id.as_deref().and_then(|id| Uuid::parse_str(id).ok()),
            title: value.title,
            description: value.description,
            status: value.status,
            owner: value.owner,
            due_date: value.due_date,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ActionCreateRequest {
    #[schema(example = "Rotate shared service credentials")]
    pub title: String,
    pub description: Option<String>,
    #[schema(example = "open")]
    pub status: Option<String>,
    pub owner: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub audit_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ActionUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub audit_id: Option<Uuid>,
}
