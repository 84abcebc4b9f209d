use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

use super::comment::{parse_comments, Comment};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SecurityControl {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Framework reference, e.g. "AC-2" or "ISO-A.5.1".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub review_date: Option<DateTime<Utc>>,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for SecurityControl {
    fn entity_type() -> &'static str {
        "security_control"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSecurityControl {
    pub id: String,
    pub tenant_id: String,
    pub code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub domain: Option<String>,
    pub status: String,
    pub owner: Option<String>,
    pub review_date: Option<DateTime<Utc>>,
    pub comments: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbSecurityControl> for SecurityControl {
    type Error = AppError;

    fn try_from(value: DbSecurityControl) -> Result<Self, Self::Error> {
        Ok(SecurityControl {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("malformed control id: {err}")))?,
            tenant_id: Uuid::parse_str(&value.tenant_id)
                .map_err(|err| AppError::internal(format!("malformed tenant id: {err}")))?,
            code: value.code,
            name: value.name,
            description: value.description,
            domain: value.domain,
            status: value.status,
            owner: value.owner,
            review_date: value.review_date,
            comments: parse_comments(&value.comments),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ControlCreateRequest {
    pub code: Option<String>,
    #[schema(example = "Access provisioning reviews")]
    pub name: String,
    pub description: Option<String>,
    pub domain: Option<String>,
    #[schema(example = "draft")]
    pub status: Option<String>,
    pub owner: Option<String>,
    pub review_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ControlUpdateRequest {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub domain: Option<String>,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub review_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ControlStatusRequest {
    #[schema(example = "implemented")]
    pub status: String,
}
