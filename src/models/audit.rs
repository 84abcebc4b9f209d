use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

use super::comment::{parse_comments, Comment};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Audit {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_type: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_auditor: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for Audit {
    fn entity_type() -> &'static str {
        "audit"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAudit {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub audit_type: Option<String>,
    pub status: String,
    pub lead_auditor: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub comments: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbAudit> for Audit {
    type Error = AppError;

    fn try_from(value: DbAudit) -> Result<Self, Self::Error> {
        Ok(Audit {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("malformed audit id: {err}")))?,
            tenant_id: Uuid::parse_str(&value.tenant_id)
                .map_err(|err| AppError::internal(format!("malformed tenant id: {err}")))?,
            name: value.name,
            audit_type: value.audit_type,
            status: value.status,
            lead_auditor: value.lead_auditor,
            start_date: value.start_date,
            end_date: value.end_date,
            comments: parse_comments(&value.comments),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuditCreateRequest {
    #[schema(example = "SOC 2 Type II 2025")]
    pub name: String,
    #[schema(example = "external")]
    pub audit_type: Option<String>,
    #[schema(example = "planned")]
    pub status: Option<String>,
    pub lead_auditor: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuditUpdateRequest {
    pub name: Option<String>,
    pub audit_type: Option<String>,
    pub status: Option<String>,
    pub lead_auditor: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}
