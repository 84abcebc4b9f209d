use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

use super::comment::{parse_comments, Comment};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Security control this task remediates, if any.
    pub control_id: Option<Uuid>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for Task {
    fn entity_type() -> &'static str {
        "task"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTask {
    pub id: String,
    pub tenant_id: String,
    pub control_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub comments: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbTask> for Task {
    type Error = AppError;

    fn try_from(value: DbTask) -> Result<Self, Self::Error> {
        Ok(Task {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("malformed task id: {err}")))?,
            tenant_id: Uuid::parse_str(&value.tenant_id)
                .map_err(|err| AppError::internal(format!("malformed tenant id: {err}")))?,
            control_id: value.control_id.as_deref().and_then(|id| Uuid::parse_str(id).ok()),
            title: value.title,
            description: value.description,
            status: value.status,
            priority: value.priority,
            assignee: value.assignee,
            due_date: value.due_date,
            comments: parse_comments(&value.comments),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCreateRequest {
    #[schema(example = "Collect evidence for AC-2 review")]
    pub title: String,
    pub description: Option<String>,
    #[schema(example = "open")]
    pub status: Option<String>,
    #[schema(example = "high")]
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub control_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub control_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskListQuery {
    pub control_id: Option<Uuid>,
    pub status: Option<String>,
}
