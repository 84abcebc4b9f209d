use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{Capabilities, PermissionMap, RoleAssignment};
use crate::errors::AppError;
use crate::events::{Loggable, Severity};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub role_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_description: Option<String>,
    pub is_system_role: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str {
        "role"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbRole {
    pub id: String,
    pub tenant_id: String,
    pub role_name: String,
    pub role_description: Option<String>,
    pub is_system_role: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbRole> for Role {
    type Error = AppError;

    fn try_from(value: DbRole) -> Result<Self, Self::Error> {
        Ok(Role {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("malformed role id: {err}")))?,
            tenant_id: Uuid::parse_str(&value.tenant_id)
                .map_err(|err| AppError::internal(format!("malformed tenant id: {err}")))?,
            role_name: value.role_name,
            role_description: value.role_description,
            is_system_role: value.is_system_role,
            is_active: value.is_active,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "Compliance Manager")]
    pub role_name: String,
    #[schema(example = "Owns the control catalogue")]
    pub role_description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleUpdateRequest {
    pub role_name: Option<String>,
    pub role_description: Option<String>,
    pub is_active: Option<bool>,
}

// =============================================================================
// PERMISSION RECORDS (per role, per module)
// =============================================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModulePermissions {
    pub module_name: String,
    #[serde(flatten)]
    pub capabilities: Capabilities,
}

/// Upsert payload for one (role, module) capability row. Missing flags
/// default to false.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RolePermissionsUpdateRequest {
    #[schema(example = "security_controls")]
    pub module_name: String,
    pub permissions: Capabilities,
}

/// Marker used for activity logging of permission-row changes.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionChange {
    pub role_id: Uuid,
    pub module_name: String,
    pub capabilities: Capabilities,
}

impl Loggable for PermissionChange {
    fn entity_type() -> &'static str {
        "permission"
    }
    fn subject_id(&self) -> Uuid {
        self.role_id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserRole {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub role_name: String,
    pub assigned_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Loggable for UserRole {
    fn entity_type() -> &'static str {
        "user_role"
    }
    fn subject_id(&self) -> Uuid {
        self.user_id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

/// Combined roles-and-permissions answer fetched once after login.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserPermissionsResponse {
    pub user_roles: Vec<RoleAssignment>,
    /// Module name -> merged capability flags.
    #[schema(value_type = Object)]
    pub permissions: PermissionMap,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PermissionCheckResponse {
    pub has_permission: bool,
}
