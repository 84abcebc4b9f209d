//! RBAC administration: roles, per-module capability rows, user-role
//! assignments, and the combined roles-and-permissions answer the client
//! fetches once after login.
//!
//! Every mutation here invalidates the affected permission-store entries
//! before the response is sent, and is logged at Critical severity.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::layer::CurrentSession;
use crate::authz::{modules, Action, ActionGate};
use crate::envelope::ApiResponse;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::models::rbac::{
    AssignRoleRequest, DbRole, ModulePermissions, PermissionChange, PermissionCheckResponse, Role,
    RoleCreateRequest, RolePermissionsUpdateRequest, RoleUpdateRequest, UserPermissionsResponse, UserRole,
};
use crate::utils::utc_now;

const ROLE_COLUMNS: &str =
    "id, tenant_id, role_name, role_description, is_system_role, is_active, created_at, updated_at";

// =============================================================================
// ROLES
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/roles",
    tag = "RBAC",
    responses((status = 200, description = "List active roles", body = Vec<Role>)),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<ApiResponse<Vec<Role>>>> {
    let sql = format!(
        "SELECT {ROLE_COLUMNS} FROM roles WHERE tenant_id = ? AND is_active = 1 ORDER BY role_name"
    );
    let roles = sqlx::query_as::<_, DbRole>(&sql)
        .bind(session.tenant_id.to_string())
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(Role::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ApiResponse::ok(roles)))
}

#[utoipa::path(
    post,
    path = "/api/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 403, description = "Missing roles.create capability"),
        (status = 409, description = "Role name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(payload): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Role>>)> {
    ActionGate::new(modules::ROLES, Action::Create)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM roles WHERE tenant_id = ? AND lower(role_name) = lower(?)",
    )
    .bind(session.tenant_id.to_string())
    .bind(payload.role_name.trim())
    .fetch_one(&state.pool)
    .await?;
    if existing > 0 {
        return Err(AppError::conflict("role name already exists"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO roles (id, tenant_id, role_name, role_description, is_system_role, is_active, created_by, created_at, updated_at) \
         VALUES (?, ?, ?, ?, 0, 1, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .bind(payload.role_name.trim())
    .bind(&payload.role_description)
    .bind(session.user_id.to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let role = fetch_role(&state.pool, session.tenant_id, id).await?;
    log_activity(&state.event_bus, "created", Some(session.user_id), &role);

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(role))))
}

#[utoipa::path(
    get,
    path = "/api/roles/{id}",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role with its capability rows"),
        (status = 404, description = "Role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let role = fetch_role(&state.pool, session.tenant_id, id).await?;
    let permissions = fetch_role_permissions(&state.pool, session.tenant_id, id).await?;

    let body = serde_json::json!({
        "role": role,
        "permissions": permissions,
    });
    Ok(Json(ApiResponse::ok(body)))
}

#[utoipa::path(
    put,
    path = "/api/roles/{id}",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Role ID")),
    request_body = RoleUpdateRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 403, description = "Missing roles.update capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<RoleUpdateRequest>,
) -> AppResult<Json<ApiResponse<Role>>> {
    ActionGate::new(modules::ROLES, Action::Update)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let previous = fetch_role(&state.pool, session.tenant_id, id).await?;
    if previous.is_system_role {
        return Err(AppError::bad_request("system roles cannot be modified"));
    }

    let role_name = payload.role_name.unwrap_or_else(|| previous.role_name.clone());
    let role_description = payload.role_description.or_else(|| previous.role_description.clone());
    let is_active = payload.is_active.unwrap_or(previous.is_active);

    sqlx::query(
        "UPDATE roles SET role_name = ?, role_description = ?, is_active = ?, updated_at = ? \
         WHERE id = ? AND tenant_id = ?",
    )
    .bind(role_name.trim())
    .bind(&role_description)
    .bind(is_active)
    .bind(utc_now())
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .execute(&state.pool)
    .await?;

    // Deactivating a role changes every holder's effective map.
    state.permissions.invalidate_tenant(session.tenant_id);

    let role = fetch_role(&state.pool, session.tenant_id, id).await?;
    log_activity(&state.event_bus, "updated", Some(session.user_id), &role);

    Ok(Json(ApiResponse::ok(role)))
}

// =============================================================================
// CAPABILITY ROWS
// =============================================================================

#[utoipa::path(
    put,
    path = "/api/roles/{id}/permissions",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Role ID")),
    request_body = RolePermissionsUpdateRequest,
    responses(
        (status = 200, description = "Capability row upserted", body = Vec<ModulePermissions>),
        (status = 403, description = "Missing roles.update capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role_permissions(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
    Json(raw): Json<serde_json::Value>,
) -> AppResult<Json<ApiResponse<Vec<ModulePermissions>>>> {
    ActionGate::new(modules::ROLES, Action::Update)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    // Deserialize by hand for a path-qualified error on malformed payloads.
    let payload: RolePermissionsUpdateRequest = serde_path_to_error::deserialize(raw)
        .map_err(|err| AppError::bad_request(format!("invalid permissions payload: {err}")))?;

    let role = fetch_role(&state.pool, session.tenant_id, id).await?;
    let module_name = payload.module_name.trim().to_lowercase();
    let caps = payload.permissions;
    let now = utc_now();

    sqlx::query(
        "INSERT INTO permissions \
         (id, tenant_id, role_id, module_name, can_create, can_retrieve, can_update, can_delete, can_comment, can_create_task, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (role_id, module_name, tenant_id) DO UPDATE SET \
           can_create = excluded.can_create, \
           can_retrieve = excluded.can_retrieve, \
           can_update = excluded.can_update, \
           can_delete = excluded.can_delete, \
           can_comment = excluded.can_comment, \
           can_create_task = excluded.can_create_task, \
           updated_at = excluded.updated_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(session.tenant_id.to_string())
    .bind(id.to_string())
    .bind(&module_name)
    .bind(caps.can_create)
    .bind(caps.can_retrieve)
    .bind(caps.can_update)
    .bind(caps.can_delete)
    .bind(caps.can_comment)
    .bind(caps.can_create_task)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    // Every user holding this role is stale now.
    state.permissions.invalidate_tenant(session.tenant_id);

    log_activity(
        &state.event_bus,
        "updated",
        Some(session.user_id),
        &PermissionChange {
            role_id: role.id,
            module_name,
            capabilities: caps,
        },
    );

    let permissions = fetch_role_permissions(&state.pool, session.tenant_id, id).await?;
    Ok(Json(ApiResponse::ok(permissions)))
}

// =============================================================================
// USER-ROLE ASSIGNMENTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/users/{id}/roles",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "User ID")),
    responses((status = 200, description = "Role assignments", body = Vec<UserRole>)),
    security(("bearerAuth" = []))
)]
pub async fn get_user_roles(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<UserRole>>>> {
    ensure_can_inspect(&state, &session, user_id).await?;

    let rows = sqlx::query_as::<_, (String, String, Option<String>, chrono::DateTime<chrono::Utc>)>(
        "SELECT ur.role_id, r.role_name, ur.assigned_by, ur.created_at \
         FROM user_roles ur JOIN roles r ON r.id = ur.role_id \
         WHERE ur.user_id = ? AND ur.tenant_id = ?",
    )
    .bind(user_id.to_string())
    .bind(session.tenant_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let assignments = rows
        .into_iter()
        .map(|(role_id, role_name, assigned_by, created_at)| {
            Ok(UserRole {
                user_id,
                role_id: Uuid::parse_str(&role_id)
                    .map_err(|err| AppError::internal(format!("malformed role id: {err}")))?,
                role_name,
                assigned_by: assigned_by.as_deref().and_then(|id| Uuid::parse_str(id).ok()),
                created_at,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Json(ApiResponse::ok(assignments)))
}

#[utoipa::path(
    post,
    path = "/api/users/{id}/roles",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Role assigned"),
        (status = 403, description = "Missing roles.update capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_role(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<AssignRoleRequest>,
) -> AppResult<Json<ApiResponse<UserRole>>> {
    ActionGate::new(modules::ROLES, Action::Update)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let role = fetch_role(&state.pool, session.tenant_id, payload.role_id).await?;

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM user_roles WHERE user_id = ? AND role_id = ? AND tenant_id = ?",
    )
    .bind(user_id.to_string())
    .bind(payload.role_id.to_string())
    .bind(session.tenant_id.to_string())
    .fetch_one(&state.pool)
    .await?;

    let now = utc_now();
    if existing == 0 {
        sqlx::query(
            "INSERT INTO user_roles (id, tenant_id, user_id, role_id, assigned_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session.tenant_id.to_string())
        .bind(user_id.to_string())
        .bind(payload.role_id.to_string())
        .bind(session.user_id.to_string())
        .bind(now)
        .execute(&state.pool)
        .await?;
    }

    // The target user's effective map changed.
    state.permissions.invalidate(user_id);

    let assignment = UserRole {
        user_id,
        role_id: role.id,
        role_name: role.role_name.clone(),
        assigned_by: Some(session.user_id),
        created_at: now,
    };
    log_activity(&state.event_bus, "assigned", Some(session.user_id), &assignment);

    Ok(Json(ApiResponse::ok(assignment)))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}/roles/{role_id}",
    tag = "RBAC",
    params(
        ("id" = Uuid, Path, description = "User ID"),
        ("role_id" = Uuid, Path, description = "Role ID")
    ),
    responses(
        (status = 200, description = "Role removed"),
        (status = 403, description = "Missing roles.update capability"),
        (status = 404, description = "Assignment not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn remove_role(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    ActionGate::new(modules::ROLES, Action::Update)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let result = sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ? AND tenant_id = ?")
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .bind(session.tenant_id.to_string())
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("role assignment not found"));
    }

    state.permissions.invalidate(user_id);

    let role = fetch_role(&state.pool, session.tenant_id, role_id).await?;
    let assignment = UserRole {
        user_id,
        role_id,
        role_name: role.role_name,
        assigned_by: None,
        created_at: utc_now(),
    };
    log_activity(&state.event_bus, "revoked", Some(session.user_id), &assignment);

    Ok(Json(ApiResponse::ok(serde_json::json!({ "success": true }))))
}

// =============================================================================
// EFFECTIVE PERMISSIONS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/users/{id}/permissions",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "User ID")),
    responses((status = 200, description = "Roles and merged permission map", body = UserPermissionsResponse)),
    security(("bearerAuth" = []))
)]
pub async fn get_user_permissions(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<UserPermissionsResponse>>> {
    ensure_can_inspect(&state, &session, user_id).await?;

    let user_roles =
        crate::authz::session::load_role_assignments(&state.pool, user_id, session.tenant_id).await?;
    let map = state.permissions.load(user_id, session.tenant_id).await?;

    Ok(Json(ApiResponse::ok(UserPermissionsResponse {
        user_roles,
        permissions: (*map).clone(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct PermissionCheckQuery {
    pub module: String,
    pub action: String,
}

#[utoipa::path(
    get,
    path = "/api/permissions/check",
    tag = "RBAC",
    params(
        ("module" = String, Query, description = "Module name"),
        ("action" = String, Query, description = "create|retrieve|update|delete|comment|create_task")
    ),
    responses((status = 200, description = "Capability answer", body = PermissionCheckResponse)),
    security(("bearerAuth" = []))
)]
pub async fn check_permission(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<PermissionCheckQuery>,
) -> AppResult<Json<ApiResponse<PermissionCheckResponse>>> {
    let has_permission = if crate::authz::evaluator::is_privileged(&session) {
        true
    } else {
        let map = state.permissions.load(session.user_id, session.tenant_id).await?;
        map.has_permission_str(&query.module, &query.action)
    };

    Ok(Json(ApiResponse::ok(PermissionCheckResponse { has_permission })))
}

// =============================================================================
// HELPERS
// =============================================================================

/// Users may always inspect their own roles/permissions; anybody else needs
/// roles.retrieve (or privilege, which the gate already honors).
async fn ensure_can_inspect(
    state: &AppState,
    session: &crate::authz::Session,
    target: Uuid,
) -> AppResult<()> {
    if session.user_id == target {
        return Ok(());
    }
    ActionGate::new(modules::ROLES, Action::Retrieve)
        .authorize(&state.permissions, session, state.authz_mode)
        .await
}

async fn fetch_role(pool: &SqlitePool, tenant_id: Uuid, id: Uuid) -> AppResult<Role> {
    let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ? AND tenant_id = ?");
    let row = sqlx::query_as::<_, DbRole>(&sql)
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))?;

    row.try_into()
}

async fn fetch_role_permissions(
    pool: &SqlitePool,
    tenant_id: Uuid,
    role_id: Uuid,
) -> AppResult<Vec<ModulePermissions>> {
    let rows = sqlx::query_as::<_, (String, bool, bool, bool, bool, bool, bool)>(
        "SELECT module_name, can_create, can_retrieve, can_update, can_delete, can_comment, can_create_task \
         FROM permissions WHERE role_id = ? AND tenant_id = ? ORDER BY module_name",
    )
    .bind(role_id.to_string())
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(module_name, can_create, can_retrieve, can_update, can_delete, can_comment, can_create_task)| {
                ModulePermissions {
                    module_name,
                    capabilities: crate::authz::Capabilities {
                        can_create,
                        can_retrieve,
                        can_update,
                        can_delete,
                        can_comment,
                        can_create_task,
                    },
                }
            },
        )
        .collect())
}
