use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::layer::CurrentSession;
use crate::authz::{modules, Action, ActionGate};
use crate::envelope::ApiResponse;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, log_activity_with_previous};
use crate::models::user::{DbUser, User, UserCreateRequest, UserUpdateRequest};
use crate::utils::{hash_password, utc_now, DEFAULT_PASSWORD};

use super::auth::fetch_user_by_id;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[utoipa::path(
    get,
    path = "/api/users",
    tag = "Users",
    responses((status = 200, description = "List users", body = Vec<User>)),
    security(("bearerAuth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<ApiResponse<Vec<User>>>> {
    let users = sqlx::query_as::<_, DbUser>(
        "SELECT id, tenant_id, email, full_name, password_hash, is_active, first_login, last_login, \
                login_count, created_at, updated_at, deleted_at \
         FROM users WHERE tenant_id = ? AND deleted_at IS NULL ORDER BY lower(email)",
    )
    .bind(session.tenant_id.to_string())
    .fetch_all(&state.pool)
    .await?
    .into_iter()
    .map(User::try_from)
    .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ApiResponse::ok(users)))
}

#[utoipa::path(
    get,
    path = "/api/users/search",
    tag = "Users",
    params(("q" = String, Query, description = "Substring of email or name")),
    responses((status = 200, description = "Matching users", body = Vec<User>)),
    security(("bearerAuth" = []))
)]
pub async fn search_users(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<ApiResponse<Vec<User>>>> {
    let pattern = format!("%{}%", query.q.trim().to_lowercase());
    let users = sqlx::query_as::<_, DbUser>(
        "SELECT id, tenant_id, email, full_name, password_hash, is_active, first_login, last_login, \
                login_count, created_at, updated_at, deleted_at \
         FROM users WHERE tenant_id = ? AND deleted_at IS NULL \
           AND (lower(email) LIKE ? OR lower(full_name) LIKE ?) \
         ORDER BY lower(email) LIMIT 25",
    )
    .bind(session.tenant_id.to_string())
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(&state.pool)
    .await?
    .into_iter()
    .map(User::try_from)
    .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ApiResponse::ok(users)))
}

#[utoipa::path(
    post,
    path = "/api/users",
    tag = "Users",
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 403, description = "Missing users.create capability"),
        (status = 409, description = "Email already in use")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(payload): Json<UserCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<User>>)> {
    ActionGate::new(modules::USERS, Action::Create)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let existing: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE lower(email) = lower(?) AND deleted_at IS NULL")
            .bind(payload.email.trim())
            .fetch_one(&state.pool)
            .await?;
    if existing > 0 {
        return Err(AppError::conflict("email already in use"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    // Accounts without an explicit password start on the provisioning
    // default and get forced through the change-password flow.
    let password = payload.password.as_deref().unwrap_or(DEFAULT_PASSWORD);
    let password_hash = hash_password(password)?;

    sqlx::query(
        "INSERT INTO users (id, tenant_id, email, full_name, password_hash, is_active, login_count, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 1, 0, ?, ?)",
    )
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .bind(payload.email.trim())
    .bind(&payload.full_name)
    .bind(&password_hash)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    if let Some(role_id) = payload.role_id {
        sqlx::query(
            "INSERT INTO user_roles (id, tenant_id, user_id, role_id, assigned_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session.tenant_id.to_string())
        .bind(id.to_string())
        .bind(role_id.to_string())
        .bind(session.user_id.to_string())
        .bind(now)
        .execute(&state.pool)
        .await?;
    }

    let user: User = fetch_user_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::internal("user vanished after insert"))?
        .try_into()?;

    log_activity(&state.event_bus, "created", Some(session.user_id), &user);

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(user))))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User detail", body = User),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    CurrentSession(_session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<User>>> {
    let user: User = fetch_user_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?
        .try_into()?;
    Ok(Json(ApiResponse::ok(user)))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 403, description = "Missing users.update capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<UserUpdateRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    ActionGate::new(modules::USERS, Action::Update)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let previous: User = fetch_user_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?
        .try_into()?;

    let email = payload.email.unwrap_or_else(|| previous.email.clone());
    let full_name = payload.full_name.unwrap_or_else(|| previous.full_name.clone());
    let is_active = payload.is_active.unwrap_or(previous.is_active);

    sqlx::query("UPDATE users SET email = ?, full_name = ?, is_active = ?, updated_at = ? WHERE id = ?")
        .bind(email.trim())
        .bind(&full_name)
        .bind(is_active)
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    // Deactivation must take effect immediately, not at cache expiry.
    if !is_active {
        state.permissions.invalidate(id);
    }

    let user: User = fetch_user_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?
        .try_into()?;

    log_activity_with_previous(&state.event_bus, "updated", Some(session.user_id), &user, Some(&previous));

    Ok(Json(ApiResponse::ok(user)))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User soft deleted"),
        (status = 403, description = "Missing users.delete capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<User>>> {
    ActionGate::new(modules::USERS, Action::Delete)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    if id == session.user_id {
        return Err(AppError::bad_request("you cannot delete your own account"));
    }

    let user: User = fetch_user_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?
        .try_into()?;

    sqlx::query("UPDATE users SET deleted_at = ?, is_active = 0 WHERE id = ?")
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    state.permissions.invalidate(id);

    log_activity(&state.event_bus, "deleted", Some(session.user_id), &user);

    Ok(Json(ApiResponse::ok(user)))
}
