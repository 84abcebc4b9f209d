use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::layer::{requires_password_change, CurrentSession};
use crate::envelope::ApiResponse;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::models::user::{
    AuthResponse, ChangePasswordRequest, CheckPasswordChangeResponse, DbUser, LoginRequest, User,
};
use crate::utils::{hash_password, utc_now, validate_password_strength, verify_password, DEFAULT_PASSWORD};

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    message: String,
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account inactive")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<AuthResponse>>> {
    let db_user = fetch_user_by_email(&state.pool, &payload.email)
        .await?
        .ok_or_else(|| AppError::unauthenticated("invalid credentials"))?;

    if !db_user.is_active {
        return Err(AppError::permission_denied(
            "Your account is inactive. Please contact your administrator.",
        ));
    }

    let Some(password_hash) = db_user.password_hash.clone() else {
        return Err(AppError::bad_request(
            "No password set for this account. Please use SSO login or contact your administrator.",
        ));
    };

    if !verify_password(&payload.password, &password_hash)? {
        return Err(AppError::unauthenticated("invalid credentials"));
    }

    // First-time detection runs against the pre-login values.
    let is_default_password = verify_password(DEFAULT_PASSWORD, &password_hash).unwrap_or(false);
    let requires_change = is_default_password
        || db_user.first_login.is_none()
        || db_user.first_login == db_user.last_login;

    let now = utc_now().to_rfc3339();
    sqlx::query(
        "UPDATE users SET last_login = ?, login_count = login_count + 1, \
         first_login = COALESCE(first_login, ?) WHERE id = ?",
    )
    .bind(&now)
    .bind(&now)
    .bind(&db_user.id)
    .execute(&state.pool)
    .await?;

    let user: User = db_user.try_into()?;
    let tenant_id = user.tenant_id;
    let token = state.jwt.encode(user.id, &user.email, tenant_id)?;

    // A fresh login opens a fresh session: derived caches from any previous
    // session of this user must not carry over.
    state.permissions.invalidate(user.id);

    log_activity(&state.event_bus, "login", Some(user.id), &user);

    Ok(Json(ApiResponse::ok(AuthResponse {
        token,
        user,
        tenant_id,
        requires_password_change: requires_change,
    })))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged")),
    security(("bearerAuth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<ApiResponse<MessageResponse>>> {
    // Tokens are stateless; the contract here is clearing every derived
    // cache before the client redirect completes.
    state.permissions.invalidate(session.user_id);
    state.denial_memo.forget(session.user_id);

    if let Ok(Some(db_user)) = fetch_user_by_id(&state.pool, session.user_id).await {
        if let Ok(user) = User::try_from(db_user) {
            log_activity(&state.event_bus, "logout", Some(session.user_id), &user);
        }
    }

    Ok(Json(ApiResponse::ok(MessageResponse {
        message: "Logged out successfully".to_string(),
    })))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<ApiResponse<User>>> {
    let db_user = fetch_user_by_id(&state.pool, session.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(ApiResponse::ok(db_user.try_into()?)))
}

#[utoipa::path(
    post,
    path = "/api/auth/change-password",
    tag = "Auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Weak password or wrong current password")
    ),
    security(("bearerAuth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<Json<ApiResponse<MessageResponse>>> {
    let db_user = fetch_user_by_id(&state.pool, session.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    let Some(current_hash) = db_user.password_hash.clone() else {
        return Err(AppError::bad_request("No password set for this account"));
    };

    if !verify_password(&payload.current_password, &current_hash)? {
        return Err(AppError::bad_request("Current password is incorrect"));
    }

    validate_password_strength(&payload.new_password)?;

    if verify_password(&payload.new_password, &current_hash)? {
        return Err(AppError::bad_request(
            "New password must be different from current password",
        ));
    }

    let new_hash = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&new_hash)
        .bind(utc_now())
        .bind(&db_user.id)
        .execute(&state.pool)
        .await?;

    // The guard stops probing once the change is recorded.
    state.permissions.set_password_changed(session.user_id, true);

    if let Ok(user) = User::try_from(db_user) {
        log_activity(&state.event_bus, "password_changed", Some(session.user_id), &user);
    }

    Ok(Json(ApiResponse::ok(MessageResponse {
        message: "Password changed successfully".to_string(),
    })))
}

#[utoipa::path(
    get,
    path = "/api/auth/check-password-change",
    tag = "Auth",
    responses((status = 200, description = "Password-change requirement", body = CheckPasswordChangeResponse)),
    security(("bearerAuth" = []))
)]
pub async fn check_password_change(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<ApiResponse<CheckPasswordChangeResponse>>> {
    let requires = requires_password_change(&state.pool, session.user_id).await?;
    Ok(Json(ApiResponse::ok(CheckPasswordChangeResponse {
        requires_password_change: requires,
    })))
}

const USER_COLUMNS: &str = "id, tenant_id, email, full_name, password_hash, is_active, \
                            first_login, last_login, login_count, created_at, updated_at, deleted_at";

async fn fetch_user_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<DbUser>> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower(?) AND deleted_at IS NULL"
    );
    Ok(sqlx::query_as::<_, DbUser>(&sql)
        .bind(email.trim())
        .fetch_optional(pool)
        .await?)
}

pub(crate) async fn fetch_user_by_id(pool: &SqlitePool, user_id: Uuid) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ? AND deleted_at IS NULL");
    Ok(sqlx::query_as::<_, DbUser>(&sql)
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?)
}
