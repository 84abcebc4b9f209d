use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::layer::CurrentSession;
use crate::authz::{modules, Action, ActionGate};
use crate::envelope::ApiResponse;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, log_activity_with_previous};
use crate::models::comment::{comments_to_json, parse_comments, sort_comments_desc, Comment, CommentRequest};
use crate::models::control::{
    ControlCreateRequest, ControlStatusRequest, ControlUpdateRequest,
    DbSecurityControl, SecurityControl,
};
use crate::utils::utc_now;

const CONTROL_COLUMNS: &str = "id, tenant_id, code, name, description, domain, status, owner, \
                               review_date, comments, created_at, updated_at, deleted_at";

#[utoipa::path(
    get,
    path = "/api/security-controls",
    tag = "Security Controls",
    responses((status = 200, description = "List security controls", body = Vec<SecurityControl>)),
    security(("bearerAuth" = []))
)]
pub async fn list_controls(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<ApiResponse<Vec<SecurityControl>>>> {
    let sql = format!(
        "SELECT {CONTROL_COLUMNS} FROM security_controls \
         WHERE tenant_id = ? AND deleted_at IS NULL ORDER BY created_at DESC"
    );
    let rows = sqlx::query_as::<_, DbSecurityControl>(&sql)
        .bind(session.tenant_id.to_string())
        .fetch_all(&state.pool)
        .await?;

    let controls = rows
        .into_iter()
        .map(SecurityControl::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ApiResponse::ok(controls)))
}

#[utoipa::path(
    post,
    path = "/api/security-controls",
    tag = "Security Controls",
    request_body = ControlCreateRequest,
    responses(
        (status = 201, description = "Control created", body = SecurityControl),
        (status = 403, description = "Missing security_controls.create capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_control(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(payload): Json<ControlCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<SecurityControl>>)> {
    ActionGate::new(modules::SECURITY_CONTROLS, Action::Create)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO security_controls \
         (id, tenant_id, code, name, description, domain, status, owner, review_date, comments, created_by, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, '[]', ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .bind(&payload.code)
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(&payload.domain)
    .bind(payload.status.as_deref().unwrap_or("draft"))
    .bind(&payload.owner)
    .bind(payload.review_date)
    .bind(session.user_id.to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let control = fetch_control(&state.pool, session.tenant_id, id).await?;
    log_activity(&state.event_bus, "created", Some(session.user_id), &control);

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(control))))
}

#[utoipa::path(
    get,
    path = "/api/security-controls/{id}",
    tag = "Security Controls",
    params(("id" = Uuid, Path, description = "Control ID")),
    responses(
        (status = 200, description = "Control detail", body = SecurityControl),
        (status = 404, description = "Control not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_control(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<SecurityControl>>> {
    let control = fetch_control(&state.pool, session.tenant_id, id).await?;
    Ok(Json(ApiResponse::ok(control)))
}

#[utoipa::path(
    put,
    path = "/api/security-controls/{id}",
    tag = "Security Controls",
    params(("id" = Uuid, Path, description = "Control ID")),
    request_body = ControlUpdateRequest,
    responses(
        (status = 200, description = "Control updated", body = SecurityControl),
        (status = 403, description = "Missing security_controls.update capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_control(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<ControlUpdateRequest>,
) -> AppResult<Json<ApiResponse<SecurityControl>>> {
    ActionGate::new(modules::SECURITY_CONTROLS, Action::Update)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let previous = fetch_control(&state.pool, session.tenant_id, id).await?;

    let name = payload.name.unwrap_or_else(|| previous.name.clone());
    let code = payload.code.or_else(|| previous.code.clone());
    let description = payload.description.or_else(|| previous.description.clone());
    let domain = payload.domain.or_else(|| previous.domain.clone());
    let status = payload.status.unwrap_or_else(|| previous.status.clone());
    let owner = payload.owner.or_else(|| previous.owner.clone());
    let review_date = payload.review_date.or(previous.review_date);

    sqlx::query(
        "UPDATE security_controls SET code = ?, name = ?, description = ?, domain = ?, \
         status = ?, owner = ?, review_date = ?, updated_at = ? \
         WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
    )
    .bind(&code)
    .bind(&name)
    .bind(&description)
    .bind(&domain)
    .bind(&status)
    .bind(&owner)
    .bind(review_date)
    .bind(utc_now())
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .execute(&state.pool)
    .await?;

    let control = fetch_control(&state.pool, session.tenant_id, id).await?;
    log_activity_with_previous(
        &state.event_bus,
        "updated",
        Some(session.user_id),
        &control,
        Some(&previous),
    );

    Ok(Json(ApiResponse::ok(control)))
}

#[utoipa::path(
    delete,
    path = "/api/security-controls/{id}",
    tag = "Security Controls",
    params(("id" = Uuid, Path, description = "Control ID")),
    responses(
        (status = 200, description = "Control soft deleted"),
        (status = 403, description = "Missing security_controls.delete capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_control(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<SecurityControl>>> {
    ActionGate::new(modules::SECURITY_CONTROLS, Action::Delete)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let control = fetch_control(&state.pool, session.tenant_id, id).await?;

    sqlx::query("UPDATE security_controls SET deleted_at = ? WHERE id = ? AND tenant_id = ?")
        .bind(utc_now())
        .bind(id.to_string())
        .bind(session.tenant_id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity(&state.event_bus, "deleted", Some(session.user_id), &control);

    Ok(Json(ApiResponse::ok(control)))
}

#[utoipa::path(
    patch,
    path = "/api/security-controls/{id}/status",
    tag = "Security Controls",
    params(("id" = Uuid, Path, description = "Control ID")),
    request_body = ControlStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = SecurityControl),
        (status = 403, description = "Missing security_controls.update capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_status(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<ControlStatusRequest>,
) -> AppResult<Json<ApiResponse<SecurityControl>>> {
    ActionGate::new(modules::SECURITY_CONTROLS, Action::Update)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let previous = fetch_control(&state.pool, session.tenant_id, id).await?;

    sqlx::query(
        "UPDATE security_controls SET status = ?, updated_at = ? \
         WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
    )
    .bind(&payload.status)
    .bind(utc_now())
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .execute(&state.pool)
    .await?;

    let control = fetch_control(&state.pool, session.tenant_id, id).await?;
    log_activity_with_previous(
        &state.event_bus,
        "updated",
        Some(session.user_id),
        &control,
        Some(&previous),
    );

    Ok(Json(ApiResponse::ok(control)))
}

#[utoipa::path(
    get,
    path = "/api/security-controls/{id}/comments",
    tag = "Security Controls",
    params(("id" = Uuid, Path, description = "Control ID")),
    responses((status = 200, description = "Comments, newest first", body = Vec<Comment>)),
    security(("bearerAuth" = []))
)]
pub async fn get_comments(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<Comment>>>> {
    let control = fetch_control(&state.pool, session.tenant_id, id).await?;
    let mut comments = control.comments;
    sort_comments_desc(&mut comments);
    Ok(Json(ApiResponse::ok(comments)))
}

#[utoipa::path(
    post,
    path = "/api/security-controls/{id}/comments",
    tag = "Security Controls",
    params(("id" = Uuid, Path, description = "Control ID")),
    request_body = CommentRequest,
    responses(
        (status = 200, description = "Comment appended", body = Vec<Comment>),
        (status = 403, description = "Missing security_controls.comment capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn add_comment(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<CommentRequest>,
) -> AppResult<Json<ApiResponse<Vec<Comment>>>> {
    ActionGate::new(modules::SECURITY_CONTROLS, Action::Comment)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let raw: Option<String> = sqlx::query_scalar(
        "SELECT comments FROM security_controls WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
    )
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .fetch_optional(&state.pool)
    .await?;

    let raw = raw.ok_or_else(|| AppError::not_found("control not found"))?;
    let mut comments = parse_comments(&raw);
    comments.push(payload.comment);

    // Adding a comment counts as touching the review trail.
    sqlx::query(
        "UPDATE security_controls SET comments = ?, review_date = ?, updated_at = ? \
         WHERE id = ? AND tenant_id = ?",
    )
    .bind(comments_to_json(&comments))
    .bind(utc_now())
    .bind(utc_now())
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .execute(&state.pool)
    .await?;

    let control = fetch_control(&state.pool, session.tenant_id, id).await?;
    log_activity(&state.event_bus, "commented", Some(session.user_id), &control);

    sort_comments_desc(&mut comments);
    Ok(Json(ApiResponse::ok(comments)))
}

async fn fetch_control(pool: &SqlitePool, tenant_id: Uuid, id: Uuid) -> AppResult<SecurityControl> {
    let sql = format!(
        "SELECT {CONTROL_COLUMNS} FROM security_controls \
         WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL"
    );
    let row = sqlx::query_as::<_, DbSecurityControl>(&sql)
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("control not found"))?;

    row.try_into()
}
