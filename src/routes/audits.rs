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
use crate::models::audit::{Audit, AuditCreateRequest, AuditUpdateRequest, DbAudit};
use crate::models::comment::{comments_to_json, parse_comments, sort_comments_desc, Comment, CommentRequest};
use crate::utils::utc_now;

const AUDIT_COLUMNS: &str = "id, tenant_id, name, audit_type, status, lead_auditor, \
                             start_date, end_date, comments, created_at, updated_at, deleted_at";

#[utoipa::path(
    get,
    path = "/api/audits",
    tag = "Audits",
    responses((status = 200, description = "List audits", body = Vec<Audit>)),
    security(("bearerAuth" = []))
)]
pub async fn list_audits(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<ApiResponse<Vec<Audit>>>> {
    let sql = format!(
        "SELECT {AUDIT_COLUMNS} FROM audits WHERE tenant_id = ? AND deleted_at IS NULL ORDER BY created_at DESC"
    );
    let audits = sqlx::query_as::<_, DbAudit>(&sql)
        .bind(session.tenant_id.to_string())
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(Audit::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ApiResponse::ok(audits)))
}

#[utoipa::path(
    post,
    path = "/api/audits",
    tag = "Audits",
    request_body = AuditCreateRequest,
    responses(
        (status = 201, description = "Audit created", body = Audit),
        (status = 403, description = "Missing audits.create capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_audit(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(payload): Json<AuditCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Audit>>)> {
    ActionGate::new(modules::AUDITS, Action::Create)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO audits \
         (id, tenant_id, name, audit_type, status, lead_auditor, start_date, end_date, comments, created_by, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, '[]', ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .bind(&payload.name)
    .bind(&payload.audit_type)
    .bind(payload.status.as_deref().unwrap_or("planned"))
    .bind(&payload.lead_auditor)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(session.user_id.to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let audit = fetch_audit(&state.pool, session.tenant_id, id).await?;
    log_activity(&state.event_bus, "created", Some(session.user_id), &audit);

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(audit))))
}

#[utoipa::path(
    get,
    path = "/api/audits/{id}",
    tag = "Audits",
    params(("id" = Uuid, Path, description = "Audit ID")),
    responses(
        (status = 200, description = "Audit detail", body = Audit),
        (status = 404, description = "Audit not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_audit(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Audit>>> {
    let audit = fetch_audit(&state.pool, session.tenant_id, id).await?;
    Ok(Json(ApiResponse::ok(audit)))
}

#[utoipa::path(
    put,
    path = "/api/audits/{id}",
    tag = "Audits",
    params(("id" = Uuid, Path, description = "Audit ID")),
    request_body = AuditUpdateRequest,
    responses(
        (status = 200, description = "Audit updated", body = Audit),
        (status = 403, description = "Missing audits.update capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_audit(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<AuditUpdateRequest>,
) -> AppResult<Json<ApiResponse<Audit>>> {
    ActionGate::new(modules::AUDITS, Action::Update)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let previous = fetch_audit(&state.pool, session.tenant_id, id).await?;

    let name = payload.name.unwrap_or_else(|| previous.name.clone());
    let audit_type = payload.audit_type.or_else(|| previous.audit_type.clone());
    let status = payload.status.unwrap_or_else(|| previous.status.clone());
    let lead_auditor = payload.lead_auditor.or_else(|| previous.lead_auditor.clone());
    let start_date = payload.start_date.or(previous.start_date);
    let end_date = payload.end_date.or(previous.end_date);

    sqlx::query(
        "UPDATE audits SET name = ?, audit_type = ?, status = ?, lead_auditor = ?, \
         start_date = ?, end_date = ?, updated_at = ? \
         WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
    )
    .bind(&name)
    .bind(&audit_type)
    .bind(&status)
    .bind(&lead_auditor)
    .bind(start_date)
    .bind(end_date)
    .bind(utc_now())
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .execute(&state.pool)
    .await?;

    let audit = fetch_audit(&state.pool, session.tenant_id, id).await?;
    log_activity_with_previous(&state.event_bus, "updated", Some(session.user_id), &audit, Some(&previous));

    Ok(Json(ApiResponse::ok(audit)))
}

#[utoipa::path(
    delete,
    path = "/api/audits/{id}",
    tag = "Audits",
    params(("id" = Uuid, Path, description = "Audit ID")),
    responses(
        (status = 200, description = "Audit soft deleted"),
        (status = 403, description = "Missing audits.delete capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_audit(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Audit>>> {
    ActionGate::new(modules::AUDITS, Action::Delete)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let audit = fetch_audit(&state.pool, session.tenant_id, id).await?;

    sqlx::query("UPDATE audits SET deleted_at = ? WHERE id = ? AND tenant_id = ?")
        .bind(utc_now())
        .bind(id.to_string())
        .bind(session.tenant_id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity(&state.event_bus, "deleted", Some(session.user_id), &audit);

    Ok(Json(ApiResponse::ok(audit)))
}

#[utoipa::path(
    get,
    path = "/api/audits/{id}/comments",
    tag = "Audits",
    params(("id" = Uuid, Path, description = "Audit ID")),
    responses((status = 200, description = "Comments, newest first", body = Vec<Comment>)),
    security(("bearerAuth" = []))
)]
pub async fn get_comments(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<Comment>>>> {
    let audit = fetch_audit(&state.pool, session.tenant_id, id).await?;
    let mut comments = audit.comments;
    sort_comments_desc(&mut comments);
    Ok(Json(ApiResponse::ok(comments)))
}

#[utoipa::path(
    post,
    path = "/api/audits/{id}/comments",
    tag = "Audits",
    params(("id" = Uuid, Path, description = "Audit ID")),
    request_body = CommentRequest,
    responses(
        (status = 200, description = "Comment appended", body = Vec<Comment>),
        (status = 403, description = "Missing audits.comment capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn add_comment(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<CommentRequest>,
) -> AppResult<Json<ApiResponse<Vec<Comment>>>> {
    ActionGate::new(modules::AUDITS, Action::Comment)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let raw: Option<String> =
        sqlx::query_scalar("SELECT comments FROM audits WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL")
            .bind(id.to_string())
            .bind(session.tenant_id.to_string())
            .fetch_optional(&state.pool)
            .await?;

    let raw = raw.ok_or_else(|| AppError::not_found("audit not found"))?;
    let mut comments = parse_comments(&raw);
    comments.push(payload.comment);

    sqlx::query("UPDATE audits SET comments = ?, updated_at = ? WHERE id = ? AND tenant_id = ?")
        .bind(comments_to_json(&comments))
        .bind(utc_now())
        .bind(id.to_string())
        .bind(session.tenant_id.to_string())
        .execute(&state.pool)
        .await?;

    let audit = fetch_audit(&state.pool, session.tenant_id, id).await?;
    log_activity(&state.event_bus, "commented", Some(session.user_id), &audit);

    sort_comments_desc(&mut comments);
    Ok(Json(ApiResponse::ok(comments)))
}

async fn fetch_audit(pool: &SqlitePool, tenant_id: Uuid, id: Uuid) -> AppResult<Audit> {
    let sql = format!("SELECT {AUDIT_COLUMNS} FROM audits WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL");
    let row = sqlx::query_as::<_, DbAudit>(&sql)
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("audit not found"))?;

    row.try_into()
}
