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
use crate::models::action_item::{ActionCreateRequest, ActionItem, ActionUpdateRequest, DbActionItem};
use crate::utils::utc_now;

const ACTION_COLUMNS: &str = "id, tenant_id, audit_id, title, description, status, owner, \
                              due_date, created_at, updated_at, deleted_at";

#[utoipa::path(
    get,
    path = "/api/actions",
    tag = "Actions",
    responses((status = 200, description = "List remediation actions", body = Vec<ActionItem>)),
    security(("bearerAuth" = []))
)]
pub async fn list_actions(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<ApiResponse<Vec<ActionItem>>>> {
    let sql = format!(
        "SELECT {ACTION_COLUMNS} FROM actions WHERE tenant_id = ? AND deleted_at IS NULL ORDER BY created_at DESC"
    );
    let actions = sqlx::query_as::<_, DbActionItem>(&sql)
        .bind(session.tenant_id.to_string())
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(ActionItem::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ApiResponse::ok(actions)))
}

#[utoipa::path(
    post,
    path = "/api/actions",
    tag = "Actions",
    request_body = ActionCreateRequest,
    responses(
        (status = 201, description = "Action created", body = ActionItem),
        (status = 403, description = "Missing actions.create capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_action(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(payload): Json<ActionCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<ActionItem>>)> {
    ActionGate::new(modules::ACTIONS, Action::Create)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO actions \
         (id, tenant_id, audit_id, title, description, status, owner, due_date, created_by, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .bind(payload.audit_id.map(|a| a.to_string()))
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.status.as_deref().unwrap_or("open"))
    .bind(&payload.owner)
    .bind(payload.due_date)
    .bind(session.user_id.to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let action = fetch_action(&state.pool, session.tenant_id, id).await?;
    log_activity(&state.event_bus, "created", Some(session.user_id), &action);

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(action))))
}

#[utoipa::path(
    get,
    path = "/api/actions/{id}",
    tag = "Actions",
    params(("id" = Uuid, Path, description = "Action ID")),
    responses(
        (status = 200, description = "Action detail", body = ActionItem),
        (status = 404, description = "Action not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_action(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ActionItem>>> {
    let action = fetch_action(&state.pool, session.tenant_id, id).await?;
    Ok(Json(ApiResponse::ok(action)))
}

#[utoipa::path(
    put,
    path = "/api/actions/{id}",
    tag = "Actions",
    params(("id" = Uuid, Path, description = "Action ID")),
    request_body = ActionUpdateRequest,
    responses(
        (status = 200, description = "Action updated", body = ActionItem),
        (status = 403, description = "Missing actions.update capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_action(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<ActionUpdateRequest>,
) -> AppResult<Json<ApiResponse<ActionItem>>> {
    ActionGate::new(modules::ACTIONS, Action::Update)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let previous = fetch_action(&state.pool, session.tenant_id, id).await?;

    let title = payload.title.unwrap_or_else(|| previous.title.clone());
    let description = payload.description.or_else(|| previous.description.clone());
    let status = payload.status.unwrap_or_else(|| previous.status.clone());
    let owner = payload.owner.or_else(|| previous.owner.clone());
    let due_date = payload.due_date.or(previous.due_date);
    let audit_id = payload.audit_id.or(previous.audit_id);

    sqlx::query(
        "UPDATE actions SET title = ?, description = ?, status = ?, owner = ?, due_date = ?, \
         audit_id = ?, updated_at = ? WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
    )
    .bind(&title)
    .bind(&description)
    .bind(&status)
    .bind(&owner)
    .bind(due_date)
    .bind(audit_id.map(|a| a.to_string()))
    .bind(utc_now())
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .execute(&state.pool)
    .await?;

    let action = fetch_action(&state.pool, session.tenant_id, id).await?;
    log_activity_with_previous(&state.event_bus, "updated", Some(session.user_id), &action, Some(&previous));

    Ok(Json(ApiResponse::ok(action)))
}

#[utoipa::path(
    delete,
    path = "/api/actions/{id}",
    tag = "Actions",
    params(("id" = Uuid, Path, description = "Action ID")),
    responses(
        (status = 200, description = "Action soft deleted"),
        (status = 403, description = "Missing actions.delete capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_action(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ActionItem>>> {
    ActionGate::new(modules::ACTIONS, Action::Delete)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let action = fetch_action(&state.pool, session.tenant_id, id).await?;

    sqlx::query("UPDATE actions SET deleted_at = ? WHERE id = ? AND tenant_id = ?")
        .bind(utc_now())
        .bind(id.to_string())
        .bind(session.tenant_id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity(&state.event_bus, "deleted", Some(session.user_id), &action);

    Ok(Json(ApiResponse::ok(action)))
}

async fn fetch_action(pool: &SqlitePool, tenant_id: Uuid, id: Uuid) -> AppResult<ActionItem> {
    let sql = format!("SELECT {ACTION_COLUMNS} FROM actions WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL");
    let row = sqlx::query_as::<_, DbActionItem>(&sql)
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("action not found"))?;

    row.try_into()
}
