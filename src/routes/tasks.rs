use axum::extract::{Path, Query, State};
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
use crate::models::task::{DbTask, Task, TaskCreateRequest, TaskListQuery, TaskUpdateRequest};
use crate::utils::utc_now;

const TASK_COLUMNS: &str = "id, tenant_id, control_id, title, description, status, priority, \
                            assignee, due_date, comments, created_at, updated_at, deleted_at";

#[utoipa::path(
    get,
    path = "/api/tasks",
    tag = "Tasks",
    params(
        ("control_id" = Option<Uuid>, Query, description = "Only tasks linked to this control"),
        ("status" = Option<String>, Query, description = "Only tasks in this status")
    ),
    responses((status = 200, description = "List tasks", body = Vec<Task>)),
    security(("bearerAuth" = []))
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<TaskListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Task>>>> {
    let mut sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE tenant_id = ? AND deleted_at IS NULL"
    );
    if query.control_id.is_some() {
        sql.push_str(" AND control_id = ?");
    }
    if query.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut q = sqlx::query_as::<_, DbTask>(&sql).bind(session.tenant_id.to_string());
    if let Some(control_id) = query.control_id {
        q = q.bind(control_id.to_string());
    }
    if let Some(status) = query.status {
        q = q.bind(status);
    }

    let tasks = q
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(Task::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ApiResponse::ok(tasks)))
}

#[utoipa::path(
    post,
    path = "/api/tasks",
    tag = "Tasks",
    request_body = TaskCreateRequest,
    responses(
        (status = 201, description = "Task created", body = Task),
        (status = 403, description = "Missing capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_task(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(payload): Json<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Task>>)> {
    // Spawning a remediation task off a control is its own capability on the
    // control module; free-standing tasks use tasks.create.
    let gate = if payload.control_id.is_some() {
        ActionGate::new(modules::SECURITY_CONTROLS, Action::CreateTask)
    } else {
        ActionGate::new(modules::TASKS, Action::Create)
    };
    gate.authorize(&state.permissions, &session, state.authz_mode).await?;

    if let Some(control_id) = payload.control_id {
        ensure_control_exists(&state.pool, session.tenant_id, control_id).await?;
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO tasks \
         (id, tenant_id, control_id, title, description, status, priority, assignee, due_date, comments, created_by, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, '[]', ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .bind(payload.control_id.map(|c| c.to_string()))
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.status.as_deref().unwrap_or("open"))
    .bind(&payload.priority)
    .bind(&payload.assignee)
    .bind(payload.due_date)
    .bind(session.user_id.to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let task = fetch_task(&state.pool, session.tenant_id, id).await?;
    log_activity(&state.event_bus, "created", Some(session.user_id), &task);

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(task))))
}

#[utoipa::path(
    get,
    path = "/api/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task detail", body = Task),
        (status = 404, description = "Task not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_task(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Task>>> {
    let task = fetch_task(&state.pool, session.tenant_id, id).await?;
    Ok(Json(ApiResponse::ok(task)))
}

#[utoipa::path(
    put,
    path = "/api/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task ID")),
    request_body = TaskUpdateRequest,
    responses(
        (status = 200, description = "Task updated", body = Task),
        (status = 403, description = "Missing tasks.update capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_task(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<TaskUpdateRequest>,
) -> AppResult<Json<ApiResponse<Task>>> {
    ActionGate::new(modules::TASKS, Action::Update)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let previous = fetch_task(&state.pool, session.tenant_id, id).await?;

    let title = payload.title.unwrap_or_else(|| previous.title.clone());
    let description = payload.description.or_else(|| previous.description.clone());
    let status = payload.status.unwrap_or_else(|| previous.status.clone());
    let priority = payload.priority.or_else(|| previous.priority.clone());
    let assignee = payload.assignee.or_else(|| previous.assignee.clone());
    let due_date = payload.due_date.or(previous.due_date);
    let control_id = payload.control_id.or(previous.control_id);

    if let Some(control_id) = control_id {
        ensure_control_exists(&state.pool, session.tenant_id, control_id).await?;
    }

    sqlx::query(
        "UPDATE tasks SET title = ?, description = ?, status = ?, priority = ?, assignee = ?, \
         due_date = ?, control_id = ?, updated_at = ? \
         WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
    )
    .bind(&title)
    .bind(&description)
    .bind(&status)
    .bind(&priority)
    .bind(&assignee)
    .bind(due_date)
    .bind(control_id.map(|c| c.to_string()))
    .bind(utc_now())
    .bind(id.to_string())
    .bind(session.tenant_id.to_string())
    .execute(&state.pool)
    .await?;

    let task = fetch_task(&state.pool, session.tenant_id, id).await?;
    log_activity_with_previous(&state.event_bus, "updated", Some(session.user_id), &task, Some(&previous));

    Ok(Json(ApiResponse::ok(task)))
}

#[utoipa::path(
    delete,
    path = "/api/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task soft deleted"),
        (status = 403, description = "Missing tasks.delete capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_task(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Task>>> {
    ActionGate::new(modules::TASKS, Action::Delete)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let task = fetch_task(&state.pool, session.tenant_id, id).await?;

    sqlx::query("UPDATE tasks SET deleted_at = ? WHERE id = ? AND tenant_id = ?")
        .bind(utc_now())
        .bind(id.to_string())
        .bind(session.tenant_id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity(&state.event_bus, "deleted", Some(session.user_id), &task);

    Ok(Json(ApiResponse::ok(task)))
}

#[utoipa::path(
    get,
    path = "/api/tasks/{id}/comments",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses((status = 200, description = "Comments, newest first", body = Vec<Comment>)),
    security(("bearerAuth" = []))
)]
pub async fn get_comments(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<Comment>>>> {
    let task = fetch_task(&state.pool, session.tenant_id, id).await?;
    let mut comments = task.comments;
    sort_comments_desc(&mut comments);
    Ok(Json(ApiResponse::ok(comments)))
}

#[utoipa::path(
    post,
    path = "/api/tasks/{id}/comments",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task ID")),
    request_body = CommentRequest,
    responses(
        (status = 200, description = "Comment appended", body = Vec<Comment>),
        (status = 403, description = "Missing tasks.comment capability")
    ),
    security(("bearerAuth" = []))
)]
pub async fn add_comment(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<CommentRequest>,
) -> AppResult<Json<ApiResponse<Vec<Comment>>>> {
    ActionGate::new(modules::TASKS, Action::Comment)
        .authorize(&state.permissions, &session, state.authz_mode)
        .await?;

    let raw: Option<String> =
        sqlx::query_scalar("SELECT comments FROM tasks WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL")
            .bind(id.to_string())
            .bind(session.tenant_id.to_string())
            .fetch_optional(&state.pool)
            .await?;

    let raw = raw.ok_or_else(|| AppError::not_found("task not found"))?;
    let mut comments = parse_comments(&raw);
    comments.push(payload.comment);

    sqlx::query("UPDATE tasks SET comments = ?, updated_at = ? WHERE id = ? AND tenant_id = ?")
        .bind(comments_to_json(&comments))
        .bind(utc_now())
        .bind(id.to_string())
        .bind(session.tenant_id.to_string())
        .execute(&state.pool)
        .await?;

    let task = fetch_task(&state.pool, session.tenant_id, id).await?;
    log_activity(&state.event_bus, "commented", Some(session.user_id), &task);

    sort_comments_desc(&mut comments);
    Ok(Json(ApiResponse::ok(comments)))
}

async fn fetch_task(pool: &SqlitePool, tenant_id: Uuid, id: Uuid) -> AppResult<Task> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL");
    let row = sqlx::query_as::<_, DbTask>(&sql)
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("task not found"))?;

    row.try_into()
}

async fn ensure_control_exists(pool: &SqlitePool, tenant_id: Uuid, control_id: Uuid) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM security_controls WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
    )
    .bind(control_id.to_string())
    .bind(tenant_id.to_string())
    .fetch_one(pool)
    .await?;

    if count == 0 {
        return Err(AppError::bad_request("control_id does not reference an existing control"));
    }

    Ok(())
}
