use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::layer::CurrentSession;
use crate::envelope::ApiResponse;
use crate::errors::AppResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardCounts {
    pub security_controls: i64,
    pub tasks: i64,
    pub open_tasks: i64,
    pub audits: i64,
    pub actions: i64,
    pub users: i64,
}

#[utoipa::path(
    get,
    path = "/api/dashboard/counts",
    tag = "Dashboard",
    responses((status = 200, description = "Per-module row counts", body = DashboardCounts)),
    security(("bearerAuth" = []))
)]
pub async fn counts(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<ApiResponse<DashboardCounts>>> {
    let tenant = session.tenant_id;

    let counts = DashboardCounts {
        security_controls: count_table(&state.pool, "security_controls", tenant).await?,
        tasks: count_table(&state.pool, "tasks", tenant).await?,
        open_tasks: count_open_tasks(&state.pool, tenant).await?,
        audits: count_table(&state.pool, "audits", tenant).await?,
        actions: count_table(&state.pool, "actions", tenant).await?,
        users: count_table(&state.pool, "users", tenant).await?,
    };

    Ok(Json(ApiResponse::ok(counts)))
}

async fn count_table(pool: &SqlitePool, table: &str, tenant_id: Uuid) -> AppResult<i64> {
    // Table names come from the fixed list above, never from input.
    let sql = format!("SELECT COUNT(1) FROM {table} WHERE tenant_id = ? AND deleted_at IS NULL");
    Ok(sqlx::query_scalar(&sql)
        .bind(tenant_id.to_string())
        .fetch_one(pool)
        .await?)
}

async fn count_open_tasks(pool: &SqlitePool, tenant_id: Uuid) -> AppResult<i64> {
    Ok(sqlx::query_scalar(
        "SELECT COUNT(1) FROM tasks WHERE tenant_id = ? AND deleted_at IS NULL AND status NOT IN ('done', 'closed')",
    )
    .bind(tenant_id.to_string())
    .fetch_one(pool)
    .await?)
}
