use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::layer::CurrentSession;
use crate::authz::store::MapState;
use crate::authz::{modules, Action, ActionGate, GateStatus};
use crate::envelope::ApiResponse;
use crate::errors::AppResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct ActionAffordance {
    pub action: Action,
    #[schema(value_type = Object)]
    pub status: GateStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ModuleCapabilities {
    pub module: &'static str,
    pub actions: Vec<ActionAffordance>,
}

/// Gate statuses for every known (module, action) pair, so clients render
/// affordances without re-deriving policy locally.
#[utoipa::path(
    get,
    path = "/api/capabilities",
    tag = "RBAC",
    responses((status = 200, description = "Per-module affordance states", body = Vec<ModuleCapabilities>)),
    security(("bearerAuth" = []))
)]
pub async fn list_capabilities(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<ApiResponse<Vec<ModuleCapabilities>>>> {
    // Resolve the map before reporting so the answer is definitive; a failed
    // load reports denial states, never enabled ones.
    let map_state = match state.permissions.load(session.user_id, session.tenant_id).await {
        Ok(map) => MapState::Loaded(map),
        Err(err) => MapState::Failed(err.to_string()),
    };

    let capabilities = modules::ALL
        .iter()
        .map(|module| ModuleCapabilities {
            module,
            actions: Action::ALL
                .iter()
                .map(|&action| ActionAffordance {
                    action,
                    status: ActionGate::new(*module, action).status(&session, &map_state),
                })
                .collect(),
        })
        .collect();

    Ok(Json(ApiResponse::ok(capabilities)))
}
