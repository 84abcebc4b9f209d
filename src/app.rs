use std::sync::Arc;

use axum::http::Method;
use axum::middleware;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::guard::DenialMemo;
use crate::authz::layer::guard_middleware;
use crate::authz::{AuthzMode, PermissionStore, RouteRequirements};
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{actions, audits, auth, capabilities, controls, dashboard, health, rbac, tasks, users};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
    pub permissions: Arc<PermissionStore>,
    pub requirements: Arc<RouteRequirements>,
    pub denial_memo: Arc<DenialMemo>,
    pub authz_mode: AuthzMode,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, event_bus: EventBus) -> Self {
        Self {
            permissions: Arc::new(PermissionStore::new(pool.clone())),
            requirements: Arc::new(RouteRequirements::standard()),
            denial_memo: Arc::new(DenialMemo::new()),
            authz_mode: AuthzMode::from_env(),
            pool,
            jwt: Arc::new(jwt),
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let (event_bus, event_rx) = init_event_bus();
    tokio::spawn(start_activity_listener(event_rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    // Reachable without a session.
    let public_routes = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/health", get(health::health));

    let auth_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/change-password", post(auth::change_password))
        .route("/check-password-change", get(auth::check_password_change));

    let control_routes = Router::new()
        .route("/", get(controls::list_controls).post(controls::create_control))
        .route(
            "/:id",
            get(controls::get_control)
                .put(controls::update_control)
                .delete(controls::delete_control),
        )
        .route("/:id/status", patch(controls::update_status))
        .route("/:id/comments", get(controls::get_comments).post(controls::add_comment));

    let task_routes = Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/:id",
            get(tasks::get_task).put(tasks::update_task).delete(tasks::delete_task),
        )
        .route("/:id/comments", get(tasks::get_comments).post(tasks::add_comment));

    let audit_routes = Router::new()
        .route("/", get(audits::list_audits).post(audits::create_audit))
        .route(
            "/:id",
            get(audits::get_audit).put(audits::update_audit).delete(audits::delete_audit),
        )
        .route("/:id/comments", get(audits::get_comments).post(audits::add_comment));

    let action_routes = Router::new()
        .route("/", get(actions::list_actions).post(actions::create_action))
        .route(
            "/:id",
            get(actions::get_action)
                .put(actions::update_action)
                .delete(actions::delete_action),
        );

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/search", get(users::search_users))
        .route(
            "/:id",
            get(users::get_user).put(users::update_user).delete(users::delete_user),
        )
        .route("/:id/roles", get(rbac::get_user_roles).post(rbac::assign_role))
        .route("/:id/roles/:role_id", delete(rbac::remove_role))
        .route("/:id/permissions", get(rbac::get_user_permissions));

    let role_routes = Router::new()
        .route("/", get(rbac::list_roles).post(rbac::create_role))
        .route("/:id", get(rbac::get_role).put(rbac::update_role))
        .route("/:id/permissions", put(rbac::update_role_permissions));

    // Everything below walks the guard pipeline before its handler runs.
    let guarded_routes = Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/security-controls", control_routes)
        .nest("/api/tasks", task_routes)
        .nest("/api/audits", audit_routes)
        .nest("/api/actions", action_routes)
        .nest("/api/users", user_routes)
        .nest("/api/roles", role_routes)
        .route("/api/permissions/check", get(rbac::check_permission))
        .route("/api/capabilities", get(capabilities::list_capabilities))
        .route("/api/dashboard/counts", get(dashboard::counts))
        .layer(middleware::from_fn_with_state(state.clone(), guard_middleware));

    let router = public_routes
        .merge(guarded_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
