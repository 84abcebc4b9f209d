use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::authz;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    // Per-handler `#[utoipa::path]` annotations register the paths; listing
    // them here as well would double-register.
    components(
        schemas(
            models::user::User,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::UserCreateRequest,
            models::user::UserUpdateRequest,
            models::user::ChangePasswordRequest,
            models::user::CheckPasswordChangeResponse,
            models::comment::Comment,
            models::control::SecurityControl,
            models::control::ControlCreateRequest,
            models::control::ControlUpdateRequest,
            models::control::ControlStatusRequest,
            models::comment::CommentRequest,
            models::task::Task,
            models::task::TaskCreateRequest,
            models::task::TaskUpdateRequest,
            models::audit::Audit,
            models::audit::AuditCreateRequest,
            models::audit::AuditUpdateRequest,
            models::action_item::ActionItem,
            models::action_item::ActionCreateRequest,
            models::action_item::ActionUpdateRequest,
            models::rbac::Role,
            models::rbac::RoleCreateRequest,
            models::rbac::RoleUpdateRequest,
            models::rbac::RolePermissionsUpdateRequest,
            models::rbac::UserPermissionsResponse,
            models::rbac::PermissionCheckResponse,
            authz::Capabilities
        )
    ),
    tags(
        (name = "Auth", description = "Authentication and password lifecycle"),
        (name = "Security Controls", description = "Control catalogue"),
        (name = "Tasks", description = "Remediation and evidence tasks"),
        (name = "Audits", description = "Audit engagements"),
        (name = "Actions", description = "Remediation actions"),
        (name = "Users", description = "User administration"),
        (name = "RBAC", description = "Roles, permissions and capability answers"),
        (name = "Dashboard", description = "Aggregate counts"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

/// Generated OpenAPI plus the bearer security scheme and a server entry, so
/// the Swagger UI Authorize dialog works out of the box.
pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
    let mut doc = serde_json::to_value(ApiDoc::openapi())?;

    if let Some(obj) = doc.as_object_mut() {
        let components = obj
            .entry("components")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(components) = components.as_object_mut() {
            let schemes = components
                .entry("securitySchemes")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(schemes) = schemes.as_object_mut() {
                schemes.insert(
                    "bearerAuth".to_string(),
                    json!({"type": "http", "scheme": "bearer", "bearerFormat": "JWT"}),
                );
            }
        }

        obj.entry("servers")
            .or_insert_with(|| json!([{"url": format!("http://localhost:{port}")}]));
    }

    Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .persist_authorization(true);

    let doc_json = Arc::new(serde_json::to_value(&doc).expect("OpenAPI serialization must succeed"));

    let json_route = {
        let doc_json = Arc::clone(&doc_json);
        get(move || {
            let doc_json = Arc::clone(&doc_json);
            async move { Json((*doc_json).clone()) }
        })
    };

    Router::new()
        .route("/api-docs/openapi.json", json_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config))
}
