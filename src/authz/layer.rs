//! Axum wiring for the route guard: restores the session, walks the guard
//! stages and either forwards the request (with the session attached) or
//! maps the redirect decision onto an error response.

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::bearer_token;
use crate::utils::{verify_password, DEFAULT_PASSWORD};

use super::guard::{self, GuardDecision, GuardState, PasswordProbe};
use super::session::{restore_session, Session};
use super::store::MapState;
use super::AuthzMode;

/// Session attached to the request by the guard. Handlers behind the guard
/// extract this instead of re-validating the token.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(CurrentSession)
            .ok_or_else(|| AppError::unauthenticated("session not restored"))
    }
}

pub async fn guard_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = req.uri().path().to_string();

    // Restoration happens before any decision; a missing or invalid token
    // restores to an empty holder rather than erroring here.
    let holder = restore_session(&state.pool, &state.jwt, bearer_token(req.headers())).await?;

    let session = match guard::auth_stage(&holder) {
        Ok(session) => session.clone(),
        Err(GuardState::Decided(GuardDecision::RedirectLogin)) => {
            return Err(AppError::unauthenticated("authentication required"));
        }
        Err(_) => {
            // The holder above is always restored; anything else is a bug.
            return Err(AppError::internal("guard evaluated before session restoration"));
        }
    };

    if let Some(decision) = guard::password_stage(password_probe(&state, &session, &path).await) {
        debug_assert_eq!(decision, GuardDecision::RedirectPasswordChange);
        return Err(AppError::PasswordChangeRequired);
    }

    let requirement = state.requirements.resolve(&path);

    let decision = if state.authz_mode == AuthzMode::Off {
        GuardDecision::Allowed
    } else {
        let map_state = if requirement.is_some() {
            match state.permissions.load(session.user_id, session.tenant_id).await {
                Ok(map) => MapState::Loaded(map),
                Err(err) => MapState::Failed(err.to_string()),
            }
        } else {
            MapState::Loading
        };
        guard::permission_stage(&session, requirement, &map_state)
    };

    match decision {
        GuardDecision::Allowed => {
            req.extensions_mut().insert(session);
            Ok(next.run(req).await)
        }
        GuardDecision::RedirectHome => {
            if state.denial_memo.should_warn(session.user_id, &path) {
                tracing::warn!(
                    user_id = %session.user_id,
                    tenant_id = %session.tenant_id,
                    path = %path,
                    "route denied, redirecting home"
                );
            }

            if state.authz_mode == AuthzMode::Advisory {
                req.extensions_mut().insert(session);
                return Ok(next.run(req).await);
            }

            let reason = requirement
                .map(|r| format!("You do not have permission to {} {}", r.action.as_str(), r.module))
                .unwrap_or_else(|| "You do not have permission to access this resource".to_string());
            Err(AppError::permission_denied(reason))
        }
        GuardDecision::RedirectLogin => Err(AppError::unauthenticated("authentication required")),
        GuardDecision::RedirectPasswordChange => Err(AppError::PasswordChangeRequired),
    }
}

/// Resolve the password stage input: exempt paths short-circuit, a cached
/// positive outcome skips the query, and a failed query reports
/// `Unavailable` so the stage can fail open.
async fn password_probe(state: &AppState, session: &Session, path: &str) -> PasswordProbe {
    if guard::password_exempt(path) {
        return PasswordProbe::Exempt;
    }

    if state.permissions.password_changed(session.user_id) == Some(true) {
        return PasswordProbe::Changed;
    }

    match requires_password_change(&state.pool, session.user_id).await {
        Ok(true) => PasswordProbe::ChangeRequired,
        Ok(false) => {
            state.permissions.set_password_changed(session.user_id, true);
            PasswordProbe::Changed
        }
        Err(err) => {
            tracing::warn!(
                user_id = %session.user_id,
                error = %err,
                "password-change check unavailable, failing open"
            );
            PasswordProbe::Unavailable
        }
    }
}

/// A user must change their password when they still run the provisioning
/// default, or have never completed a second login.
pub async fn requires_password_change(pool: &SqlitePool, user_id: Uuid) -> AppResult<bool> {
    let row = sqlx::query("SELECT password_hash, first_login, last_login FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    let password_hash: Option<String> = row.get("password_hash");
    let first_login: Option<String> = row.get("first_login");
    let last_login: Option<String> = row.get("last_login");

    let is_default_password = match password_hash {
        Some(hash) => verify_password(DEFAULT_PASSWORD, &hash).unwrap_or(false),
        None => false,
    };

    Ok(is_default_password || first_login.is_none() || first_login == last_login)
}
