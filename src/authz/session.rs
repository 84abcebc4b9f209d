use serde::Serialize;
use sqlx::{Row, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::jwt::JwtConfig;

use super::DEFAULT_TENANT_ID;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoleAssignment {
    pub role_id: Uuid,
    pub role_name: String,
}

/// The authenticated identity for one request. Created at login, restored
/// from the bearer token afterwards, immutable while it lives.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
    pub tenant_id: Uuid,
    pub roles: Vec<RoleAssignment>,
}

/// Restoration status consumed by the route guard. The guard must not reach
/// any decision while the holder is `Unrestored`.
#[derive(Debug, Clone)]
pub enum SessionHolder {
    Unrestored,
    Restored(Option<Session>),
}

impl SessionHolder {
    pub fn is_restored(&self) -> bool {
        matches!(self, SessionHolder::Restored(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionHolder::Restored(session) => session.as_ref(),
            SessionHolder::Unrestored => None,
        }
    }
}

/// Restore the session behind a bearer token: decode the claims, confirm the
/// user row is still active, and attach the user's role assignments for the
/// tenant. An invalid or expired token restores to `None` rather than erroring
/// so the guard can make the redirect decision.
pub async fn restore_session(pool: &SqlitePool, jwt: &JwtConfig, token: Option<&str>) -> AppResult<SessionHolder> {
    let Some(token) = token else {
        return Ok(SessionHolder::Restored(None));
    };

    let claims = match jwt.decode(token) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::debug!(error = %err, "session token rejected");
            return Ok(SessionHolder::Restored(None));
        }
    };

    let row = sqlx::query(
        "SELECT id, email, tenant_id, is_active FROM users WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(claims.sub.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(SessionHolder::Restored(None));
    };

    let is_active: bool = row.get("is_active");
    if !is_active {
        return Ok(SessionHolder::Restored(None));
    }

    let tenant_id = row
        .get::<Option<String>, _>("tenant_id")
        .and_then(|id| Uuid::parse_str(&id).ok())
        .unwrap_or(DEFAULT_TENANT_ID);

    let roles = load_role_assignments(pool, claims.sub, tenant_id).await?;

    Ok(SessionHolder::Restored(Some(Session {
        user_id: claims.sub,
        email: row.get("email"),
        tenant_id,
        roles,
    })))
}

pub async fn load_role_assignments(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<Vec<RoleAssignment>> {
    let rows = sqlx::query(
        "SELECT r.id AS role_id, r.role_name FROM user_roles ur \
         JOIN roles r ON r.id = ur.role_id \
         WHERE ur.user_id = ? AND ur.tenant_id = ? AND r.is_active = 1",
    )
    .bind(user_id.to_string())
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let role_id: String = row.get("role_id");
            Ok(RoleAssignment {
                role_id: Uuid::parse_str(&role_id)
                    .map_err(|err| AppError::internal(format!("malformed role id: {err}")))?,
                role_name: row.get("role_name"),
            })
        })
        .collect()
}
