use serde::Serialize;
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};

use super::evaluator::{self, Action};
use super::session::Session;
use super::store::{MapState, PermissionStore};
use super::AuthzMode;

/// What a denied affordance looks like to the client: kept visible but
/// disabled with a reason, or not rendered at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialPolicy {
    Disable,
    Hide,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateStatus {
    Enabled,
    Disabled { reason: String },
    Hidden,
    /// Permission map still loading. Pending is never rendered as enabled,
    /// and never as a final denial either.
    Pending,
}

/// Enforcement point for a single (module, action) affordance.
#[derive(Debug, Clone)]
pub struct ActionGate {
    module: String,
    action: Action,
    policy: DenialPolicy,
}

impl ActionGate {
    pub fn new(module: impl Into<String>, action: Action) -> Self {
        Self {
            module: module.into(),
            action,
            policy: DenialPolicy::Disable,
        }
    }

    pub fn hidden_when_denied(mut self) -> Self {
        self.policy = DenialPolicy::Hide;
        self
    }

    pub fn denial_reason(&self) -> String {
        format!(
            "You do not have permission to {} {}",
            self.action.as_str(),
            self.module
        )
    }

    /// Affordance state for rendering. Privileged sessions are always
    /// enabled; otherwise the store state decides, with loading reported as
    /// `Pending` rather than either terminal state.
    pub fn status(&self, session: &Session, map_state: &MapState) -> GateStatus {
        if evaluator::is_privileged(session) {
            return GateStatus::Enabled;
        }

        match map_state {
            MapState::Loading => GateStatus::Pending,
            MapState::Loaded(map) if map.has_permission(&self.module, self.action) => GateStatus::Enabled,
            MapState::Loaded(_) | MapState::Failed(_) => match self.policy {
                DenialPolicy::Disable => GateStatus::Disabled {
                    reason: self.denial_reason(),
                },
                DenialPolicy::Hide => GateStatus::Hidden,
            },
        }
    }

    /// Synchronous permission check in front of the wrapped operation. The
    /// handler body must not run on denial, and a request landing while the
    /// map is still loading awaits the definitive answer instead of slipping
    /// through the loading -> loaded transition.
    pub async fn authorize(
        &self,
        store: &PermissionStore,
        session: &Session,
        mode: AuthzMode,
    ) -> AppResult<()> {
        if mode == AuthzMode::Off {
            return Ok(());
        }

        if evaluator::is_privileged(session) {
            return Ok(());
        }

        let allowed = match store.load(session.user_id, session.tenant_id).await {
            Ok(map) => map.has_permission(&self.module, self.action),
            Err(err) => {
                // Fail closed: an unavailable map never grants.
                tracing::error!(
                    user_id = %session.user_id,
                    module = %self.module,
                    action = self.action.as_str(),
                    error = %err,
                    "permission map unavailable, denying action"
                );
                false
            }
        };

        if allowed {
            return Ok(());
        }

        if mode == AuthzMode::Advisory {
            tracing::warn!(
                user_id = %session.user_id,
                module = %self.module,
                action = self.action.as_str(),
                "advisory mode: would deny action"
            );
            return Ok(());
        }

        Err(AppError::permission_denied(self.denial_reason()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::evaluator::{Capabilities, PermissionMap};
    use crate::authz::session::RoleAssignment;
    use std::sync::Arc;
    use uuid::Uuid;

    fn session(role: &str) -> Session {
        Session {
            user_id: Uuid::new_v4(),
            email: "user@example.com".into(),
            tenant_id: Uuid::new_v4(),
            roles: vec![RoleAssignment {
                role_id: Uuid::new_v4(),
                role_name: role.into(),
            }],
        }
    }

    #[test]
    fn pending_while_loading_never_enabled() {
        let gate = ActionGate::new("tasks", Action::Create);
        let status = gate.status(&session("Compliance Manager"), &MapState::Loading);
        assert_eq!(status, GateStatus::Pending);
    }

    #[test]
    fn disable_policy_carries_denial_reason() {
        let gate = ActionGate::new("tasks", Action::Delete);
        let status = gate.status(
            &session("Compliance Manager"),
            &MapState::Loaded(Arc::new(PermissionMap::new())),
        );
        assert_eq!(
            status,
            GateStatus::Disabled {
                reason: "You do not have permission to delete tasks".into()
            }
        );
    }

    #[test]
    fn hide_policy_renders_nothing() {
        let gate = ActionGate::new("tasks", Action::Delete).hidden_when_denied();
        let status = gate.status(
            &session("Compliance Manager"),
            &MapState::Failed("db down".into()),
        );
        assert_eq!(status, GateStatus::Hidden);
    }

    #[test]
    fn granted_capability_enables() {
        let mut map = PermissionMap::new();
        map.grant(
            "tasks",
            &Capabilities {
                can_create: true,
                ..Default::default()
            },
        );
        let gate = ActionGate::new("tasks", Action::Create);
        let status = gate.status(&session("Compliance Manager"), &MapState::Loaded(Arc::new(map)));
        assert_eq!(status, GateStatus::Enabled);
    }

    #[test]
    fn privileged_session_is_always_enabled() {
        let gate = ActionGate::new("tasks", Action::Delete);
        let status = gate.status(&session("External Auditor"), &MapState::Loading);
        assert_eq!(status, GateStatus::Enabled);
    }
}
