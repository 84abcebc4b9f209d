//! Route guard: the per-request decision pipeline.
//!
//! Every navigation walks the same states:
//! `Unrestored -> CheckingAuth -> CheckingPassword -> CheckingPermission -> Decided`.
//! No decision may be produced before session restoration completes, the
//! password stage fails open when its backing query is unavailable, and the
//! permission stage fails closed on anything short of a loaded map that
//! grants the route's requirement.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use super::evaluator::{self, Action};
use super::modules;
use super::session::{Session, SessionHolder};
use super::store::MapState;

/// Static route requirement: URL path prefix -> (module, default action).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub module: &'static str,
    pub action: Action,
}

impl Requirement {
    pub const fn retrieve(module: &'static str) -> Self {
        Self {
            module,
            action: Action::Retrieve,
        }
    }
}

/// Terminal guard outcomes. `RedirectLogin` maps to 401, the other redirects
/// to 403 with distinct machine codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    RedirectLogin,
    RedirectPasswordChange,
    RedirectHome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardState {
    Unrestored,
    CheckingAuth,
    CheckingPassword,
    CheckingPermission,
    Decided(GuardDecision),
}

/// Outcome of the password-change probe for the password stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordProbe {
    /// Route exempt from the check (auth endpoints themselves).
    Exempt,
    /// Known changed, from cache or a fresh query.
    Changed,
    ChangeRequired,
    /// Backing query failed; the stage fails open.
    Unavailable,
}

/// Fixed mapping from path prefix to required (module, default action).
/// Built once at startup and never mutated.
pub struct RouteRequirements {
    prefixes: Vec<(&'static str, Requirement)>,
}

impl RouteRequirements {
    pub fn standard() -> Self {
        Self {
            prefixes: vec![
                ("/api/security-controls", Requirement::retrieve(modules::SECURITY_CONTROLS)),
                ("/api/tasks", Requirement::retrieve(modules::TASKS)),
                ("/api/audits", Requirement::retrieve(modules::AUDITS)),
                ("/api/actions", Requirement::retrieve(modules::ACTIONS)),
                ("/api/users", Requirement::retrieve(modules::USERS)),
                ("/api/roles", Requirement::retrieve(modules::ROLES)),
                ("/api/dashboard", Requirement::retrieve(modules::DASHBOARD)),
            ],
        }
    }

    /// Resolve the requirement for a concrete request path. `None` means the
    /// route is auth-only: no module capability is demanded here (the handler
    /// may still gate specific actions).
    pub fn resolve(&self, path: &str) -> Option<Requirement> {
        // A user may always inspect their own role and permission data; the
        // handlers enforce roles.retrieve when the target is somebody else.
        if path.starts_with("/api/users/")
            && (path.ends_with("/permissions") || path.ends_with("/roles") || path.contains("/roles/"))
        {
            return None;
        }

        self.prefixes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, requirement)| *requirement)
    }
}

/// Routes the password stage never applies to: the user must be able to log
/// in, log out and complete the forced password change itself.
pub fn password_exempt(path: &str) -> bool {
    path.starts_with("/api/auth/")
}

/// Auth stage. `Unrestored` never yields a decision; a restored holder with
/// no session redirects to login.
pub fn auth_stage(holder: &SessionHolder) -> Result<&Session, GuardState> {
    match holder {
        SessionHolder::Unrestored => Err(GuardState::Unrestored),
        SessionHolder::Restored(None) => Err(GuardState::Decided(GuardDecision::RedirectLogin)),
        SessionHolder::Restored(Some(session)) => Ok(session),
    }
}

/// Password stage. Fails open on `Unavailable`: locking the user out of a
/// possibly working app is worse than skipping the redirect once; the layer
/// logs the skip at WARN. This is the single availability-over-gating
/// exception in the pipeline.
pub fn password_stage(probe: PasswordProbe) -> Option<GuardDecision> {
    match probe {
        PasswordProbe::ChangeRequired => Some(GuardDecision::RedirectPasswordChange),
        PasswordProbe::Exempt | PasswordProbe::Changed | PasswordProbe::Unavailable => None,
    }
}

/// Permission stage. Privileged sessions bypass the capability lookup;
/// everything else requires a loaded map that grants the requirement.
/// A loading or failed map denies - it must never read as granted.
pub fn permission_stage(
    session: &Session,
    requirement: Option<Requirement>,
    map_state: &MapState,
) -> GuardDecision {
    let Some(requirement) = requirement else {
        return GuardDecision::Allowed;
    };

    if evaluator::is_privileged(session) {
        return GuardDecision::Allowed;
    }

    match map_state {
        MapState::Loaded(map) => {
            if map.has_permission(requirement.module, requirement.action) {
                GuardDecision::Allowed
            } else {
                GuardDecision::RedirectHome
            }
        }
        MapState::Loading | MapState::Failed(_) => GuardDecision::RedirectHome,
    }
}

/// One-shot denial warning memo: warn the first time a user is turned away
/// from a path, stay silent while they keep hitting the same path, and reset
/// once the path changes.
#[derive(Default)]
pub struct DenialMemo {
    last_denied: Mutex<HashMap<Uuid, String>>,
}

impl DenialMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_warn(&self, user_id: Uuid, path: &str) -> bool {
        let mut memo = self.last_denied.lock().expect("denial memo poisoned");
        match memo.get(&user_id) {
            Some(previous) if previous == path => false,
            _ => {
                memo.insert(user_id, path.to_string());
                true
            }
        }
    }

    pub fn forget(&self, user_id: Uuid) {
        self.last_denied
            .lock()
            .expect("denial memo poisoned")
            .remove(&user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::evaluator::{Capabilities, PermissionMap};
    use crate::authz::session::RoleAssignment;
    use std::sync::Arc;

    fn plain_session() -> Session {
        Session {
            user_id: Uuid::new_v4(),
            email: "user@example.com".into(),
            tenant_id: Uuid::new_v4(),
            roles: vec![RoleAssignment {
                role_id: Uuid::new_v4(),
                role_name: "Compliance Manager".into(),
            }],
        }
    }

    fn loaded_map(module: &str, caps: Capabilities) -> MapState {
        let mut map = PermissionMap::new();
        map.grant(module, &caps);
        MapState::Loaded(Arc::new(map))
    }

    #[test]
    fn unrestored_holder_yields_no_decision() {
        let holder = SessionHolder::Unrestored;
        assert_eq!(auth_stage(&holder).unwrap_err(), GuardState::Unrestored);
    }

    #[test]
    fn missing_session_redirects_to_login() {
        let holder = SessionHolder::Restored(None);
        assert_eq!(
            auth_stage(&holder).unwrap_err(),
            GuardState::Decided(GuardDecision::RedirectLogin)
        );
    }

    #[test]
    fn password_probe_outcomes() {
        assert_eq!(
            password_stage(PasswordProbe::ChangeRequired),
            Some(GuardDecision::RedirectPasswordChange)
        );
        assert_eq!(password_stage(PasswordProbe::Changed), None);
        assert_eq!(password_stage(PasswordProbe::Exempt), None);
        // Fail open when the probe itself is unavailable.
        assert_eq!(password_stage(PasswordProbe::Unavailable), None);
    }

    #[test]
    fn permission_stage_grants_on_capability() {
        let session = plain_session();
        let state = loaded_map(
            "tasks",
            Capabilities {
                can_retrieve: true,
                ..Default::default()
            },
        );
        let decision = permission_stage(&session, Some(Requirement::retrieve("tasks")), &state);
        assert_eq!(decision, GuardDecision::Allowed);
    }

    #[test]
    fn permission_stage_denies_absent_module() {
        let session = plain_session();
        let state = MapState::Loaded(Arc::new(PermissionMap::new()));
        let decision = permission_stage(&session, Some(Requirement::retrieve("tasks")), &state);
        assert_eq!(decision, GuardDecision::RedirectHome);
    }

    #[test]
    fn loading_map_never_reads_as_granted() {
        let session = plain_session();
        let decision = permission_stage(&session, Some(Requirement::retrieve("tasks")), &MapState::Loading);
        assert_eq!(decision, GuardDecision::RedirectHome);
        let failed = MapState::Failed("db down".into());
        assert_eq!(
            permission_stage(&session, Some(Requirement::retrieve("tasks")), &failed),
            GuardDecision::RedirectHome
        );
    }

    #[test]
    fn privileged_session_bypasses_capability_lookup() {
        let mut session = plain_session();
        session.roles.push(RoleAssignment {
            role_id: Uuid::new_v4(),
            role_name: " super ADMIN ".into(),
        });
        let decision = permission_stage(&session, Some(Requirement::retrieve("tasks")), &MapState::Loading);
        assert_eq!(decision, GuardDecision::Allowed);
    }

    #[test]
    fn requirement_resolution_prefers_exceptions() {
        let requirements = RouteRequirements::standard();

        let req = requirements.resolve("/api/tasks").unwrap();
        assert_eq!(req.module, "tasks");
        assert_eq!(req.action, Action::Retrieve);

        assert!(requirements.resolve("/api/tasks/123/comments").is_some());
        assert!(requirements.resolve("/api/auth/me").is_none());

        // Self-service role/permission inspection is auth-only.
        assert!(requirements
            .resolve("/api/users/6f6a-whatever/permissions")
            .is_none());
        assert!(requirements.resolve("/api/users/6f6a-whatever/roles").is_none());
        assert!(requirements
            .resolve("/api/users/6f6a-whatever/roles/role-id")
            .is_none());
        assert!(requirements.resolve("/api/users").is_some());
    }

    #[test]
    fn denial_memo_warns_once_per_path() {
        let memo = DenialMemo::new();
        let user = Uuid::new_v4();

        assert!(memo.should_warn(user, "/api/tasks"));
        assert!(!memo.should_warn(user, "/api/tasks"));
        assert!(!memo.should_warn(user, "/api/tasks"));

        // Path change resets the memo.
        assert!(memo.should_warn(user, "/api/audits"));
        assert!(memo.should_warn(user, "/api/tasks"));

        // Independent per user.
        let other = Uuid::new_v4();
        assert!(memo.should_warn(other, "/api/tasks"));
    }
}
