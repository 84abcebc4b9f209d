//! Authorization core.
//!
//! Layered as:
//! - `evaluator`: pure capability/role lookups over a loaded permission map
//! - `store`: per-(user, tenant) permission-map cache with single-flight loads
//! - `session`: the restored identity consumed by guard and gates
//! - `guard`: the per-request navigation state machine (auth -> password -> permission)
//! - `gate`: per-action enforcement and affordance reporting
//! - `layer`: the axum middleware driving the guard

pub mod evaluator;
pub mod gate;
pub mod guard;
pub mod layer;
pub mod session;
pub mod store;

pub use evaluator::{Action, Capabilities, PermissionMap};
pub use gate::{ActionGate, DenialPolicy, GateStatus};
pub use guard::{GuardDecision, GuardState, RouteRequirements};
pub use session::{RoleAssignment, Session, SessionHolder};
pub use store::{MapState, PermissionStore};

use uuid::Uuid;

/// Tenant applied to legacy rows that predate multi-tenancy.
pub const DEFAULT_TENANT_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0001);

/// Authorization enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzMode {
    /// No permission checks (development mode)
    Off,
    /// Log denials but allow requests (testing mode)
    Advisory,
    /// Enforce 401/403 on denied requests (production mode, the default)
    Strict,
}

impl AuthzMode {
    pub fn from_env() -> Self {
        match std::env::var("AUTHZ_MODE").unwrap_or_default().to_lowercase().as_str() {
            "off" => AuthzMode::Off,
            "advisory" => AuthzMode::Advisory,
            _ => AuthzMode::Strict,
        }
    }
}

/// Role names granting blanket or elevated capability. Matching is
/// case-insensitive and whitespace-tolerant (see `evaluator::normalize_role`).
pub mod roles {
    pub const SUPER_ADMIN: &str = "Super Admin";
    pub const ADMIN: &str = "Admin";
    pub const INTERNAL_AUDITOR: &str = "Internal Auditor";
    pub const EXTERNAL_AUDITOR: &str = "External Auditor";

    pub const PRIVILEGED: [&str; 4] = [SUPER_ADMIN, ADMIN, INTERNAL_AUDITOR, EXTERNAL_AUDITOR];
}

/// Module names capability is granted against. Permission-map keys are
/// lowercased module names; anything absent from the map is denied.
pub mod modules {
    pub const SECURITY_CONTROLS: &str = "security_controls";
    pub const TASKS: &str = "tasks";
    pub const AUDITS: &str = "audits";
    pub const ACTIONS: &str = "actions";
    pub const USERS: &str = "users";
    pub const ROLES: &str = "roles";
    pub const DASHBOARD: &str = "dashboard";

    pub const ALL: [&str; 7] = [
        SECURITY_CONTROLS,
        TASKS,
        AUDITS,
        ACTIONS,
        USERS,
        ROLES,
        DASHBOARD,
    ];
}
