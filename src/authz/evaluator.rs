use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::roles::PRIVILEGED;
use super::session::Session;

/// Capability flags for one module, as stored per (role, module) and merged
/// across all of a user's roles with OR semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Capabilities {
    pub can_create: bool,
    pub can_retrieve: bool,
    pub can_update: bool,
    pub can_delete: bool,
    pub can_comment: bool,
    pub can_create_task: bool,
}

impl Capabilities {
    pub fn merge(&mut self, other: &Capabilities) {
        self.can_create |= other.can_create;
        self.can_retrieve |= other.can_retrieve;
        self.can_update |= other.can_update;
        self.can_delete |= other.can_delete;
        self.can_comment |= other.can_comment;
        self.can_create_task |= other.can_create_task;
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Create => self.can_create,
            Action::Retrieve => self.can_retrieve,
            Action::Update => self.can_update,
            Action::Delete => self.can_delete,
            Action::Comment => self.can_comment,
            Action::CreateTask => self.can_create_task,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Retrieve,
    Update,
    Delete,
    Comment,
    CreateTask,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Create,
        Action::Retrieve,
        Action::Update,
        Action::Delete,
        Action::Comment,
        Action::CreateTask,
    ];

    /// Unknown action strings resolve to `None`, which every caller treats as
    /// denied.
    pub fn parse(value: &str) -> Option<Action> {
        match value.trim().to_lowercase().as_str() {
            "create" => Some(Action::Create),
            "retrieve" => Some(Action::Retrieve),
            "update" => Some(Action::Update),
            "delete" => Some(Action::Delete),
            "comment" => Some(Action::Comment),
            "create_task" => Some(Action::CreateTask),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Retrieve => "retrieve",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Comment => "comment",
            Action::CreateTask => "create_task",
        }
    }
}

/// Per-tenant mapping of module name to merged capabilities. Keys are
/// lowercased; a module absent from the map means no access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMap {
    modules: HashMap<String, Capabilities>,
}

impl PermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, module: &str, caps: &Capabilities) {
        self.modules
            .entry(module.trim().to_lowercase())
            .or_default()
            .merge(caps);
    }

    pub fn module(&self, module: &str) -> Option<&Capabilities> {
        self.modules.get(&module.trim().to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Capabilities)> {
        self.modules.iter()
    }

    /// Fail-closed capability lookup: absent module or unknown action is a
    /// denial, never an error.
    pub fn has_permission(&self, module: &str, action: Action) -> bool {
        self.module(module).map(|caps| caps.allows(action)).unwrap_or(false)
    }

    pub fn has_permission_str(&self, module: &str, action: &str) -> bool {
        Action::parse(action)
            .map(|action| self.has_permission(module, action))
            .unwrap_or(false)
    }
}

/// Role-name normalization used everywhere a role is compared: lowercase with
/// all whitespace stripped, so "Super Admin", "super admin" and " SuperAdmin "
/// are the same role.
pub fn normalize_role(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn has_role(session: &Session, role_name: &str) -> bool {
    let wanted = normalize_role(role_name);
    session
        .roles
        .iter()
        .any(|assignment| normalize_role(&assignment.role_name) == wanted)
}

/// Whether any of the session's roles is in the fixed privileged set. The
/// evaluator itself never bypasses capability checks on privilege; call sites
/// (guard, gate) decide whether privilege overrides.
pub fn is_privileged(session: &Session) -> bool {
    PRIVILEGED.iter().any(|role| has_role(session, role))
}
