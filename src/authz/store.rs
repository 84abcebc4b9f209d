use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sqlx::{Row, SqlitePool};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

use super::evaluator::{Capabilities, PermissionMap};

type StoreKey = (Uuid, Uuid);

/// Observable state of one cached permission map. "Loaded empty" and
/// "failed" both deny, but are surfaced differently for diagnosis.
#[derive(Debug, Clone)]
pub enum MapState {
    Loading,
    Loaded(Arc<PermissionMap>),
    Failed(String),
}

impl MapState {
    pub fn is_loading(&self) -> bool {
        matches!(self, MapState::Loading)
    }
}

#[derive(Default)]
struct Slot {
    cell: Arc<OnceCell<Arc<PermissionMap>>>,
    last_error: Mutex<Option<String>>,
}

/// Cache of capability maps keyed by (user, tenant).
///
/// Single-writer: only `load` and the `invalidate` family mutate it. A map is
/// fetched at most once per key while valid; concurrent `load` calls for the
/// same key share one database fetch. Any change to roles, role assignments
/// or permission rows must invalidate the affected entries before the
/// mutation's response is sent - serving a stale map is a security defect.
pub struct PermissionStore {
    pool: SqlitePool,
    entries: Mutex<HashMap<StoreKey, Arc<Slot>>>,
    password_changed: Mutex<HashMap<Uuid, bool>>,
    fetches: AtomicU64,
}

impl PermissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            entries: Mutex::new(HashMap::new()),
            password_changed: Mutex::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    fn slot(&self, key: StoreKey) -> Arc<Slot> {
        let mut entries = self.entries.lock().expect("permission store poisoned");
        entries.entry(key).or_default().clone()
    }

    /// Fetch-and-cache the capability map for (user, tenant). Later callers
    /// for an in-flight key await the same fetch instead of issuing another.
    pub async fn load(&self, user_id: Uuid, tenant_id: Uuid) -> AppResult<Arc<PermissionMap>> {
        let slot = self.slot((user_id, tenant_id));

        let map = slot
            .cell
            .get_or_try_init(|| async {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                match fetch_permission_map(&self.pool, user_id, tenant_id).await {
                    Ok(map) => {
                        *slot.last_error.lock().expect("permission store poisoned") = None;
                        tracing::debug!(
                            user_id = %user_id,
                            tenant_id = %tenant_id,
                            modules = map.iter().count(),
                            "permission map loaded"
                        );
                        Ok(Arc::new(map))
                    }
                    Err(err) => {
                        *slot.last_error.lock().expect("permission store poisoned") =
                            Some(err.to_string());
                        tracing::error!(
                            user_id = %user_id,
                            tenant_id = %tenant_id,
                            error = %err,
                            "permission map load failed"
                        );
                        Err(err)
                    }
                }
            })
            .await?;

        Ok(map.clone())
    }

    /// Current state for the key without triggering a fetch. A key that was
    /// never requested reports `Loading` - pending and denied must stay
    /// distinguishable to callers.
    pub fn state(&self, user_id: Uuid, tenant_id: Uuid) -> MapState {
        let entries = self.entries.lock().expect("permission store poisoned");
        match entries.get(&(user_id, tenant_id)) {
            None => MapState::Loading,
            Some(slot) => match slot.cell.get() {
                Some(map) => MapState::Loaded(map.clone()),
                None => match slot.last_error.lock().expect("permission store poisoned").clone() {
                    Some(error) => MapState::Failed(error),
                    None => MapState::Loading,
                },
            },
        }
    }

    /// Drop every cached map and flag for one user. Called on logout and
    /// whenever the user's role assignments change.
    pub fn invalidate(&self, user_id: Uuid) {
        self.entries
            .lock()
            .expect("permission store poisoned")
            .retain(|(user, _), _| *user != user_id);
        self.password_changed
            .lock()
            .expect("permission store poisoned")
            .remove(&user_id);
    }

    /// Drop every cached map for one tenant. Called when a role's permission
    /// rows change, since any user holding the role is now stale.
    pub fn invalidate_tenant(&self, tenant_id: Uuid) {
        self.entries
            .lock()
            .expect("permission store poisoned")
            .retain(|(_, tenant), _| *tenant != tenant_id);
    }

    pub fn clear(&self) {
        self.entries.lock().expect("permission store poisoned").clear();
        self.password_changed
            .lock()
            .expect("permission store poisoned")
            .clear();
    }

    /// Cached outcome of the password-change check. Only the positive
    /// outcome is cached; a user still required to change their password is
    /// re-checked (and redirected) on every request.
    pub fn password_changed(&self, user_id: Uuid) -> Option<bool> {
        self.password_changed
            .lock()
            .expect("permission store poisoned")
            .get(&user_id)
            .copied()
    }

    pub fn set_password_changed(&self, user_id: Uuid, changed: bool) {
        self.password_changed
            .lock()
            .expect("permission store poisoned")
            .insert(user_id, changed);
    }

    /// Number of database fetches performed, for diagnostics.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

/// Build the merged map: every capability row of every role the user holds in
/// the tenant, OR-merged per lowercased module name.
async fn fetch_permission_map(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<PermissionMap> {
    let rows = sqlx::query(
        "SELECT p.module_name, p.can_create, p.can_retrieve, p.can_update, p.can_delete, \
                p.can_comment, p.can_create_task \
         FROM user_roles ur \
         JOIN permissions p ON p.role_id = ur.role_id AND p.tenant_id = ur.tenant_id \
         JOIN roles r ON r.id = ur.role_id \
         WHERE ur.user_id = ? AND ur.tenant_id = ? AND r.is_active = 1",
    )
    .bind(user_id.to_string())
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;

    let mut map = PermissionMap::new();
    for row in rows {
        let module: String = row.get("module_name");
        let caps = Capabilities {
            can_create: row.get("can_create"),
            can_retrieve: row.get("can_retrieve"),
            can_update: row.get("can_update"),
            can_delete: row.get("can_delete"),
            can_comment: row.get("can_comment"),
            can_create_task: row.get("can_create_task"),
        };
        map.grant(&module, &caps);
    }

    Ok(map)
}
