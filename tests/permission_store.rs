//! Permission store semantics exercised against a real database: single
//! in-flight load per key, observable loading/loaded/failed states, and
//! invalidation scoping.

use anyhow::Result;
use uuid::Uuid;

use alchemy::authz::{Action, MapState, PermissionStore};

mod common;
use common::{assign_role, grant, seed_role, seed_user, spawn_app, DEFAULT_TENANT};

fn tenant() -> Uuid {
    Uuid::parse_str(DEFAULT_TENANT).expect("default tenant uuid")
}

#[tokio::test]
async fn concurrent_loads_share_one_fetch() -> Result<()> {
    let t = spawn_app().await?;
    let user_id = seed_user(&t.pool, "store@example.com").await?;
    let role_id = seed_role(&t.pool, "Store Role").await?;
    assign_role(&t.pool, user_id, role_id).await?;
    grant(&t.pool, role_id, "tasks", &["retrieve", "create"]).await?;

    let store = PermissionStore::new(t.pool.clone());

    let (a, b) = tokio::join!(store.load(user_id, tenant()), store.load(user_id, tenant()));
    let (a, b) = (a?, b?);

    assert_eq!(store.fetch_count(), 1, "concurrent loads for one key must share a fetch");
    assert!(a.has_permission("tasks", Action::Retrieve));
    assert!(b.has_permission("tasks", Action::Create));
    assert!(!a.has_permission("tasks", Action::Delete));

    // Subsequent loads are served from cache.
    store.load(user_id, tenant()).await?;
    assert_eq!(store.fetch_count(), 1);

    Ok(())
}

#[tokio::test]
async fn state_distinguishes_pending_loaded_and_empty() -> Result<()> {
    let t = spawn_app().await?;
    let user_id = seed_user(&t.pool, "pending@example.com").await?;

    let store = PermissionStore::new(t.pool.clone());

    // Never requested: still pending, not denied-final.
    assert!(store.state(user_id, tenant()).is_loading());

    let map = store.load(user_id, tenant()).await?;
    assert!(map.is_empty(), "user without roles loads an empty map");

    match store.state(user_id, tenant()) {
        MapState::Loaded(map) => assert!(!map.has_permission("tasks", Action::Retrieve)),
        other => panic!("expected Loaded, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn failed_load_is_observable_and_distinct_from_empty() -> Result<()> {
    let t = spawn_app().await?;
    let user_id = seed_user(&t.pool, "failing@example.com").await?;

    let store = PermissionStore::new(t.pool.clone());

    // Closing the pool makes the fetch fail.
    t.pool.close().await;

    let err = store.load(user_id, tenant()).await;
    assert!(err.is_err(), "load over a closed pool must fail");

    match store.state(user_id, tenant()) {
        MapState::Failed(_) => {}
        other => panic!("expected Failed, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn invalidation_scopes_to_user_and_tenant() -> Result<()> {
    let t = spawn_app().await?;
    let alice = seed_user(&t.pool, "alice@example.com").await?;
    let bob = seed_user(&t.pool, "bob@example.com").await?;
    let role_id = seed_role(&t.pool, "Shared Role").await?;
    assign_role(&t.pool, alice, role_id).await?;
    assign_role(&t.pool, bob, role_id).await?;
    grant(&t.pool, role_id, "tasks", &["retrieve"]).await?;

    let store = PermissionStore::new(t.pool.clone());
    store.load(alice, tenant()).await?;
    store.load(bob, tenant()).await?;
    store.set_password_changed(alice, true);
    assert_eq!(store.fetch_count(), 2);

    // Per-user invalidation drops the map and the password flag for that
    // user only.
    store.invalidate(alice);
    assert!(store.state(alice, tenant()).is_loading());
    assert!(store.password_changed(alice).is_none());
    assert!(matches!(store.state(bob, tenant()), MapState::Loaded(_)));

    store.load(alice, tenant()).await?;
    assert_eq!(store.fetch_count(), 3, "invalidated entry must be re-fetched");

    // Tenant-wide invalidation drops every user in the tenant.
    store.invalidate_tenant(tenant());
    assert!(store.state(alice, tenant()).is_loading());
    assert!(store.state(bob, tenant()).is_loading());

    Ok(())
}
