#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt;
use uuid::Uuid;

use alchemy::create_app;
use alchemy::utils::hash_password;

pub const DEFAULT_TENANT: &str = "00000000-0000-0000-0000-000000000001";
pub const PASSWORD: &str = "Str0ngPassw0rd!";

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub async fn spawn_app() -> Result<TestApp> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok(TestApp {
        app,
        pool,
        _dir: dir,
    })
}

/// Insert an active user who has already been through the first-login
/// password rotation, so the guard's password stage lets them straight in.
pub async fn seed_user(pool: &SqlitePool, email: &str) -> Result<Uuid> {
    seed_user_with_password(pool, email, PASSWORD).await
}

pub async fn seed_user_with_password(pool: &SqlitePool, email: &str, password: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let hash = hash_password(password)?;
    sqlx::query(
        "INSERT INTO users (id, tenant_id, email, full_name, password_hash, is_active, \
                            first_login, last_login, login_count, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 1, '2024-01-01T00:00:00Z', '2024-01-05T00:00:00Z', 3, \
                 '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
    )
    .bind(id.to_string())
    .bind(DEFAULT_TENANT)
    .bind(email)
    .bind(format!("Test {email}"))
    .bind(hash)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Insert a user still on the provisioning default password and first login,
/// so the guard forces them through the change-password flow.
pub async fn seed_first_login_user(pool: &SqlitePool, email: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let hash = hash_password("pass")?;
    sqlx::query(
        "INSERT INTO users (id, tenant_id, email, full_name, password_hash, is_active, \
                            first_login, last_login, login_count, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 1, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z', 1, \
                 '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
    )
    .bind(id.to_string())
    .bind(DEFAULT_TENANT)
    .bind(email)
    .bind(format!("Test {email}"))
    .bind(hash)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn seed_role(pool: &SqlitePool, name: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO roles (id, tenant_id, role_name, is_system_role, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, 0, 1, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
    )
    .bind(id.to_string())
    .bind(DEFAULT_TENANT)
    .bind(name)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn assign_role(pool: &SqlitePool, user_id: Uuid, role_id: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO user_roles (id, tenant_id, user_id, role_id, created_at) \
         VALUES (?, ?, ?, ?, '2024-01-01T00:00:00Z')",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(DEFAULT_TENANT)
    .bind(user_id.to_string())
    .bind(role_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Grant capability flags for (role, module); `actions` uses the flag names
/// without the can_ prefix, e.g. ["retrieve", "create"].
pub async fn grant(pool: &SqlitePool, role_id: Uuid, module: &str, actions: &[&str]) -> Result<()> {
    let has = |name: &str| actions.contains(&name);
    sqlx::query(
        "INSERT INTO permissions (id, tenant_id, role_id, module_name, can_create, can_retrieve, \
                                  can_update, can_delete, can_comment, can_create_task, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z') \
         ON CONFLICT (role_id, module_name, tenant_id) DO UPDATE SET \
           can_create = excluded.can_create, can_retrieve = excluded.can_retrieve, \
           can_update = excluded.can_update, can_delete = excluded.can_delete, \
           can_comment = excluded.can_comment, can_create_task = excluded.can_create_task",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(DEFAULT_TENANT)
    .bind(role_id.to_string())
    .bind(module)
    .bind(has("create"))
    .bind(has("retrieve"))
    .bind(has("update"))
    .bind(has("delete"))
    .bind(has("comment"))
    .bind(has("create_task"))
    .execute(pool)
    .await?;
    Ok(())
}

/// Convenience: user + role + capability grants in one call.
pub async fn seed_user_with_caps(
    pool: &SqlitePool,
    email: &str,
    role_name: &str,
    grants: &[(&str, &[&str])],
) -> Result<Uuid> {
    let user_id = seed_user(pool, email).await?;
    let role_id = seed_role(pool, role_name).await?;
    assign_role(pool, user_id, role_id).await?;
    for (module, actions) in grants {
        grant(pool, role_id, module, actions).await?;
    }
    Ok(user_id)
}

pub async fn login(app: &Router, email: &str, password: &str) -> Result<String> {
    let resp = send(
        app,
        request("POST", "/api/auth/login", None, Some(json!({"email": email, "password": password}))),
    )
    .await?;
    anyhow::ensure!(resp.status() == StatusCode::OK, "login failed: {}", resp.status());
    let body = body_json(resp).await?;
    body["data"]["token"]
        .as_str()
        .map(str::to_string)
        .context("token missing from login response")
}

pub fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .expect("request build failed"),
        None => builder.body(Body::empty()).expect("request build failed"),
    }
}

pub async fn send(app: &Router, req: Request<Body>) -> Result<Response> {
    Ok(app.clone().oneshot(req).await?)
}

pub async fn body_json(resp: Response) -> Result<Value> {
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Assert the standard error envelope and return its machine code.
pub async fn error_code(resp: Response) -> Result<String> {
    let body = body_json(resp).await?;
    anyhow::ensure!(body["data"].is_null(), "error envelope must carry null data");
    body["error"]["code"]
        .as_str()
        .map(str::to_string)
        .context("error code missing")
}
