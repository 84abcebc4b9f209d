//! User administration: provisioning with the default password, search,
//! deactivation effects, and dashboard counts.

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

mod common;
use common::{body_json, login, request, seed_user_with_caps, send, spawn_app, PASSWORD};

const USER_ADMIN_GRANTS: &[(&str, &[&str])] = &[
    ("users", &["retrieve", "create", "update", "delete"]),
    ("dashboard", &["retrieve"]),
];

#[tokio::test]
async fn user_admin_flow() -> Result<()> {
    let t = spawn_app().await?;
    let admin_id = seed_user_with_caps(&t.pool, "admin@example.com", "User Admin", USER_ADMIN_GRANTS).await?;
    let token = login(&t.app, "admin@example.com", PASSWORD).await?;

    // Provision without a password: account starts on the default password.
    let resp = send(
        &t.app,
        request(
            "POST",
            "/api/users",
            Some(&token),
            Some(json!({"email": "newbie@example.com", "full_name": "New Person"})),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await?;
    let new_id = body["data"]["id"].as_str().unwrap().to_string();

    // Duplicate email conflicts, case-insensitively.
    let resp = send(
        &t.app,
        request(
            "POST",
            "/api/users",
            Some(&token),
            Some(json!({"email": "NEWBIE@example.com", "full_name": "Duplicate"})),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // The provisioned account logs in with the default password and is
    // flagged for rotation.
    let resp = send(
        &t.app,
        request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "newbie@example.com", "password": "pass"})),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await?;
    assert_eq!(body["data"]["requires_password_change"], true);

    // Search matches on name fragments.
    let resp = send(&t.app, request("GET", "/api/users/search?q=person", Some(&token), None)).await?;
    let body = body_json(resp).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["email"], "newbie@example.com");

    // Self-deletion is refused; deleting the other account works.
    let resp = send(&t.app, request("DELETE", &format!("/api/users/{admin_id}"), Some(&token), None)).await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = send(&t.app, request("DELETE", &format!("/api/users/{new_id}"), Some(&token), None)).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&t.app, request("GET", &format!("/api/users/{new_id}"), Some(&token), None)).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // Deleted accounts cannot log in anymore.
    let resp = send(
        &t.app,
        request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "newbie@example.com", "password": "pass"})),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn deactivation_cuts_access_immediately() -> Result<()> {
    let t = spawn_app().await?;
    seed_user_with_caps(&t.pool, "admin@example.com", "User Admin", USER_ADMIN_GRANTS).await?;
    let member_id =
        seed_user_with_caps(&t.pool, "member@example.com", "Member", &[("tasks", &["retrieve"])]).await?;

    let admin = login(&t.app, "admin@example.com", PASSWORD).await?;
    let member = login(&t.app, "member@example.com", PASSWORD).await?;

    let resp = send(&t.app, request("GET", "/api/tasks", Some(&member), None)).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(
        &t.app,
        request(
            "PUT",
            &format!("/api/users/{member_id}"),
            Some(&admin),
            Some(json!({"is_active": false})),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // Session restoration refuses inactive users on the very next request.
    let resp = send(&t.app, request("GET", "/api/tasks", Some(&member), None)).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn dashboard_counts_reflect_tenant_rows() -> Result<()> {
    let t = spawn_app().await?;
    seed_user_with_caps(
        &t.pool,
        "admin@example.com",
        "Admin Lite",
        &[
            ("dashboard", &["retrieve"]),
            ("tasks", &["retrieve", "create"]),
            ("security_controls", &["retrieve", "create"]),
        ],
    )
    .await?;
    let token = login(&t.app, "admin@example.com", PASSWORD).await?;

    send(
        &t.app,
        request("POST", "/api/security-controls", Some(&token), Some(json!({"name": "Policy A"}))),
    )
    .await?;
    for title in ["one", "two"] {
        send(&t.app, request("POST", "/api/tasks", Some(&token), Some(json!({"title": title})))).await?;
    }

    let resp = send(&t.app, request("GET", "/api/dashboard/counts", Some(&token), None)).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await?;
    assert_eq!(body["data"]["security_controls"], 1);
    assert_eq!(body["data"]["tasks"], 2);
    assert_eq!(body["data"]["open_tasks"], 2);
    assert_eq!(body["data"]["users"], 1);

    Ok(())
}
