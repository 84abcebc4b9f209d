//! Forced password rotation: first-login users are redirected by the guard
//! until they change the provisioning password, and the change itself
//! enforces the strength policy.

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

mod common;
use common::{
    body_json, error_code, login, request, seed_first_login_user, seed_user_with_caps, send, spawn_app,
    PASSWORD,
};

#[tokio::test]
async fn first_login_forces_password_change() -> Result<()> {
    let t = spawn_app().await?;
    seed_first_login_user(&t.pool, "fresh@example.com").await?;

    // Login succeeds and flags the required change.
    let resp = send(
        &t.app,
        request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "fresh@example.com", "password": "pass"})),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await?;
    assert_eq!(body["data"]["requires_password_change"], true);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    // Guarded routes redirect to the password-change flow, not to home.
    let resp = send(&t.app, request("GET", "/api/tasks", Some(&token), None)).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(resp).await?, "password_change_required");

    // The auth surface itself stays reachable so the user can get out.
    let resp = send(
        &t.app,
        request("GET", "/api/auth/check-password-change", Some(&token), None),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await?;
    assert_eq!(body["data"]["requires_password_change"], true);

    // Weak replacement is rejected by the strength policy.
    let resp = send(
        &t.app,
        request(
            "POST",
            "/api/auth/change-password",
            Some(&token),
            Some(json!({"current_password": "pass", "new_password": "weak"})),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Wrong current password is rejected.
    let resp = send(
        &t.app,
        request(
            "POST",
            "/api/auth/change-password",
            Some(&token),
            Some(json!({"current_password": "nope", "new_password": PASSWORD})),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // A strong replacement goes through.
    let resp = send(
        &t.app,
        request(
            "POST",
            "/api/auth/change-password",
            Some(&token),
            Some(json!({"current_password": "pass", "new_password": PASSWORD})),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // The guard no longer redirects (permission stage now decides; this user
    // has no grants, so the denial is permission_denied, not password).
    let resp = send(&t.app, request("GET", "/api/tasks", Some(&token), None)).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(resp).await?, "permission_denied");

    // And the check endpoint reports the rotation as done.
    let resp = send(
        &t.app,
        request("GET", "/api/auth/check-password-change", Some(&token), None),
    )
    .await?;
    let body = body_json(resp).await?;
    assert_eq!(body["data"]["requires_password_change"], false);

    Ok(())
}

#[tokio::test]
async fn rotated_user_with_grants_reaches_content() -> Result<()> {
    let t = spawn_app().await?;
    seed_user_with_caps(&t.pool, "settled@example.com", "Reader", &[("tasks", &["retrieve"])]).await?;

    let token = login(&t.app, "settled@example.com", PASSWORD).await?;
    let resp = send(&t.app, request("GET", "/api/tasks", Some(&token), None)).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // New password must differ from the current one.
    let resp = send(
        &t.app,
        request(
            "POST",
            "/api/auth/change-password",
            Some(&token),
            Some(json!({"current_password": PASSWORD, "new_password": PASSWORD})),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    Ok(())
}
