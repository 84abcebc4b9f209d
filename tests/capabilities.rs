//! The affordance endpoint: per-module gate statuses the client renders
//! without re-deriving policy.

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::Value;

mod common;
use common::{
    assign_role, body_json, login, request, seed_role, seed_user, seed_user_with_caps, send, spawn_app,
    PASSWORD,
};

fn module<'a>(body: &'a Value, name: &str) -> &'a Value {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["module"] == name)
        .unwrap_or_else(|| panic!("module {name} missing from capabilities"))
}

fn status<'a>(module: &'a Value, action: &str) -> &'a Value {
    &module["actions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["action"] == action)
        .unwrap_or_else(|| panic!("action {action} missing"))["status"]
}

#[tokio::test]
async fn capability_answers_follow_the_permission_map() -> Result<()> {
    let t = spawn_app().await?;
    seed_user_with_caps(
        &t.pool,
        "member@example.com",
        "Member",
        &[("tasks", &["retrieve", "create"])],
    )
    .await?;
    let token = login(&t.app, "member@example.com", PASSWORD).await?;

    let resp = send(&t.app, request("GET", "/api/capabilities", Some(&token), None)).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await?;

    let tasks = module(&body, "tasks");
    assert_eq!(status(tasks, "retrieve")["state"], "enabled");
    assert_eq!(status(tasks, "create")["state"], "enabled");
    assert_eq!(status(tasks, "delete")["state"], "disabled");
    assert_eq!(
        status(tasks, "delete")["reason"],
        "You do not have permission to delete tasks"
    );

    // Ungranted module is disabled across the board, never enabled.
    let controls = module(&body, "security_controls");
    for action in ["create", "retrieve", "update", "delete", "comment", "create_task"] {
        assert_eq!(status(controls, action)["state"], "disabled", "{action} must be disabled");
    }

    Ok(())
}

#[tokio::test]
async fn privileged_sessions_see_everything_enabled() -> Result<()> {
    let t = spawn_app().await?;
    let user_id = seed_user(&t.pool, "root@example.com").await?;
    let role_id = seed_role(&t.pool, "Super Admin II").await?;
    assign_role(&t.pool, user_id, role_id).await?;
    // "Super Admin II" is NOT privileged; use the real name with odd casing.
    let real = seed_role(&t.pool, "  internal   auditor ").await?;
    assign_role(&t.pool, user_id, real).await?;

    let token = login(&t.app, "root@example.com", PASSWORD).await?;
    let resp = send(&t.app, request("GET", "/api/capabilities", Some(&token), None)).await?;
    let body = body_json(resp).await?;

    for entry in body["data"].as_array().unwrap() {
        for action in entry["actions"].as_array().unwrap() {
            assert_eq!(
                action["status"]["state"], "enabled",
                "privileged session must see {}/{} enabled",
                entry["module"], action["action"]
            );
        }
    }

    Ok(())
}
