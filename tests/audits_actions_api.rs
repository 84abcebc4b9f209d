//! Audit and remediation-action flows, including audit comment trails and
//! the audit -> action linkage.

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

mod common;
use common::{body_json, login, request, seed_user_with_caps, send, spawn_app, PASSWORD};

#[tokio::test]
async fn audit_lifecycle_with_comments() -> Result<()> {
    let t = spawn_app().await?;
    seed_user_with_caps(
        &t.pool,
        "lead@example.com",
        "Audit Lead",
        &[("audits", &["retrieve", "create", "update", "delete", "comment"])],
    )
    .await?;
    let token = login(&t.app, "lead@example.com", PASSWORD).await?;

    let resp = send(
        &t.app,
        request(
            "POST",
            "/api/audits",
            Some(&token),
            Some(json!({
                "name": "SOC 2 Type II 2025",
                "audit_type": "external",
                "lead_auditor": "jordan@auditors.example"
            })),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await?;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["status"], "planned");

    let resp = send(
        &t.app,
        request(
            "PUT",
            &format!("/api/audits/{id}"),
            Some(&token),
            Some(json!({"status": "fieldwork"})),
        ),
    )
    .await?;
    let body = body_json(resp).await?;
    assert_eq!(body["data"]["status"], "fieldwork");
    assert_eq!(body["data"]["audit_type"], "external");

    for (text, time) in [("kickoff done", "2025-02-01T09:00"), ("samples requested", "2025-02-03T14:30")] {
        let resp = send(
            &t.app,
            request(
                "POST",
                &format!("/api/audits/{id}/comments"),
                Some(&token),
                Some(json!({"comment": {"text": text, "time": time, "author": "lead"}})),
            ),
        )
        .await?;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = send(&t.app, request("GET", &format!("/api/audits/{id}/comments"), Some(&token), None)).await?;
    let body = body_json(resp).await?;
    let texts: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["samples requested", "kickoff done"]);

    let resp = send(&t.app, request("DELETE", &format!("/api/audits/{id}"), Some(&token), None)).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&t.app, request("GET", "/api/audits", Some(&token), None)).await?;
    let body = body_json(resp).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    Ok(())
}

#[tokio::test]
async fn action_lifecycle() -> Result<()> {
    let t = spawn_app().await?;
    seed_user_with_caps(
        &t.pool,
        "remediator@example.com",
        "Remediation Owner",
        &[
            ("actions", &["retrieve", "create", "update", "delete"]),
            ("audits", &["retrieve", "create"]),
        ],
    )
    .await?;
    let token = login(&t.app, "remediator@example.com", PASSWORD).await?;

    let resp = send(
        &t.app,
        request("POST", "/api/audits", Some(&token), Some(json!({"name": "Internal ISMS"}))),
    )
    .await?;
    let body = body_json(resp).await?;
    let audit_id = body["data"]["id"].as_str().unwrap().to_string();

    let resp = send(
        &t.app,
        request(
            "POST",
            "/api/actions",
            Some(&token),
            Some(json!({
                "title": "Rotate shared credentials",
                "owner": "ops@corp.example",
                "audit_id": audit_id
            })),
        ),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await?;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["audit_id"].as_str().unwrap(), audit_id);

    let resp = send(
        &t.app,
        request(
            "PUT",
            &format!("/api/actions/{id}"),
            Some(&token),
            Some(json!({"status": "in_progress"})),
        ),
    )
    .await?;
    let body = body_json(resp).await?;
    assert_eq!(body["data"]["status"], "in_progress");
    assert_eq!(body["data"]["title"], "Rotate shared credentials");

    let resp = send(&t.app, request("DELETE", &format!("/api/actions/{id}"), Some(&token), None)).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&t.app, request("GET", &format!("/api/actions/{id}"), Some(&token), None)).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    Ok(())
}
