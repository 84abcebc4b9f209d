use anyhow::Result;
use axum::http::StatusCode;

mod common;
use common::{body_json, request, send, spawn_app};

#[tokio::test]
async fn health_endpoint_reports_db_ok() -> Result<()> {
    let t = spawn_app().await?;

    let resp = send(&t.app, request("GET", "/api/health", None, None)).await?;
    assert_eq!(resp.status(), StatusCode::OK, "health endpoint did not return 200");

    let v = body_json(resp).await?;
    assert_eq!(v.get("status").and_then(|s| s.as_str()), Some("ok"));
    let db_ok = v.get("db_ok").and_then(|b| b.as_bool()).unwrap_or(false);
    assert!(db_ok, "expected db_ok: true, got: {}", v);

    Ok(())
}
