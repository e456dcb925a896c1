use std::sync::Arc;

use axum::http::StatusCode;
use bg_core::models::config::ApiKeyConfig;
use bg_core::models::{PlatformConfig, Project, Role};
use bg_core::services::testing::{Harness, TEAM};
use bg_core::services::SlotManager;
use bg_server::auth::ApiKeys;
use bg_server::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MEMBER_KEY: &str = "member-key";
const VIEWER_KEY: &str = "viewer-key";
const OUTSIDER_KEY: &str = "outsider-key";
const ADMIN_KEY: &str = "admin-key";

fn api_keys() -> Vec<ApiKeyConfig> {
    let key = |key: &str, team: &str, role| ApiKeyConfig {
        key: key.into(),
        team_id: team.into(),
        role,
    };
    vec![
        key(MEMBER_KEY, TEAM, Role::Member),
        key(VIEWER_KEY, TEAM, Role::Viewer),
        key(OUTSIDER_KEY, "team-b", Role::Member),
        key(ADMIN_KEY, "ops", Role::Admin),
    ]
}

fn app(h: &Harness) -> axum::Router {
    build_router(AppState::new(
        h.manager.clone(),
        ApiKeys::from_config(&api_keys()),
    ))
}

/// POST to `/api/tool` via `oneshot`; returns (status, correlation header, JSON body).
async fn call(
    app: axum::Router,
    key: Option<&str>,
    correlation: Option<&str>,
    body: Value,
) -> (StatusCode, Option<String>, Value) {
    let mut req = axum::http::Request::builder()
        .method("POST")
        .uri("/api/tool")
        .header("content-type", "application/json");
    if let Some(key) = key {
        req = req.header("x-api-key", key);
    }
    if let Some(id) = correlation {
        req = req.header("x-correlation-id", id);
    }
    let req = req
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let correlation = response
        .headers()
        .get("x-correlation-id")
        .map(|v| v.to_str().unwrap().to_string());
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, correlation, json)
}

async fn tool(app: axum::Router, key: &str, tool: &str, params: Value) -> (StatusCode, Value) {
    let (status, _, body) = call(app, Some(key), None, json!({ "tool": tool, "params": params })).await;
    (status, body)
}

fn scope() -> Value {
    json!({ "projectName": "demo", "environment": "production" })
}

fn deploy_params(version: &str) -> Value {
    json!({ "projectName": "demo", "environment": "production", "version": version })
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_needs_no_key() {
    let h = Harness::new().await;
    let req = axum::http::Request::builder()
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app(&h).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn missing_or_unknown_key_is_unauthorized() {
    let h = Harness::new().await;
    let body = json!({ "tool": "slot_status", "params": scope() });

    let (status, _, json) = call(app(&h), None, None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("x-api-key"));

    let (status, _, json) = call(app(&h), Some("bogus"), None, body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn unknown_tool_and_bad_params_are_bad_requests() {
    let h = Harness::new().await;
    let (status, json) = tool(app(&h), MEMBER_KEY, "scale", scope()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["errorCode"], "INVALID_REQUEST");

    let (status, json) = tool(
        app(&h),
        MEMBER_KEY,
        "promote",
        json!({ "projectName": "demo", "environment": "qa" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    let (status, _, _) = call(app(&h), Some(MEMBER_KEY), None, json!("deploy")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn correlation_id_is_echoed_or_generated() {
    let h = Harness::new().await;
    let body = json!({ "tool": "deployment_history", "params": scope() });

    let (status, header, json) = call(app(&h), Some(MEMBER_KEY), Some("req-42"), body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header.as_deref(), Some("req-42"));
    assert_eq!(json["correlationId"], "req-42");

    let (_, header, json) = call(app(&h), Some(MEMBER_KEY), None, body).await;
    let generated = json["correlationId"].as_str().unwrap();
    assert_eq!(generated.len(), 36);
    assert_eq!(header.as_deref(), Some(generated));
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploy_returns_result_envelope() {
    let h = Harness::new().await;
    let (status, json) = tool(app(&h), MEMBER_KEY, "deploy", deploy_params("v1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true, "{json}");
    assert_eq!(json["slot"], "blue");
    assert_eq!(json["port"], 4100);
    assert_eq!(json["previewUrl"], "https://demo-blue.preview.apps.test");
    assert!(json["deploymentId"].is_string());
    assert!(json["duration"].is_u64());
    assert!(json["timestamp"].is_string());
    assert!(json["correlationId"].is_string());
    assert!(!json["steps"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn tool_failure_is_ok_with_error_code() {
    let h = Harness::new().await;
    h.runtime.set_fail_run(true);
    let (status, json) = tool(app(&h), MEMBER_KEY, "deploy", deploy_params("v1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], false);
    assert_eq!(json["errorCode"], "CONTAINER_START_FAILED");
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn viewer_may_query_but_not_mutate() {
    let h = Harness::new().await;
    let (status, json) = tool(app(&h), VIEWER_KEY, "deploy", deploy_params("v1")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["errorCode"], "ACCESS_DENIED");
    assert!(h.runtime.pulled().is_empty());

    let (status, json) = tool(app(&h), MEMBER_KEY, "deploy", deploy_params("v1")).await;
    assert_eq!((status, json["success"].as_bool()), (StatusCode::OK, Some(true)));

    let (status, json) = tool(app(&h), VIEWER_KEY, "slot_status", scope()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["projectName"], "demo");
    assert_eq!(json["blue"]["state"], "deployed");
}

#[tokio::test]
async fn other_teams_are_denied_but_admins_cross() {
    let h = Harness::new().await;
    let (status, json) = tool(app(&h), OUTSIDER_KEY, "deploy", deploy_params("v1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], false);
    assert_eq!(json["errorCode"], "ACCESS_DENIED");

    let (_, json) = tool(app(&h), ADMIN_KEY, "deploy", deploy_params("v1")).await;
    assert_eq!(json["success"], true, "{json}");
}

#[tokio::test]
async fn deploy_promote_rollback_cleanup_flow() {
    let h = Harness::new().await;
    for version in ["v1", "v2"] {
        let (_, json) = tool(app(&h), MEMBER_KEY, "deploy", deploy_params(version)).await;
        assert_eq!(json["success"], true, "{json}");
        let (_, json) = tool(app(&h), MEMBER_KEY, "promote", scope()).await;
        assert_eq!(json["success"], true, "{json}");
        assert_eq!(json["newVersion"], version);
    }

    let (_, json) = tool(app(&h), MEMBER_KEY, "rollback", scope()).await;
    assert_eq!(json["success"], true, "{json}");
    assert_eq!(json["toSlot"], "blue");
    assert_eq!(json["restoredVersion"], "v1");
    assert_eq!(json["productionUrl"], "https://demo.apps.test");

    let (_, json) = tool(app(&h), MEMBER_KEY, "cleanup", scope()).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["errorCode"], "GRACE_PERIOD_ACTIVE");

    let forced = json!({ "projectName": "demo", "environment": "production", "force": true });
    let (_, json) = tool(app(&h), MEMBER_KEY, "cleanup", forced).await;
    assert_eq!(json["success"], true, "{json}");
    assert_eq!(json["slot"], "green");
    assert_eq!(json["removedVersion"], "v2");

    let (_, json) = tool(app(&h), VIEWER_KEY, "deployment_history", scope()).await;
    let deployments = json["deployments"].as_array().unwrap();
    assert_eq!(deployments.len(), 2);
    assert_eq!(deployments[0]["version"], "v2");
}

// ---------------------------------------------------------------------------
// Real stores
// ---------------------------------------------------------------------------

#[tokio::test]
async fn serves_from_redb_backed_manager() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PlatformConfig::with_data_dir(dir.path().to_path_buf());
    config.projects = vec![Project {
        name: "demo".into(),
        team_id: TEAM.into(),
        domain: None,
    }];
    let manager = SlotManager::from_config(config).unwrap();
    assert_eq!(manager.seed_projects().await.unwrap(), 1);
    let app = build_router(AppState::new(
        Arc::new(manager),
        ApiKeys::from_config(&api_keys()),
    ));

    let (status, json) = tool(app.clone(), VIEWER_KEY, "slot_status", scope()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], false);
    assert_eq!(json["errorCode"], "SLOTS_NOT_FOUND");

    let (_, json) = tool(app.clone(), VIEWER_KEY, "deployment_history", scope()).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["deployments"], json!([]));

    let missing = json!({ "projectName": "ghost", "environment": "production" });
    let (_, json) = tool(app, VIEWER_KEY, "slot_status", missing).await;
    assert_eq!(json["errorCode"], "PROJECT_NOT_FOUND");
}
