use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use bg_core::error::OrchestratorError;
use bg_core::models::{Caller, CleanupRequest, DeployRequest, HistoryRequest, ScopeRequest};
use bg_core::services::SlotManager;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::AppError;
use crate::state::AppState;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Body of `POST /api/tool`: `{ "tool": "...", "params": { ... } }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tool", content = "params", rename_all = "snake_case")]
pub enum ToolCall {
    Deploy(DeployRequest),
    Promote(ScopeRequest),
    Rollback(ScopeRequest),
    Cleanup(CleanupRequest),
    SlotStatus(ScopeRequest),
    DeploymentHistory(HistoryRequest),
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::Deploy(_) => "deploy",
            ToolCall::Promote(_) => "promote",
            ToolCall::Rollback(_) => "rollback",
            ToolCall::Cleanup(_) => "cleanup",
            ToolCall::SlotStatus(_) => "slot_status",
            ToolCall::DeploymentHistory(_) => "deployment_history",
        }
    }

    pub fn mutates(&self) -> bool {
        !matches!(self, ToolCall::SlotStatus(_) | ToolCall::DeploymentHistory(_))
    }

    pub fn project_name(&self) -> &str {
        match self {
            ToolCall::Deploy(r) => &r.project_name,
            ToolCall::Promote(r) | ToolCall::Rollback(r) | ToolCall::SlotStatus(r) => &r.project_name,
            ToolCall::Cleanup(r) => &r.project_name,
            ToolCall::DeploymentHistory(r) => &r.project_name,
        }
    }
}

pub async fn call_tool(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let started = Instant::now();
    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let call: ToolCall = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid tool call: {e}")))?;

    if call.mutates() && !caller.can_mutate() {
        tracing::warn!(
            tool = call.name(),
            team = %caller.team_id,
            correlation_id = %correlation_id,
            "viewer attempted a mutating tool"
        );
        return Err(AppError::forbidden(format!(
            "role {:?} may not call {}",
            caller.role,
            call.name()
        )));
    }

    let tool = call.name();
    let project = call.project_name().to_string();
    let mut body = dispatch(&state.manager, &caller, call).await?;
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);

    body.entry("duration")
        .or_insert_with(|| json!(started.elapsed().as_millis() as u64));
    body.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
    body.insert("correlationId".into(), json!(correlation_id));

    tracing::info!(
        tool,
        %project,
        success,
        correlation_id = %correlation_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "tool call finished"
    );

    let mut response = Json(Value::Object(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    Ok(response)
}

async fn dispatch(
    manager: &SlotManager,
    caller: &Caller,
    call: ToolCall,
) -> Result<Map<String, Value>, AppError> {
    match call {
        ToolCall::Deploy(req) => to_object(&manager.deploy(caller, &req).await),
        ToolCall::Promote(req) => to_object(&manager.promote(caller, &req).await),
        ToolCall::Rollback(req) => to_object(&manager.rollback(caller, &req).await),
        ToolCall::Cleanup(req) => to_object(&manager.cleanup(caller, &req).await),
        ToolCall::SlotStatus(req) => match manager.slot_status(caller, &req).await {
            Ok(slots) => {
                let mut body = to_object(&slots)?;
                body.insert("success".into(), json!(true));
                Ok(body)
            }
            Err(e) => Ok(failure(&e)),
        },
        ToolCall::DeploymentHistory(req) => match manager.deployment_history(caller, &req).await {
            Ok(records) => {
                let mut body = Map::new();
                body.insert("success".into(), json!(true));
                body.insert("deployments".into(), to_value(&records)?);
                Ok(body)
            }
            Err(e) => Ok(failure(&e)),
        },
    }
}

fn failure(e: &OrchestratorError) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("success".into(), json!(false));
    body.insert("error".into(), json!(e.to_string()));
    body.insert("errorCode".into(), json!(e.code()));
    body
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::internal(format!("serialize result: {e}")))
}

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, AppError> {
    match to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::internal(format!("result is not an object: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_core::models::Environment;

    #[test]
    fn parses_tagged_calls() {
        let call: ToolCall = serde_json::from_value(json!({
            "tool": "deploy",
            "params": { "projectName": "demo", "environment": "staging", "version": "v3" }
        }))
        .unwrap();
        let ToolCall::Deploy(req) = &call else {
            panic!("expected deploy, got {call:?}");
        };
        assert_eq!(req.environment, Environment::Staging);
        assert_eq!(req.version.as_deref(), Some("v3"));
        assert!(call.mutates());

        let call: ToolCall = serde_json::from_value(json!({
            "tool": "deployment_history",
            "params": { "projectName": "demo", "environment": "production" }
        }))
        .unwrap();
        assert_eq!(call.name(), "deployment_history");
        assert!(!call.mutates());
        assert_eq!(call.project_name(), "demo");
    }

    #[test]
    fn rejects_unknown_tools_and_fields() {
        let unknown = serde_json::from_value::<ToolCall>(json!({
            "tool": "scale",
            "params": { "projectName": "demo", "environment": "production" }
        }));
        assert!(unknown.is_err());

        let extra = serde_json::from_value::<ToolCall>(json!({
            "tool": "promote",
            "params": { "projectName": "demo", "environment": "production", "slot": "blue" }
        }));
        assert!(extra.is_err());
    }
}
