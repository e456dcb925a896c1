use std::collections::HashMap;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bg_core::models::config::ApiKeyConfig;
use bg_core::models::Caller;

use crate::error::AppError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// API keys from config, each resolving to a team and role.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: HashMap<String, Caller>,
}

impl ApiKeys {
    pub fn from_config(keys: &[ApiKeyConfig]) -> Self {
        Self {
            keys: keys
                .iter()
                .map(|k| (k.key.clone(), Caller::new(&k.team_id, k.role)))
                .collect(),
        }
    }

    pub fn resolve(&self, key: &str) -> Option<&Caller> {
        self.keys.get(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Resolve `x-api-key` to a [`Caller`] stored in the request extensions.
/// Missing or unknown keys never reach the handler.
pub async fn require_api_key(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(key) = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
    else {
        return AppError::unauthorized("missing x-api-key header").into_response();
    };

    let Some(caller) = state.keys.resolve(key).cloned() else {
        tracing::warn!(path = %req.uri().path(), "rejected unknown API key");
        return AppError::unauthorized("invalid API key").into_response();
    };

    req.extensions_mut().insert(caller);
    next.run(req).await
}
