use serde::{Deserialize, Serialize};

use super::environment::Environment;

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeployRequest {
    pub project_name: String,
    pub environment: Environment,
    #[serde(default)]
    pub version: Option<String>,
    /// Fully qualified image. Skips registry resolution when set.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub skip_healthcheck: bool,
}

impl DeployRequest {
    /// Explicit version, else the tag of an explicit image, else `latest`.
    pub fn resolved_version(&self) -> String {
        if let Some(version) = self.version.as_deref().filter(|v| !v.is_empty()) {
            return version.to_string();
        }
        self.image
            .as_deref()
            .and_then(image_tag)
            .unwrap_or("latest")
            .to_string()
    }
}

fn image_tag(image: &str) -> Option<&str> {
    let image = image.split('@').next().unwrap_or(image);
    let name = image.rsplit('/').next().unwrap_or(image);
    name.split_once(':').map(|(_, tag)| tag).filter(|t| !t.is_empty())
}

/// Project and environment an operation is scoped to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScopeRequest {
    pub project_name: String,
    pub environment: Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CleanupRequest {
    pub project_name: String,
    pub environment: Environment,
    /// Remove the grace slot even before its window closes.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HistoryRequest {
    pub project_name: String,
    pub environment: Environment,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}
