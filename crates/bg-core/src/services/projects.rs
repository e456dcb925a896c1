use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use async_trait::async_trait;
use regex::Regex;

use crate::error::{OrchestratorError, Result};
use crate::models::{Caller, Project};

static PROJECT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").unwrap());

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").unwrap());

/// Project names end up in container names, file names and hostnames.
pub fn validate_project_name(name: &str) -> Result<()> {
    if PROJECT_NAME.is_match(name) && !name.ends_with('-') {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidProjectName(name.to_string()))
    }
}

/// Versions end up in image tags, container labels and the proxy config.
pub fn validate_version(version: &str) -> Result<()> {
    if VERSION.is_match(version) {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidVersion(version.to_string()))
    }
}

/// Lookup of project ownership, owned by the wider platform.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Project>>;
    async fn put(&self, project: &Project) -> Result<()>;
}

/// Resolve `name` and check the caller's team may touch it.
pub async fn authorize(
    registry: &dyn ProjectRegistry,
    caller: &Caller,
    name: &str,
) -> Result<Project> {
    validate_project_name(name)?;
    let project = registry
        .get(name)
        .await?
        .ok_or_else(|| OrchestratorError::ProjectNotFound(name.to_string()))?;
    if !caller.can_access(&project) {
        return Err(OrchestratorError::AccessDenied {
            project: name.to_string(),
            team_id: caller.team_id.clone(),
        });
    }
    Ok(project)
}

#[derive(Default)]
pub struct MemoryProjectRegistry {
    projects: RwLock<HashMap<String, Project>>,
}

impl MemoryProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects(projects: impl IntoIterator<Item = Project>) -> Self {
        let registry = Self::new();
        if let Ok(mut map) = registry.projects.write() {
            map.extend(projects.into_iter().map(|p| (p.name.clone(), p)));
        }
        registry
    }
}

#[async_trait]
impl ProjectRegistry for MemoryProjectRegistry {
    async fn get(&self, name: &str) -> Result<Option<Project>> {
        let projects = self
            .projects
            .read()
            .map_err(|_| OrchestratorError::Store("project registry lock poisoned".into()))?;
        Ok(projects.get(name).cloned())
    }

    async fn put(&self, project: &Project) -> Result<()> {
        let mut projects = self
            .projects
            .write()
            .map_err(|_| OrchestratorError::Store("project registry lock poisoned".into()))?;
        projects.insert(project.name.clone(), project.clone());
        Ok(())
    }
}
