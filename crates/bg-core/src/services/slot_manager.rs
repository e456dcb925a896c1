use std::sync::Arc;
use std::time::Duration;

use crate::error::{OrchestratorError, Result};
use crate::models::{
    Caller, DeploymentRecord, Environment, HistoryRequest, PlatformConfig, Project, ProjectSlots,
    ScopeRequest, SlotName,
};

use super::db::RegistryDb;
use super::env_store::{EnvStore, HostEnvFiles};
use super::health::{HealthChecker, HealthSettings};
use super::history::DeploymentHistory;
use super::locks::ProjectLocks;
use super::ports::PortAllocator;
use super::probe::{self, HttpProbe, ReqwestProbe};
use super::projects::{self, ProjectRegistry};
use super::proxy::{self, CaddyProxy, ReverseProxy};
use super::runtime::{ContainerCli, ContainerRuntime};
use super::state::{FileSlotBackend, SlotStore};

/// Everything the engine talks to outside its own memory.
pub struct Collaborators {
    pub store: SlotStore,
    pub history: Arc<dyn DeploymentHistory>,
    pub projects: Arc<dyn ProjectRegistry>,
    pub env_store: Arc<dyn EnvStore>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub probe: Arc<dyn HttpProbe>,
    pub proxy: Arc<dyn ReverseProxy>,
}

impl Collaborators {
    /// Production wiring: redb registry mirrored to JSON files, the container
    /// CLI, a reqwest probe and Caddy.
    pub fn from_config(config: &PlatformConfig) -> Result<Self> {
        let db = Arc::new(RegistryDb::open(&config.database_path())?);
        let mirror = Arc::new(FileSlotBackend::new(&config.slots_dir()));
        let probe = ReqwestProbe::new(Duration::from_secs(config.health.probe_timeout_secs))?;
        Ok(Self {
            store: SlotStore::new(db.clone(), mirror),
            history: db.clone(),
            projects: db.clone(),
            env_store: db,
            runtime: Arc::new(ContainerCli::new(&config.runtime)),
            probe: Arc::new(probe),
            proxy: Arc::new(CaddyProxy::new(&config.proxy_dir(), &config.proxy)),
        })
    }
}

/// Facade over the slot registry and the deploy, promote, rollback and
/// cleanup pipelines. One instance serves the whole process.
pub struct SlotManager {
    pub(crate) config: PlatformConfig,
    pub(crate) store: SlotStore,
    pub(crate) port_allocator: PortAllocator,
    pub(crate) history: Arc<dyn DeploymentHistory>,
    pub(crate) projects: Arc<dyn ProjectRegistry>,
    pub(crate) env_store: Arc<dyn EnvStore>,
    pub(crate) host_env: HostEnvFiles,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) probe: Arc<dyn HttpProbe>,
    pub(crate) proxy: Arc<dyn ReverseProxy>,
    pub(crate) health: HealthChecker,
    pub(crate) locks: ProjectLocks,
}

impl SlotManager {
    pub fn new(config: PlatformConfig, parts: Collaborators) -> Self {
        let settings = HealthSettings::from_config(&config.health, config.runtime.container_port);
        let health = HealthChecker::new(parts.runtime.clone(), parts.probe.clone(), settings);
        Self {
            host_env: HostEnvFiles::new(&config.env_dir()),
            store: parts.store,
            port_allocator: PortAllocator::new(),
            history: parts.history,
            projects: parts.projects,
            env_store: parts.env_store,
            runtime: parts.runtime,
            probe: parts.probe,
            proxy: parts.proxy,
            health,
            locks: ProjectLocks::new(),
            config,
        }
    }

    pub fn from_config(config: PlatformConfig) -> Result<Self> {
        let parts = Collaborators::from_config(&config)?;
        Ok(Self::new(config, parts))
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Register the projects listed in config, replacing stored ownership.
    pub async fn seed_projects(&self) -> Result<usize> {
        for project in &self.config.projects {
            projects::validate_project_name(&project.name)?;
            self.projects.put(project).await?;
        }
        if !self.config.projects.is_empty() {
            tracing::info!(count = self.config.projects.len(), "seeded projects from config");
        }
        Ok(self.config.projects.len())
    }

    pub async fn slot_status(&self, caller: &Caller, request: &ScopeRequest) -> Result<ProjectSlots> {
        projects::authorize(self.projects.as_ref(), caller, &request.project_name).await?;
        self.store
            .get(&request.project_name, request.environment)
            .await
    }

    /// Newest first, at most `request.limit` records.
    pub async fn deployment_history(
        &self,
        caller: &Caller,
        request: &HistoryRequest,
    ) -> Result<Vec<DeploymentRecord>> {
        projects::authorize(self.projects.as_ref(), caller, &request.project_name).await?;
        self.history
            .list(&request.project_name, request.environment, request.limit)
            .await
    }

    pub fn preview_url(&self, project: &str, slot: SlotName) -> String {
        format!("https://{project}-{slot}.preview.{}", self.config.base_domain)
    }

    pub fn production_url(&self, project: &Project, environment: Environment) -> String {
        format!(
            "https://{}",
            proxy::site_domain(project, environment, &self.config.base_domain)
        )
    }

    /// Resolve a project a mutating operation may act on.
    pub(crate) async fn authorize_mutation(&self, caller: &Caller, name: &str) -> Result<Project> {
        let project = projects::authorize(self.projects.as_ref(), caller, name).await?;
        if !caller.can_mutate() {
            return Err(OrchestratorError::AccessDenied {
                project: name.to_string(),
                team_id: caller.team_id.clone(),
            });
        }
        Ok(project)
    }

    /// GET `/` on a slot's host port. Returns the status when it is 2xx or 3xx.
    pub(crate) async fn probe_root(&self, port: u16) -> std::result::Result<u16, String> {
        let url = probe::local_url(port, "/");
        match self.probe.status(&url).await {
            Ok(status) if probe::is_reachable(status) => Ok(status),
            Ok(status) => Err(format!("GET {url} answered {status}")),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Persist after the live state already changed. Failures become warnings.
    pub(crate) async fn record_slots(&self, slots: &ProjectSlots, warnings: &mut Vec<String>) {
        if let Err(e) = self.store.upsert(slots).await {
            let err = OrchestratorError::RegistryUpdateFailed(e.to_string());
            tracing::warn!(
                project = %slots.project_name,
                environment = %slots.environment,
                error = %e,
                "slot registry write failed after live change"
            );
            warnings.push(err.to_string());
        }
    }
}
