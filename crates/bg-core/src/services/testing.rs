//! In-memory stand-ins for the container runtime, the host HTTP probe and the
//! reverse proxy, plus a [`Harness`] wiring them into a [`SlotManager`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use crate::error::{OrchestratorError, Result};
use crate::models::config::{HealthConfig, RegistryConfig};
use crate::models::{Caller, Environment, PlatformConfig, Project, ProjectSlots, Role};

use super::env_store::{EnvRecord, EnvStore, MemoryEnvStore};
use super::health::HEALTH_PATHS;
use super::history::MemoryHistory;
use super::projects::{MemoryProjectRegistry, ProjectRegistry};
use super::probe::{local_url, HttpProbe};
use super::proxy::{ProxySite, ReverseProxy};
use super::runtime::{ContainerRuntime, ContainerState, ContainerStatus, ProbeHealth, RunSpec};
use super::slot_manager::{Collaborators, SlotManager};
use super::state::{MemorySlotBackend, SlotStore};

struct RuntimeState {
    containers: HashMap<String, RunSpec>,
    failing_pulls: HashSet<String>,
    fail_run: bool,
    fail_remove: bool,
    health: ProbeHealth,
    status: Option<ContainerStatus>,
    exec_healthy: bool,
    exec_delay: Duration,
    logs: String,
    pulled: Vec<String>,
    removed: Vec<String>,
}

/// Records every call and keeps "running" containers in a map.
///
/// Health and status overrides apply to every container it knows about.
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RuntimeState {
                containers: HashMap::new(),
                failing_pulls: HashSet::new(),
                fail_run: false,
                fail_remove: false,
                health: ProbeHealth::None,
                status: None,
                exec_healthy: false,
                exec_delay: Duration::ZERO,
                logs: String::new(),
                pulled: Vec::new(),
                removed: Vec::new(),
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut RuntimeState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Pretend `spec` is already running, without recording a `run` call.
    pub fn start(&self, spec: RunSpec) {
        self.with(|s| s.containers.insert(spec.name.clone(), spec));
    }

    /// Pretend the container died and was cleaned up out of band.
    pub fn vanish(&self, name: &str) {
        self.with(|s| s.containers.remove(name));
    }

    pub fn set_health(&self, health: ProbeHealth) {
        self.with(|s| s.health = health);
    }

    pub fn set_status(&self, status: ContainerStatus) {
        self.with(|s| s.status = Some(status));
    }

    pub fn set_exec_healthy(&self, healthy: bool) {
        self.with(|s| s.exec_healthy = healthy);
    }

    /// Make every in-container probe hang this long, like a stuck `exec`.
    pub fn set_exec_delay(&self, delay: Duration) {
        self.with(|s| s.exec_delay = delay);
    }

    pub fn set_logs(&self, logs: &str) {
        self.with(|s| s.logs = logs.to_string());
    }

    pub fn fail_pull(&self, image: &str) {
        self.with(|s| s.failing_pulls.insert(image.to_string()));
    }

    pub fn set_fail_run(&self, fail: bool) {
        self.with(|s| s.fail_run = fail);
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.with(|s| s.fail_remove = fail);
    }

    pub fn pulled(&self) -> Vec<String> {
        self.with(|s| s.pulled.clone())
    }

    pub fn removed(&self) -> Vec<String> {
        self.with(|s| s.removed.clone())
    }

    pub fn running(&self, name: &str) -> Option<RunSpec> {
        self.with(|s| s.containers.get(name).cloned())
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pull(&self, image: &str) -> Result<()> {
        self.with(|s| {
            s.pulled.push(image.to_string());
            if s.failing_pulls.contains(image) {
                Err(OrchestratorError::Runtime(format!("manifest unknown: {image}")))
            } else {
                Ok(())
            }
        })
    }

    async fn run(&self, spec: &RunSpec) -> Result<String> {
        self.with(|s| {
            if s.fail_run {
                return Err(OrchestratorError::Runtime(format!(
                    "port {} is already allocated",
                    spec.host_port
                )));
            }
            s.containers.insert(spec.name.clone(), spec.clone());
            Ok(format!("{}-id", spec.name))
        })
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        self.with(|s| {
            if s.fail_remove {
                return Err(OrchestratorError::Runtime("device or resource busy".into()));
            }
            s.removed.push(name.to_string());
            Ok(s.containers.remove(name).is_some())
        })
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        self.with(|s| {
            if !s.containers.contains_key(name) {
                return Ok(None);
            }
            let status = s.status.unwrap_or(ContainerStatus::Running);
            Ok(Some(ContainerState {
                status,
                exit_code: status.has_stopped().then_some(1),
                health: s.health,
            }))
        })
    }

    async fn logs(&self, _name: &str, _tail: u32) -> Result<String> {
        Ok(self.with(|s| s.logs.clone()))
    }

    async fn exec_http_probe(&self, name: &str, _port: u16, _path: &str) -> Result<bool> {
        let delay = self.with(|s| s.exec_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.with(|s| s.exec_healthy && s.containers.contains_key(name)))
    }
}

#[derive(Default)]
struct ProbeState {
    responses: HashMap<String, u16>,
    refused: HashSet<u16>,
    fallback: Option<u16>,
}

/// Answers configured URLs with fixed status codes. Anything else gets the
/// fallback status, or a refused connection when there is none.
#[derive(Default)]
pub struct FakeProbe {
    state: Mutex<ProbeState>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every port answers `status` unless configured otherwise.
    pub fn answering(status: u16) -> Self {
        let probe = Self::new();
        probe.with(|s| s.fallback = Some(status));
        probe
    }

    fn with<T>(&self, f: impl FnOnce(&mut ProbeState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn set(&self, url: &str, status: u16) {
        self.with(|s| s.responses.insert(url.to_string(), status));
    }

    /// Root and health paths on `port` all answer `status`.
    pub fn serve(&self, port: u16, status: u16) {
        self.with(|s| s.refused.remove(&port));
        self.set(&local_url(port, "/"), status);
        for path in HEALTH_PATHS {
            self.set(&local_url(port, path), status);
        }
    }

    pub fn refuse(&self, port: u16) {
        self.with(|s| s.refused.insert(port));
    }
}

fn port_of(url: &str) -> Option<u16> {
    let rest = url.strip_prefix("http://127.0.0.1:")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[async_trait]
impl HttpProbe for FakeProbe {
    async fn status(&self, url: &str) -> Result<u16> {
        self.with(|s| {
            let refused = port_of(url).is_some_and(|port| s.refused.contains(&port));
            let answer = if refused {
                None
            } else {
                s.responses.get(url).copied().or(s.fallback)
            };
            answer.ok_or_else(|| OrchestratorError::Runtime(format!("GET {url}: connection refused")))
        })
    }
}

/// Keeps every applied site in order.
#[derive(Default)]
pub struct FakeProxy {
    applied: Mutex<Vec<ProxySite>>,
    fail: AtomicBool,
}

impl FakeProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<ProxySite> {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<ProxySite> {
        self.applied().pop()
    }
}

#[async_trait]
impl ReverseProxy for FakeProxy {
    async fn apply(&self, site: &ProxySite) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ReverseProxyUpdateFailed(
                "reload failed (exit 1): adapting config: bad upstream".into(),
            ));
        }
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(site.clone());
        Ok(())
    }
}

/// A [`SlotManager`] wired entirely to in-memory collaborators.
///
/// Every project belongs to `team-a`, has a central env record for each
/// environment and answers HTTP probes with 200. Containers report healthy.
pub struct Harness {
    pub manager: Arc<SlotManager>,
    pub runtime: Arc<FakeRuntime>,
    pub probe: Arc<FakeProbe>,
    pub proxy: Arc<FakeProxy>,
    pub primary: Arc<MemorySlotBackend>,
    pub secondary: Arc<MemorySlotBackend>,
    pub history: Arc<MemoryHistory>,
    pub projects: Arc<MemoryProjectRegistry>,
    pub env_store: Arc<MemoryEnvStore>,
    _data_dir: TempDir,
}

pub const TEAM: &str = "team-a";

impl Harness {
    pub async fn new() -> Self {
        Self::with_projects(&["demo"]).await
    }

    pub async fn with_projects(names: &[&str]) -> Self {
        let data_dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let mut config = PlatformConfig::with_data_dir(data_dir.path().to_path_buf());
        config.base_domain = "apps.test".into();
        config.registry = RegistryConfig {
            private: Some("registry.test".into()),
            public: Some("ghcr.test/acme".into()),
        };
        config.health = HealthConfig {
            startup_delay_secs: 0,
            ..HealthConfig::default()
        };

        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_health(ProbeHealth::Healthy);
        let probe = Arc::new(FakeProbe::answering(200));
        let proxy = Arc::new(FakeProxy::new());
        let primary = Arc::new(MemorySlotBackend::new());
        let secondary = Arc::new(MemorySlotBackend::new());
        let history = Arc::new(MemoryHistory::new());
        let projects = Arc::new(MemoryProjectRegistry::new());
        let env_store = Arc::new(MemoryEnvStore::new());

        let manager = SlotManager::new(
            config,
            Collaborators {
                store: SlotStore::new(primary.clone(), secondary.clone()),
                history: history.clone(),
                projects: projects.clone(),
                env_store: env_store.clone(),
                runtime: runtime.clone(),
                probe: probe.clone(),
                proxy: proxy.clone(),
            },
        );
        let harness = Self {
            manager: Arc::new(manager),
            runtime,
            probe,
            proxy,
            primary,
            secondary,
            history,
            projects,
            env_store,
            _data_dir: data_dir,
        };
        for name in names {
            harness.add_project(name).await;
            harness.seed_env(name).await;
        }
        harness
    }

    /// Register a `team-a` project without any env record.
    pub async fn add_project(&self, name: &str) {
        let project = Project {
            name: name.to_string(),
            team_id: TEAM.to_string(),
            domain: None,
        };
        self.projects
            .put(&project)
            .await
            .unwrap_or_else(|e| panic!("seed project: {e}"));
    }

    pub async fn seed_env(&self, name: &str) {
        for environment in Environment::ALL {
            let record = EnvRecord {
                project_name: name.to_string(),
                environment,
                variables: BTreeMap::from([("NODE_ENV".to_string(), environment.to_string())]),
                updated_at: Utc::now(),
            };
            self.env_store
                .put(&record)
                .await
                .unwrap_or_else(|e| panic!("seed env: {e}"));
        }
    }

    /// A member of the team owning every harness project.
    pub fn owner(&self) -> Caller {
        Caller::new(TEAM, Role::Member)
    }

    pub async fn slots(&self, project: &str, environment: Environment) -> ProjectSlots {
        self.manager
            .store
            .get(project, environment)
            .await
            .unwrap_or_else(|e| panic!("slots for {project}: {e}"))
    }
}
