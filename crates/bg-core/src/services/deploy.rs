use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::error::{OrchestratorError, Result};
use crate::models::config::RegistryConfig;
use crate::models::slot::container_name;
use crate::models::{
    Caller, DeployRequest, DeploymentRecord, DeploymentResult, DeploymentStatus, Environment,
    HealthStatus, Project, ProjectSlots, SlotName, SlotState,
};

use super::env_store::{self, EnvSource};
use super::projects;
use super::runtime::{self, RunSpec};
use super::slot_manager::SlotManager;
use super::steps::StepRecorder;

/// Mutable bookkeeping the deploy pipeline fills in as it goes.
#[derive(Default)]
struct DeployRun {
    steps: StepRecorder,
    warnings: Vec<String>,
    record: Option<DeploymentRecord>,
    target: Option<(SlotName, u16)>,
}

/// Images to try, in order: the private registry, then the public one.
pub fn image_candidates(registry: &RegistryConfig, project: &str, version: &str) -> Vec<String> {
    let mut candidates: Vec<String> = [registry.private.as_deref(), registry.public.as_deref()]
        .into_iter()
        .flatten()
        .map(|prefix| format!("{}/{project}:{version}", prefix.trim_end_matches('/')))
        .collect();
    if candidates.is_empty() {
        candidates.push(format!("{project}:{version}"));
    }
    candidates
}

/// The standby slot a deploy writes to, with its port.
fn select_target(slots: &ProjectSlots) -> Result<(SlotName, u16)> {
    let name = slots.standby_slot();
    let slot = slots.slot(name);
    let port = slot.port.ok_or(OrchestratorError::SlotNotInitialized(name))?;
    if !slot.state.can_transition_to(SlotState::Deployed) {
        return Err(OrchestratorError::InvalidTransition {
            slot: name,
            from: slot.state,
            to: SlotState::Deployed,
        });
    }
    Ok((name, port))
}

impl SlotManager {
    /// Run the deploy pipeline into the standby slot. Never touches live traffic.
    ///
    /// Failures come back inside the result along with every step recorded so far.
    pub async fn deploy(&self, caller: &Caller, request: &DeployRequest) -> DeploymentResult {
        let started = Instant::now();
        let version = request.resolved_version();
        tracing::info!(
            project = %request.project_name,
            environment = %request.environment,
            %version,
            actor = %caller.actor,
            "deploy requested"
        );

        let mut run = DeployRun::default();
        let outcome = self.run_deploy(caller, request, &version, &mut run).await;

        if let Some(mut record) = run.record.take() {
            record.status = match outcome {
                Ok(()) => DeploymentStatus::Success,
                Err(_) => DeploymentStatus::Failed,
            };
            record.steps = run.steps.steps().to_vec();
            record.finished_at = Some(Utc::now());
            record.error = outcome.as_ref().err().map(ToString::to_string);
            if let Err(e) = self.history.record(&record).await {
                tracing::warn!(deployment_id = %record.id, error = %e, "failed to finalize deployment record");
                run.warnings
                    .push(format!("deployment history update failed: {e}"));
            }
            run.record = Some(record);
        }

        let duration = started.elapsed().as_millis() as u64;
        let (slot, port) = match run.target {
            Some((slot, port)) => (Some(slot), Some(port)),
            None => (None, None),
        };
        let mut result = DeploymentResult {
            success: outcome.is_ok(),
            slot,
            port,
            preview_url: slot.map(|s| self.preview_url(&request.project_name, s)),
            deployment_id: run.record.map(|r| r.id),
            steps: run.steps.into_steps(),
            duration,
            error: None,
            error_code: None,
            warnings: run.warnings,
        };
        match outcome {
            Ok(()) => tracing::info!(
                project = %request.project_name,
                environment = %request.environment,
                slot = ?slot,
                duration_ms = duration,
                "deploy succeeded"
            ),
            Err(e) => {
                tracing::error!(
                    project = %request.project_name,
                    environment = %request.environment,
                    code = e.code(),
                    error = %e,
                    "deploy failed"
                );
                result.error_code = Some(e.code().to_string());
                result.error = Some(match e.logs() {
                    Some(logs) => format!("{e}\n\nRecent logs:\n{logs}"),
                    None => e.to_string(),
                });
            }
        }
        result
    }

    async fn run_deploy(
        &self,
        caller: &Caller,
        request: &DeployRequest,
        version: &str,
        run: &mut DeployRun,
    ) -> Result<()> {
        let DeployRun {
            steps,
            warnings,
            record,
            target,
        } = run;
        let environment = request.environment;

        let project = steps
            .run("verify_project", async {
                projects::validate_version(version)?;
                self.authorize_mutation(caller, &request.project_name).await
            })
            .await?;
        let _guard = self.locks.acquire(&project.name, environment).await?;

        let mut slots = steps
            .run("load_slots", self.load_or_initialize(&project, environment))
            .await?;
        steps.annotate(format!(
            "blue:{} green:{}",
            slots.blue.port.unwrap_or_default(),
            slots.green.port.unwrap_or_default()
        ));

        let (slot, port) = steps
            .run("select_slot", async { select_target(&slots) })
            .await?;
        steps.annotate(format!("{slot} on port {port}"));
        *target = Some((slot, port));

        let pending = DeploymentRecord::pending(&project.name, environment, slot, version, &caller.actor);
        steps
            .run("create_record", self.history.record(&pending))
            .await?;
        steps.annotate(pending.id.clone());
        let deployment_id = pending.id.clone();
        *record = Some(pending);

        let image = steps
            .run(
                "pull_image",
                self.pull_image(&project.name, version, request.image.as_deref()),
            )
            .await?;
        steps.annotate(image.clone());
        if let Some(record) = record.as_mut() {
            record.image = image.clone();
        }

        let container = slots.container_name(slot);
        let existed = steps
            .run("remove_previous", async {
                self.runtime
                    .remove(&container)
                    .await
                    .map_err(|e| OrchestratorError::ContainerCleanupFailed(e.to_string()))
            })
            .await?;
        steps.annotate(if existed {
            format!("removed {container}")
        } else {
            "no previous container".to_string()
        });

        let env = steps
            .run(
                "sync_env",
                env_store::resolve(self.env_store.as_ref(), &self.host_env, &project.name, environment),
            )
            .await?;
        steps.annotate(format!(
            "{} variables from {}",
            env.variable_count,
            match env.source {
                EnvSource::Central => "central store",
                EnvSource::HostFile => "host file",
            }
        ));
        if let Some(warning) = env.warning {
            warnings.push(warning);
        }

        let spec = self.run_spec(&project, environment, slot, port, version, &image, env.path);
        steps
            .run("start_container", async {
                self.runtime
                    .run(&spec)
                    .await
                    .map_err(|e| OrchestratorError::ContainerStartFailed(e.to_string()))
            })
            .await?;
        steps.annotate(format!("{container} on {port}:{}", spec.container_port));

        let health_status = if request.skip_healthcheck {
            steps.skip("health_check", "skipped by request");
            HealthStatus::Unknown
        } else {
            let timeout = Duration::from_secs(self.config.health.timeout_secs);
            let checked = steps
                .run(
                    "health_check",
                    self.health.wait_for_healthy(&container, port, timeout),
                )
                .await;
            match checked {
                Ok(signal) => {
                    steps.annotate(signal.describe());
                    HealthStatus::Healthy
                }
                Err(e) => {
                    self.discard_container(&container).await;
                    return Err(e);
                }
            }
        };

        let now = Utc::now();
        let target_slot = slots.slot_mut(slot);
        target_slot.state = SlotState::Deployed;
        target_slot.version = Some(version.to_string());
        target_slot.image = Some(image);
        target_slot.deployed_at = Some(now);
        target_slot.deployed_by = Some(caller.actor.clone());
        target_slot.promoted_at = None;
        target_slot.promoted_by = None;
        target_slot.grace_expires_at = None;
        target_slot.health_status = Some(health_status);
        slots.touch();

        let written = steps
            .run("update_registry", async {
                self.store
                    .upsert(&slots)
                    .await
                    .map_err(|e| OrchestratorError::RegistryUpdateFailed(e.to_string()))
            })
            .await;
        if let Err(e) = written {
            tracing::warn!(
                project = %project.name,
                %environment,
                %slot,
                %deployment_id,
                error = %e,
                "container is running but the registry was not updated"
            );
            warnings.push(e.to_string());
        }
        Ok(())
    }

    async fn load_or_initialize(
        &self,
        project: &Project,
        environment: Environment,
    ) -> Result<ProjectSlots> {
        if let Some(slots) = self.store.find(&project.name, environment).await? {
            return Ok(slots);
        }
        self.port_allocator
            .initialize(&self.store, &project.name, &project.team_id, environment)
            .await
    }

    /// Try each candidate image until one pulls.
    async fn pull_image(&self, project: &str, version: &str, explicit: Option<&str>) -> Result<String> {
        let candidates = match explicit {
            Some(image) => vec![image.to_string()],
            None => image_candidates(&self.config.registry, project, version),
        };
        let mut failures = Vec::new();
        for image in candidates {
            match self.runtime.pull(&image).await {
                Ok(()) => return Ok(image),
                Err(e) => {
                    tracing::warn!(%image, error = %e, "image pull failed");
                    failures.push(format!("{image}: {e}"));
                }
            }
        }
        Err(OrchestratorError::ImagePullFailed(failures.join("; ")))
    }

    #[allow(clippy::too_many_arguments)]
    fn run_spec(
        &self,
        project: &Project,
        environment: Environment,
        slot: SlotName,
        port: u16,
        version: &str,
        image: &str,
        env_file: PathBuf,
    ) -> RunSpec {
        let runtime_config = &self.config.runtime;
        let labels = BTreeMap::from([
            ("bg.project".to_string(), project.name.clone()),
            ("bg.environment".to_string(), environment.to_string()),
            ("bg.slot".to_string(), slot.to_string()),
            ("bg.version".to_string(), version.to_string()),
            ("bg.team".to_string(), project.team_id.clone()),
        ]);
        RunSpec {
            name: container_name(&project.name, environment, slot),
            image: image.to_string(),
            host_port: port,
            container_port: runtime_config.container_port,
            env_file: Some(env_file),
            restart: runtime_config.restart.clone(),
            memory: runtime_config.memory.clone(),
            cpus: runtime_config.cpus.clone(),
            health_cmd: Some(runtime::probe_command(runtime_config.container_port, "/health")),
            labels,
        }
    }

    /// Compensation after a failed health check. The slot registry was never touched.
    async fn discard_container(&self, container: &str) {
        match self.runtime.remove(container).await {
            Ok(_) => tracing::info!(container, "removed unhealthy container"),
            Err(e) => tracing::warn!(container, error = %e, "failed to remove unhealthy container"),
        }
    }
}
