use tokio::time::Instant;

use crate::error::{OrchestratorError, Result};
use crate::models::{Caller, RollbackResult, ScopeRequest};

use super::promote::TrafficSwitch;
use super::proxy::{self, ProxySite};
use super::slot_manager::SlotManager;

impl SlotManager {
    /// Send traffic back to the slot still in its grace window.
    ///
    /// The displaced slot takes the grace role in turn, so a rollback can be rolled back.
    pub async fn rollback(&self, caller: &Caller, request: &ScopeRequest) -> RollbackResult {
        let started = Instant::now();
        let mut warnings = Vec::new();
        let outcome = self.run_rollback(caller, request, &mut warnings).await;
        let duration = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(switch) => RollbackResult {
                success: true,
                from_slot: switch.from,
                to_slot: Some(switch.to),
                production_url: Some(switch.url),
                restored_version: switch.new_version,
                displaced_version: switch.previous_version,
                duration,
                error: None,
                error_code: None,
                warnings,
            },
            Err(e) => {
                tracing::error!(
                    project = %request.project_name,
                    environment = %request.environment,
                    code = e.code(),
                    error = %e,
                    "rollback failed"
                );
                RollbackResult {
                    success: false,
                    from_slot: None,
                    to_slot: None,
                    production_url: None,
                    restored_version: None,
                    displaced_version: None,
                    duration,
                    error: Some(e.to_string()),
                    error_code: Some(e.code().to_string()),
                    warnings,
                }
            }
        }
    }

    async fn run_rollback(
        &self,
        caller: &Caller,
        request: &ScopeRequest,
        warnings: &mut Vec<String>,
    ) -> Result<TrafficSwitch> {
        let environment = request.environment;
        let project = self
            .authorize_mutation(caller, &request.project_name)
            .await?;
        let _guard = self.locks.acquire(&project.name, environment).await?;
        let mut slots = self.store.get(&project.name, environment).await?;

        let to = slots.grace_slot().ok_or(OrchestratorError::NoRollbackTarget)?;
        let from = slots.is_live().then_some(slots.active_slot);
        let target = slots.slot(to);
        let port = target
            .port
            .ok_or(OrchestratorError::SlotNotInitialized(to))?;

        let unavailable = |reason: String| OrchestratorError::RollbackTargetUnavailable { slot: to, reason };
        let container = slots.container_name(to);
        match self.runtime.inspect(&container).await {
            Ok(Some(state)) if state.status.has_stopped() => {
                return Err(unavailable(format!(
                    "container {container} has stopped (exit code {})",
                    state.exit_code.unwrap_or(-1)
                )));
            }
            Ok(Some(_)) => {}
            Ok(None) => return Err(unavailable(format!("container {container} not found"))),
            Err(e) => return Err(unavailable(e.to_string())),
        }
        self.probe_root(port).await.map_err(unavailable)?;

        let site = ProxySite {
            project: project.name.clone(),
            environment,
            domain: proxy::site_domain(&project, environment, &self.config.base_domain),
            slot: to,
            version: target.version.clone(),
            primary_port: port,
            standby_port: from.and_then(|s| slots.slot(s).port),
        };
        self.proxy.apply(&site).await?;

        let switch = TrafficSwitch {
            from,
            to,
            url: self.production_url(&project, environment),
            previous_version: from.and_then(|s| slots.slot(s).version.clone()),
            new_version: target.version.clone(),
        };
        self.activate(&mut slots, to, from, &caller.actor);
        self.record_slots(&slots, warnings).await;

        tracing::info!(
            project = %project.name,
            %environment,
            from = ?from,
            %to,
            version = ?switch.new_version,
            "rolled back"
        );
        Ok(switch)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{Caller, DeployRequest, Environment, ScopeRequest, SlotName, SlotState};
    use crate::services::testing::Harness;

    fn scope() -> ScopeRequest {
        ScopeRequest {
            project_name: "demo".into(),
            environment: Environment::Production,
        }
    }

    fn deploy(version: &str) -> DeployRequest {
        DeployRequest {
            project_name: "demo".into(),
            environment: Environment::Production,
            version: Some(version.into()),
            image: None,
            skip_healthcheck: false,
        }
    }

    /// v1 on blue in grace, v2 live on green.
    async fn two_releases() -> (Harness, Caller) {
        let h = Harness::new().await;
        let caller = h.owner();
        for version in ["v1", "v2"] {
            assert!(h.manager.deploy(&caller, &deploy(version)).await.success);
            assert!(h.manager.promote(&caller, &scope()).await.success);
        }
        (h, caller)
    }

    #[tokio::test]
    async fn restores_grace_slot_and_keeps_displaced_in_grace() {
        let (h, caller) = two_releases().await;
        let result = h.manager.rollback(&caller, &scope()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.from_slot, Some(SlotName::Green));
        assert_eq!(result.to_slot, Some(SlotName::Blue));
        assert_eq!(result.restored_version.as_deref(), Some("v1"));
        assert_eq!(result.displaced_version.as_deref(), Some("v2"));

        let slots = h.slots("demo", Environment::Production).await;
        assert_eq!(slots.active_slot, SlotName::Blue);
        assert_eq!(slots.blue.state, SlotState::Active);
        assert_eq!(slots.blue.grace_expires_at, None);
        assert_eq!(slots.green.state, SlotState::Grace);
        assert!(slots.green.grace_expires_at.is_some());

        let site = h.proxy.last().unwrap();
        assert_eq!(site.primary_port, 4100);
        assert_eq!(site.standby_port, Some(4101));
    }

    #[tokio::test]
    async fn rollback_can_be_reverted() {
        let (h, caller) = two_releases().await;
        assert!(h.manager.rollback(&caller, &scope()).await.success);
        let again = h.manager.rollback(&caller, &scope()).await;
        assert!(again.success);
        assert_eq!(again.to_slot, Some(SlotName::Green));
        assert_eq!(again.restored_version.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn nothing_in_grace_means_no_target() {
        let h = Harness::new().await;
        let caller = h.owner();
        assert!(h.manager.deploy(&caller, &deploy("v1")).await.success);
        assert!(h.manager.promote(&caller, &scope()).await.success);

        let result = h.manager.rollback(&caller, &scope()).await;
        assert_eq!(result.error_code.as_deref(), Some("NO_ROLLBACK_TARGET"));
    }

    #[tokio::test]
    async fn vanished_grace_container_is_unavailable() {
        let (h, caller) = two_releases().await;
        h.runtime.vanish("demo-production-blue");
        let result = h.manager.rollback(&caller, &scope()).await;
        assert_eq!(
            result.error_code.as_deref(),
            Some("ROLLBACK_TARGET_UNAVAILABLE")
        );
        let slots = h.slots("demo", Environment::Production).await;
        assert_eq!(slots.active_slot, SlotName::Green);
    }

    #[tokio::test]
    async fn unresponsive_grace_slot_is_unavailable() {
        let (h, caller) = two_releases().await;
        h.probe.refuse(4100);
        let result = h.manager.rollback(&caller, &scope()).await;
        assert_eq!(
            result.error_code.as_deref(),
            Some("ROLLBACK_TARGET_UNAVAILABLE")
        );
        assert!(result.error.unwrap().contains("connection refused"));
    }
}
