use chrono::Utc;
use tokio::time::Instant;

use crate::error::{OrchestratorError, Result};
use crate::models::{Caller, CleanupRequest, CleanupResult, Environment, SlotName};

use super::slot_manager::SlotManager;

/// A grace slot the periodic sweep emptied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweptSlot {
    pub project: String,
    pub environment: Environment,
    pub slot: SlotName,
    pub version: Option<String>,
}

impl SlotManager {
    /// Stop the grace slot's container and reset the slot to empty.
    pub async fn cleanup(&self, caller: &Caller, request: &CleanupRequest) -> CleanupResult {
        let started = Instant::now();
        let mut warnings = Vec::new();
        let outcome = match self
            .authorize_mutation(caller, &request.project_name)
            .await
        {
            Ok(project) => {
                self.empty_grace_slot(&project.name, request.environment, request.force, &mut warnings)
                    .await
            }
            Err(e) => Err(e),
        };
        let duration = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((slot, removed_version)) => CleanupResult {
                success: true,
                slot: Some(slot),
                removed_version,
                duration,
                error: None,
                error_code: None,
                warnings,
            },
            Err(e) => {
                tracing::warn!(
                    project = %request.project_name,
                    environment = %request.environment,
                    code = e.code(),
                    error = %e,
                    "cleanup refused"
                );
                CleanupResult {
                    success: false,
                    slot: None,
                    removed_version: None,
                    duration,
                    error: Some(e.to_string()),
                    error_code: Some(e.code().to_string()),
                    warnings,
                }
            }
        }
    }

    /// Empty every grace slot whose window has closed.
    pub async fn sweep_expired(&self) -> Result<Vec<SweptSlot>> {
        let now = Utc::now();
        let expired: Vec<_> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter_map(|slots| {
                let grace = slots.grace_slot()?;
                slots
                    .slot(grace)
                    .grace_expired(now)
                    .then_some((slots.project_name, slots.environment))
            })
            .collect();

        let mut swept = Vec::new();
        for (project, environment) in expired {
            let mut warnings = Vec::new();
            match self
                .empty_grace_slot(&project, environment, false, &mut warnings)
                .await
            {
                Ok((slot, version)) => swept.push(SweptSlot {
                    project,
                    environment,
                    slot,
                    version,
                }),
                Err(e) => {
                    tracing::warn!(%project, %environment, error = %e, "grace sweep skipped registry")
                }
            }
        }
        if !swept.is_empty() {
            tracing::info!(count = swept.len(), "swept expired grace slots");
        }
        Ok(swept)
    }

    async fn empty_grace_slot(
        &self,
        project: &str,
        environment: Environment,
        force: bool,
        warnings: &mut Vec<String>,
    ) -> Result<(SlotName, Option<String>)> {
        let _guard = self.locks.acquire(project, environment).await?;
        let mut slots = self.store.get(project, environment).await?;
        let name = slots.grace_slot().ok_or(OrchestratorError::NoGraceSlot)?;

        if let Some(expires_at) = slots.slot(name).grace_expires_at {
            if !force && expires_at > Utc::now() {
                return Err(OrchestratorError::GracePeriodActive {
                    slot: name,
                    expires_at,
                });
            }
        }

        let container = slots.container_name(name);
        let existed = self
            .runtime
            .remove(&container)
            .await
            .map_err(|e| OrchestratorError::ContainerCleanupFailed(e.to_string()))?;
        if !existed {
            tracing::info!(%container, "grace container already gone");
        }

        let slot = slots.slot_mut(name);
        let removed_version = slot.version.take();
        slot.reset();
        slots.touch();
        self.record_slots(&slots, warnings).await;

        tracing::info!(
            project,
            %environment,
            slot = %name,
            version = ?removed_version,
            forced = force,
            "grace slot cleaned up"
        );
        Ok((name, removed_version))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::models::{
        CleanupRequest, DeployRequest, Environment, ScopeRequest, SlotName, SlotState,
    };
    use crate::services::testing::Harness;

    fn deploy(version: &str) -> DeployRequest {
        DeployRequest {
            project_name: "demo".into(),
            environment: Environment::Production,
            version: Some(version.into()),
            image: None,
            skip_healthcheck: false,
        }
    }

    fn cleanup(force: bool) -> CleanupRequest {
        CleanupRequest {
            project_name: "demo".into(),
            environment: Environment::Production,
            force,
        }
    }

    async fn with_grace_slot() -> Harness {
        let h = Harness::new().await;
        let caller = h.owner();
        let scope = ScopeRequest {
            project_name: "demo".into(),
            environment: Environment::Production,
        };
        for version in ["v1", "v2"] {
            assert!(h.manager.deploy(&caller, &deploy(version)).await.success);
            assert!(h.manager.promote(&caller, &scope).await.success);
        }
        h
    }

    async fn expire_grace(h: &Harness) {
        let mut slots = h.slots("demo", Environment::Production).await;
        slots.blue.grace_expires_at = Some(Utc::now() - Duration::minutes(1));
        h.manager.store.upsert(&slots).await.unwrap();
    }

    #[tokio::test]
    async fn refuses_during_grace_period() {
        let h = with_grace_slot().await;
        let result = h.manager.cleanup(&h.owner(), &cleanup(false)).await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("GRACE_PERIOD_ACTIVE"));
        assert!(h.runtime.running("demo-production-blue").is_some());
    }

    #[tokio::test]
    async fn force_empties_slot_keeping_port() {
        let h = with_grace_slot().await;
        let result = h.manager.cleanup(&h.owner(), &cleanup(true)).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.slot, Some(SlotName::Blue));
        assert_eq!(result.removed_version.as_deref(), Some("v1"));
        assert!(h.runtime.running("demo-production-blue").is_none());
        assert!(h
            .runtime
            .removed()
            .contains(&"demo-production-blue".to_string()));

        let slots = h.slots("demo", Environment::Production).await;
        assert_eq!(slots.blue.state, SlotState::Empty);
        assert_eq!(slots.blue.port, Some(4100));
        assert_eq!(slots.blue.version, None);
        assert_eq!(slots.green.state, SlotState::Active);
    }

    #[tokio::test]
    async fn expired_grace_needs_no_force() {
        let h = with_grace_slot().await;
        expire_grace(&h).await;
        let result = h.manager.cleanup(&h.owner(), &cleanup(false)).await;
        assert!(result.success, "{:?}", result.error);
    }

    #[tokio::test]
    async fn no_grace_slot() {
        let h = Harness::new().await;
        assert!(h.manager.deploy(&h.owner(), &deploy("v1")).await.success);
        let result = h.manager.cleanup(&h.owner(), &cleanup(true)).await;
        assert_eq!(result.error_code.as_deref(), Some("NO_GRACE_SLOT"));
    }

    #[tokio::test]
    async fn removal_failure_keeps_slot_in_grace() {
        let h = with_grace_slot().await;
        h.runtime.set_fail_remove(true);
        let result = h.manager.cleanup(&h.owner(), &cleanup(true)).await;
        assert_eq!(result.error_code.as_deref(), Some("CONTAINER_CLEANUP_FAILED"));
        let slots = h.slots("demo", Environment::Production).await;
        assert_eq!(slots.blue.state, SlotState::Grace);
    }

    #[tokio::test]
    async fn sweep_only_touches_expired_slots() {
        let h = with_grace_slot().await;
        assert!(h.manager.sweep_expired().await.unwrap().is_empty());

        expire_grace(&h).await;
        let swept = h.manager.sweep_expired().await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].project, "demo");
        assert_eq!(swept[0].slot, SlotName::Blue);
        assert_eq!(swept[0].version.as_deref(), Some("v1"));
        assert_eq!(
            h.slots("demo", Environment::Production).await.blue.state,
            SlotState::Empty
        );
    }

    #[tokio::test]
    async fn emptied_slot_takes_the_next_deploy() {
        let h = with_grace_slot().await;
        assert!(h.manager.cleanup(&h.owner(), &cleanup(true)).await.success);
        let next = h.manager.deploy(&h.owner(), &deploy("v3")).await;
        assert!(next.success);
        assert_eq!(next.slot, Some(SlotName::Blue));
        assert_eq!(next.port, Some(4100));
    }
}
