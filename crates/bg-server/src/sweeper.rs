use std::sync::Arc;
use std::time::Duration;

use bg_core::services::SlotManager;
use tokio::task::JoinHandle;

/// Periodically empty grace slots whose window has closed.
pub fn spawn(manager: Arc<SlotManager>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_once(&manager).await;
        }
    })
}

pub async fn run_once(manager: &SlotManager) -> usize {
    match manager.sweep_expired().await {
        Ok(swept) => {
            for slot in &swept {
                tracing::info!(
                    project = %slot.project,
                    environment = %slot.environment,
                    slot = %slot.slot,
                    version = ?slot.version,
                    "grace period expired, slot emptied"
                );
            }
            swept.len()
        }
        Err(e) => {
            tracing::error!(error = %e, "grace sweep failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_core::models::{DeployRequest, Environment, ScopeRequest, SlotState};
    use bg_core::services::state::SlotBackend;
    use bg_core::services::testing::Harness;
    use chrono::Utc;

    #[tokio::test]
    async fn sweeps_only_once_the_window_closes() {
        let h = Harness::new().await;
        let caller = h.owner();
        let scope = ScopeRequest {
            project_name: "demo".into(),
            environment: Environment::Production,
        };
        for version in ["v1", "v2"] {
            let req = DeployRequest {
                project_name: "demo".into(),
                environment: Environment::Production,
                version: Some(version.into()),
                image: None,
                skip_healthcheck: false,
            };
            assert!(h.manager.deploy(&caller, &req).await.success);
            assert!(h.manager.promote(&caller, &scope).await.success);
        }
        assert_eq!(run_once(&h.manager).await, 0);

        let mut slots = h.slots("demo", Environment::Production).await;
        slots.blue.grace_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        h.primary.put(&slots).await.unwrap();

        assert_eq!(run_once(&h.manager).await, 1);
        let slots = h.slots("demo", Environment::Production).await;
        assert_eq!(slots.blue.state, SlotState::Empty);
        assert_eq!(slots.green.state, SlotState::Active);
    }
}
