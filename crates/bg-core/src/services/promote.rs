use chrono::Utc;
use tokio::time::Instant;

use crate::error::{OrchestratorError, Result};
use crate::models::{Caller, PromoteResult, ProjectSlots, ScopeRequest, SlotName, SlotState};

use super::proxy::{self, ProxySite};
use super::slot_manager::SlotManager;

/// Outcome of moving live traffic from one slot to another.
pub(crate) struct TrafficSwitch {
    pub from: Option<SlotName>,
    pub to: SlotName,
    pub url: String,
    pub previous_version: Option<String>,
    pub new_version: Option<String>,
}

impl SlotManager {
    /// Switch production traffic to the freshly deployed standby slot.
    ///
    /// The first promote of a project activates the default slot with no
    /// previous slot to keep in grace.
    pub async fn promote(&self, caller: &Caller, request: &ScopeRequest) -> PromoteResult {
        let started = Instant::now();
        let mut warnings = Vec::new();
        let outcome = self.run_promote(caller, request, &mut warnings).await;
        let duration = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(switch) => PromoteResult {
                success: true,
                from_slot: switch.from,
                to_slot: Some(switch.to),
                production_url: Some(switch.url),
                previous_version: switch.previous_version,
                new_version: switch.new_version,
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
                    "promote failed"
                );
                PromoteResult {
                    success: false,
                    from_slot: None,
                    to_slot: None,
                    production_url: None,
                    previous_version: None,
                    new_version: None,
                    duration,
                    error: Some(e.to_string()),
                    error_code: Some(e.code().to_string()),
                    warnings,
                }
            }
        }
    }

    async fn run_promote(
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

        let from = slots.is_live().then_some(slots.active_slot);
        let to = slots.standby_slot();
        let candidate = slots.slot(to);
        if candidate.state != SlotState::Deployed {
            return Err(OrchestratorError::NotDeployed {
                slot: to,
                state: candidate.state,
            });
        }
        let port = candidate
            .port
            .ok_or(OrchestratorError::SlotNotInitialized(to))?;

        if let Err(reason) = self.probe_root(port).await {
            let logs = self
                .runtime
                .logs(&slots.container_name(to), self.config.health.log_tail)
                .await
                .unwrap_or_default();
            return Err(OrchestratorError::HealthCheckFailed {
                message: format!("slot {to} is not serving: {reason}"),
                logs,
            });
        }

        let site = ProxySite {
            project: project.name.clone(),
            environment,
            domain: proxy::site_domain(&project, environment, &self.config.base_domain),
            slot: to,
            version: candidate.version.clone(),
            primary_port: port,
            standby_port: from.and_then(|s| slots.slot(s).port),
        };
        self.proxy.apply(&site).await?;

        let switch = TrafficSwitch {
            from,
            to,
            url: self.production_url(&project, environment),
            previous_version: from.and_then(|s| slots.slot(s).version.clone()),
            new_version: candidate.version.clone(),
        };
        self.activate(&mut slots, to, from, &caller.actor);
        self.record_slots(&slots, warnings).await;

        tracing::info!(
            project = %project.name,
            %environment,
            from = ?from,
            %to,
            version = ?switch.new_version,
            "traffic switched"
        );
        Ok(switch)
    }

    /// Make `to` the live slot. `from`, when given, enters a fresh grace window.
    pub(crate) fn activate(
        &self,
        slots: &mut ProjectSlots,
        to: SlotName,
        from: Option<SlotName>,
        actor: &str,
    ) {
        let now = Utc::now();
        slots.active_slot = to;

        let live = slots.slot_mut(to);
        live.state = SlotState::Active;
        live.promoted_at = Some(now);
        live.promoted_by = Some(actor.to_string());
        live.grace_expires_at = None;

        if let Some(from) = from {
            let displaced = slots.slot_mut(from);
            displaced.state = SlotState::Grace;
            displaced.grace_expires_at = Some(now + self.config.grace_period());
        }
        slots.touch();
    }
}
