use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::environment::Environment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SlotName {
    Blue,
    Green,
}

impl SlotName {
    pub fn other(self) -> SlotName {
        match self {
            SlotName::Blue => SlotName::Green,
            SlotName::Green => SlotName::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SlotName::Blue => "blue",
            SlotName::Green => "green",
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Empty,
    Deployed,
    Active,
    Grace,
}

impl SlotState {
    /// Whether the registry may move a slot from `self` to `to`.
    ///
    /// Beyond the basic cycle (empty|grace -> deployed -> active -> grace -> empty),
    /// a deployed slot may be redeployed in place and a grace slot may be
    /// restored to active by a rollback.
    pub fn can_transition_to(self, to: SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, to),
            (Empty, Deployed)
                | (Grace, Deployed)
                | (Deployed, Deployed)
                | (Deployed, Active)
                | (Active, Grace)
                | (Grace, Active)
                | (Grace, Empty)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SlotState::Empty => "empty",
            SlotState::Deployed => "deployed",
            SlotState::Active => "active",
            SlotState::Grace => "grace",
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub name: SlotName,
    pub state: SlotState,
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_status: Option<HealthStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    pub fn empty(name: SlotName, port: u16) -> Self {
        Self {
            name,
            state: SlotState::Empty,
            port: Some(port),
            version: None,
            image: None,
            deployed_at: None,
            deployed_by: None,
            promoted_at: None,
            promoted_by: None,
            health_status: None,
            grace_expires_at: None,
        }
    }

    /// Back to `empty`, keeping the immutable name and port.
    pub fn reset(&mut self) {
        let port = self.port;
        *self = Slot::empty(self.name, 0);
        self.port = port;
    }

    pub fn grace_expired(&self, now: DateTime<Utc>) -> bool {
        self.grace_expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSlots {
    pub project_name: String,
    pub team_id: String,
    pub environment: Environment,
    pub active_slot: SlotName,
    pub blue: Slot,
    pub green: Slot,
    pub last_updated: DateTime<Utc>,
}

impl ProjectSlots {
    /// Fresh registry with both slots empty. Blue takes `base_port`, green the odd port after it.
    pub fn new(project_name: &str, team_id: &str, environment: Environment, base_port: u16) -> Self {
        Self {
            project_name: project_name.to_string(),
            team_id: team_id.to_string(),
            environment,
            active_slot: SlotName::Blue,
            blue: Slot::empty(SlotName::Blue, base_port),
            green: Slot::empty(SlotName::Green, base_port + 1),
            last_updated: Utc::now(),
        }
    }

    pub fn slot(&self, name: SlotName) -> &Slot {
        match name {
            SlotName::Blue => &self.blue,
            SlotName::Green => &self.green,
        }
    }

    pub fn slot_mut(&mut self, name: SlotName) -> &mut Slot {
        match name {
            SlotName::Blue => &mut self.blue,
            SlotName::Green => &mut self.green,
        }
    }

    /// True once some promotion has put the active slot into service.
    pub fn is_live(&self) -> bool {
        self.slot(self.active_slot).state == SlotState::Active
    }

    /// Slot the next deploy (and promote) acts on: the standby slot once traffic is
    /// live, otherwise the default active slot itself.
    pub fn standby_slot(&self) -> SlotName {
        if self.is_live() {
            self.active_slot.other()
        } else {
            self.active_slot
        }
    }

    pub fn grace_slot(&self) -> Option<SlotName> {
        [SlotName::Blue, SlotName::Green]
            .into_iter()
            .find(|name| self.slot(*name).state == SlotState::Grace)
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        [self.blue.port, self.green.port].into_iter().flatten()
    }

    pub fn container_name(&self, slot: SlotName) -> String {
        container_name(&self.project_name, self.environment, slot)
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

pub fn container_name(project: &str, environment: Environment, slot: SlotName) -> String {
    format!("{project}-{environment}-{slot}")
}
