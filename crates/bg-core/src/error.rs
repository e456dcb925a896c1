use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::models::{Environment, SlotName, SlotState};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("access denied: team '{team_id}' cannot operate on project '{project}'")]
    AccessDenied { project: String, team_id: String },

    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    #[error("invalid project name '{0}'")]
    InvalidProjectName(String),

    #[error("invalid version '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidVersion(String),

    #[error("no slot registry for {project} ({environment})")]
    SlotsNotFound {
        project: String,
        environment: Environment,
    },

    #[error("slot '{0}' has no port assigned")]
    SlotNotInitialized(SlotName),

    #[error("no free port pair left in the {0} range")]
    NoPortAvailable(Environment),

    #[error("slot '{slot}' cannot move from {from} to {to}")]
    InvalidTransition {
        slot: SlotName,
        from: SlotState,
        to: SlotState,
    },

    #[error("image pull failed: {0}")]
    ImagePullFailed(String),

    #[error("failed to remove previous container: {0}")]
    ContainerCleanupFailed(String),

    #[error("environment sync failed: {0}")]
    EnvSyncFailed(String),

    #[error("container start failed: {0}")]
    ContainerStartFailed(String),

    #[error("{message}")]
    HealthCheckFailed { message: String, logs: String },

    #[error("slot registry update failed: {0}")]
    RegistryUpdateFailed(String),

    #[error("reverse proxy update failed: {0}")]
    ReverseProxyUpdateFailed(String),

    #[error("slot '{slot}' is {state}, not deployed")]
    NotDeployed { slot: SlotName, state: SlotState },

    #[error("no slot in grace to roll back to")]
    NoRollbackTarget,

    #[error("rollback target '{slot}' is not serving: {reason}")]
    RollbackTargetUnavailable { slot: SlotName, reason: String },

    #[error("no slot in grace to clean up")]
    NoGraceSlot,

    #[error("slot '{slot}' is in its grace period until {expires_at}")]
    GracePeriodActive {
        slot: SlotName,
        expires_at: DateTime<Utc>,
    },

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl OrchestratorError {
    /// Stable machine-readable code surfaced to tool callers as `errorCode`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            Self::InvalidProjectName(_) => "INVALID_PROJECT_NAME",
            Self::InvalidVersion(_) => "INVALID_VERSION",
            Self::SlotsNotFound { .. } => "SLOTS_NOT_FOUND",
            Self::SlotNotInitialized(_) => "SLOT_NOT_INITIALIZED",
            Self::NoPortAvailable(_) => "NO_PORT_AVAILABLE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ImagePullFailed(_) => "IMAGE_PULL_FAILED",
            Self::ContainerCleanupFailed(_) => "CONTAINER_CLEANUP_FAILED",
            Self::EnvSyncFailed(_) => "ENV_SYNC_FAILED",
            Self::ContainerStartFailed(_) => "CONTAINER_START_FAILED",
            Self::HealthCheckFailed { .. } => "HEALTH_CHECK_FAILED",
            Self::RegistryUpdateFailed(_) => "REGISTRY_UPDATE_FAILED",
            Self::ReverseProxyUpdateFailed(_) => "REVERSE_PROXY_UPDATE_FAILED",
            Self::NotDeployed { .. } => "NOT_DEPLOYED",
            Self::NoRollbackTarget => "NO_ROLLBACK_TARGET",
            Self::RollbackTargetUnavailable { .. } => "ROLLBACK_TARGET_UNAVAILABLE",
            Self::NoGraceSlot => "NO_GRACE_SLOT",
            Self::GracePeriodActive { .. } => "GRACE_PERIOD_ACTIVE",
            Self::Runtime(_) => "RUNTIME_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::ConfigNotFound(_) | Self::InvalidConfig(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) | Self::Yaml(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Diagnostic log tail captured by a failed health check, if any.
    pub fn logs(&self) -> Option<&str> {
        match self {
            Self::HealthCheckFailed { logs, .. } if !logs.is_empty() => Some(logs),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
