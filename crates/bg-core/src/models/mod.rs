pub mod config;
pub mod deployment;
pub mod environment;
pub mod project;
pub mod request;
pub mod slot;

pub use config::PlatformConfig;
pub use deployment::{
    CleanupResult, DeployStep, DeploymentRecord, DeploymentResult, DeploymentStatus,
    PromoteResult, RollbackResult, StepStatus,
};
pub use environment::Environment;
pub use project::{Caller, Project, Role};
pub use request::{CleanupRequest, DeployRequest, HistoryRequest, ScopeRequest};
pub use slot::{HealthStatus, ProjectSlots, Slot, SlotName, SlotState};
