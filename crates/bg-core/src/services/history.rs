use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{OrchestratorError, Result};
use crate::models::{DeploymentRecord, Environment};

/// Audit trail of deploy attempts and their step outcomes.
///
/// Records are written once as `pending` and replaced when the pipeline
/// finishes; they are never deleted.
#[async_trait]
pub trait DeploymentHistory: Send + Sync {
    async fn record(&self, record: &DeploymentRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<DeploymentRecord>>;
    /// Newest first.
    async fn list(
        &self,
        project: &str,
        environment: Environment,
        limit: usize,
    ) -> Result<Vec<DeploymentRecord>>;
}

pub(crate) fn newest_first(
    records: impl Iterator<Item = DeploymentRecord>,
    project: &str,
    environment: Environment,
    limit: usize,
) -> Vec<DeploymentRecord> {
    let mut matching: Vec<DeploymentRecord> = records
        .filter(|r| r.project_name == project && r.environment == environment)
        .collect();
    matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    matching.truncate(limit);
    matching
}

#[derive(Default)]
pub struct MemoryHistory {
    records: RwLock<HashMap<String, DeploymentRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentHistory for MemoryHistory {
    async fn record(&self, record: &DeploymentRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| OrchestratorError::Store("history lock poisoned".into()))?;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DeploymentRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| OrchestratorError::Store("history lock poisoned".into()))?;
        Ok(records.get(id).cloned())
    }

    async fn list(
        &self,
        project: &str,
        environment: Environment,
        limit: usize,
    ) -> Result<Vec<DeploymentRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| OrchestratorError::Store("history lock poisoned".into()))?;
        Ok(newest_first(
            records.values().cloned(),
            project,
            environment,
            limit,
        ))
    }
}
