use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{OrchestratorError, Result};
use crate::models::{Environment, ProjectSlots};

/// One place a slot registry can live.
#[async_trait]
pub trait SlotBackend: Send + Sync {
    async fn get(&self, project: &str, environment: Environment) -> Result<Option<ProjectSlots>>;
    async fn put(&self, slots: &ProjectSlots) -> Result<()>;
    async fn list(&self) -> Result<Vec<ProjectSlots>>;
}

/// Primary-authoritative, secondary-advisory composition of two backends.
///
/// Writes must land in the primary; the secondary copy is a best-effort mirror
/// used for bootstrap and disaster recovery.
#[derive(Clone)]
pub struct SlotStore {
    primary: Arc<dyn SlotBackend>,
    secondary: Arc<dyn SlotBackend>,
}

impl SlotStore {
    pub fn new(primary: Arc<dyn SlotBackend>, secondary: Arc<dyn SlotBackend>) -> Self {
        Self { primary, secondary }
    }

    /// Primary first. A secondary-only record is promoted into the primary before it is returned.
    pub async fn get(&self, project: &str, environment: Environment) -> Result<ProjectSlots> {
        if let Some(slots) = self.primary.get(project, environment).await? {
            return Ok(slots);
        }

        let recovered = match self.secondary.get(project, environment).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(project, %environment, error = %e, "secondary slot read failed");
                None
            }
        };
        let Some(slots) = recovered else {
            return Err(OrchestratorError::SlotsNotFound {
                project: project.to_string(),
                environment,
            });
        };

        self.primary.put(&slots).await?;
        tracing::info!(project, %environment, "restored slot registry from secondary store");
        Ok(slots)
    }

    /// Like [`SlotStore::get`] but a missing registry is `None` rather than an error.
    pub async fn find(
        &self,
        project: &str,
        environment: Environment,
    ) -> Result<Option<ProjectSlots>> {
        match self.get(project, environment).await {
            Ok(slots) => Ok(Some(slots)),
            Err(OrchestratorError::SlotsNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn upsert(&self, slots: &ProjectSlots) -> Result<()> {
        self.primary.put(slots).await?;
        self.mirror(slots).await;
        Ok(())
    }

    /// Every registry either backend knows about, primary winning per
    /// (project, environment). Secondary-only records are restored into the primary.
    pub async fn list_all(&self) -> Result<Vec<ProjectSlots>> {
        let mut all = self.primary.list().await?;
        let mirrored = match self.secondary.list().await {
            Ok(mirrored) => mirrored,
            Err(e) => {
                tracing::warn!(error = %e, "secondary slot listing failed");
                return Ok(all);
            }
        };

        for slots in mirrored {
            let known = all.iter().any(|s| {
                s.project_name == slots.project_name && s.environment == slots.environment
            });
            if known {
                continue;
            }
            match self.primary.put(&slots).await {
                Ok(()) => tracing::info!(
                    project = %slots.project_name,
                    environment = %slots.environment,
                    "restored slot registry from secondary store"
                ),
                Err(e) => tracing::warn!(
                    project = %slots.project_name,
                    environment = %slots.environment,
                    error = %e,
                    "could not restore secondary-only slot registry"
                ),
            }
            all.push(slots);
        }
        Ok(all)
    }

    /// Rewrite the primary's value over the secondary copy.
    pub async fn repair(&self, project: &str, environment: Environment) -> Result<()> {
        let slots = self.get(project, environment).await?;
        self.secondary.put(&slots).await
    }

    async fn mirror(&self, slots: &ProjectSlots) {
        if let Err(e) = self.secondary.put(slots).await {
            tracing::warn!(
                project = %slots.project_name,
                environment = %slots.environment,
                error = %e,
                "secondary slot mirror write failed"
            );
        }
    }
}

type SlotKey = (String, Environment);

/// In-process backend, used for tests and embedding.
#[derive(Default)]
pub struct MemorySlotBackend {
    slots: RwLock<HashMap<SlotKey, ProjectSlots>>,
    fail_writes: AtomicBool,
}

impl MemorySlotBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `put` calls fail, to exercise degraded-store paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock_error() -> OrchestratorError {
        OrchestratorError::Store("memory slot backend lock poisoned".into())
    }
}

#[async_trait]
impl SlotBackend for MemorySlotBackend {
    async fn get(&self, project: &str, environment: Environment) -> Result<Option<ProjectSlots>> {
        let slots = self.slots.read().map_err(|_| Self::lock_error())?;
        Ok(slots.get(&(project.to_string(), environment)).cloned())
    }

    async fn put(&self, slots: &ProjectSlots) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Store("write rejected".into()));
        }
        let mut map = self.slots.write().map_err(|_| Self::lock_error())?;
        map.insert(
            (slots.project_name.clone(), slots.environment),
            slots.clone(),
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProjectSlots>> {
        let slots = self.slots.read().map_err(|_| Self::lock_error())?;
        Ok(slots.values().cloned().collect())
    }
}

/// One pretty-printed JSON document per project and environment.
pub struct FileSlotBackend {
    slots_directory: PathBuf,
}

impl FileSlotBackend {
    pub fn new(slots_directory: &Path) -> Self {
        Self {
            slots_directory: slots_directory.to_path_buf(),
        }
    }

    pub fn file_path(&self, project: &str, environment: Environment) -> PathBuf {
        self.slots_directory
            .join(format!("{project}.{environment}.json"))
    }
}

#[async_trait]
impl SlotBackend for FileSlotBackend {
    async fn get(&self, project: &str, environment: Environment) -> Result<Option<ProjectSlots>> {
        let path = self.file_path(project, environment);
        if !path.exists() {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| OrchestratorError::Store(format!("failed to read slot file: {e}")))?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    async fn put(&self, slots: &ProjectSlots) -> Result<()> {
        tokio::fs::create_dir_all(&self.slots_directory)
            .await
            .map_err(|e| OrchestratorError::Store(format!("failed to create slots dir: {e}")))?;
        let path = self.file_path(&slots.project_name, slots.environment);
        let json = serde_json::to_string_pretty(slots)?;
        // Write-then-rename so readers never observe a torn file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| OrchestratorError::Store(format!("failed to write slot file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| OrchestratorError::Store(format!("failed to write slot file: {e}")))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProjectSlots>> {
        if !self.slots_directory.exists() {
            return Ok(Vec::new());
        }
        let mut entries = tokio::fs::read_dir(&self.slots_directory).await?;
        let mut all = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<ProjectSlots>(&json) {
                Ok(slots) => all.push(slots),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable slot file")
                }
            }
        }
        Ok(all)
    }
}
