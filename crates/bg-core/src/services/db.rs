//! Embedded `redb` database backing the authoritative registry.
//!
//! Every table maps a string key to a JSON-encoded value:
//!
//! ```text
//! slots         "{project}/{environment}" -> ProjectSlots
//! deployments   "{deployment id}"         -> DeploymentRecord
//! environments  "{project}/{environment}" -> EnvRecord
//! projects      "{project}"               -> Project
//! ```

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{OrchestratorError, Result};
use crate::models::{DeploymentRecord, Environment, Project, ProjectSlots};

use super::env_store::{EnvRecord, EnvStore};
use super::history::{self, DeploymentHistory};
use super::projects::ProjectRegistry;
use super::state::SlotBackend;

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

const SLOTS: JsonTable = TableDefinition::new("slots");
const DEPLOYMENTS: JsonTable = TableDefinition::new("deployments");
const ENVIRONMENTS: JsonTable = TableDefinition::new("environments");
const PROJECTS: JsonTable = TableDefinition::new("projects");

fn store_err(e: impl Display) -> OrchestratorError {
    OrchestratorError::Store(e.to_string())
}

fn scoped_key(project: &str, environment: Environment) -> String {
    format!("{project}/{environment}")
}

#[derive(Clone)]
pub struct RegistryDb {
    db: Arc<Database>,
}

impl RegistryDb {
    /// Open or create the database at `path`, creating every table up front.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        for table in [SLOTS, DEPLOYMENTS, ENVIRONMENTS, PROJECTS] {
            wt.open_table(table).map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn read<T>(&self, table: JsonTable, key: String) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || read_json(&db, table, &key))
            .await
            .map_err(store_err)?
    }

    async fn write<T>(&self, table: JsonTable, key: String, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let bytes = serde_json::to_vec(value)?;
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || write_json(&db, table, &key, &bytes))
            .await
            .map_err(store_err)?
    }

    async fn scan<T>(&self, table: JsonTable) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || scan_json(&db, table))
            .await
            .map_err(store_err)?
    }
}

fn read_json<T: DeserializeOwned>(db: &Database, table: JsonTable, key: &str) -> Result<Option<T>> {
    let rt = db.begin_read().map_err(store_err)?;
    let table = rt.open_table(table).map_err(store_err)?;
    match table.get(key).map_err(store_err)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

fn write_json(db: &Database, table: JsonTable, key: &str, bytes: &[u8]) -> Result<()> {
    let wt = db.begin_write().map_err(store_err)?;
    {
        let mut table = wt.open_table(table).map_err(store_err)?;
        table.insert(key, bytes).map_err(store_err)?;
    }
    wt.commit().map_err(store_err)?;
    Ok(())
}

fn scan_json<T: DeserializeOwned>(db: &Database, table: JsonTable) -> Result<Vec<T>> {
    let rt = db.begin_read().map_err(store_err)?;
    let table = rt.open_table(table).map_err(store_err)?;
    let mut values = Vec::new();
    for entry in table.iter().map_err(store_err)? {
        let (_, value) = entry.map_err(store_err)?;
        values.push(serde_json::from_slice(value.value())?);
    }
    Ok(values)
}

#[async_trait]
impl SlotBackend for RegistryDb {
    async fn get(&self, project: &str, environment: Environment) -> Result<Option<ProjectSlots>> {
        self.read(SLOTS, scoped_key(project, environment)).await
    }

    async fn put(&self, slots: &ProjectSlots) -> Result<()> {
        self.write(
            SLOTS,
            scoped_key(&slots.project_name, slots.environment),
            slots,
        )
        .await
    }

    async fn list(&self) -> Result<Vec<ProjectSlots>> {
        self.scan(SLOTS).await
    }
}

#[async_trait]
impl DeploymentHistory for RegistryDb {
    async fn record(&self, record: &DeploymentRecord) -> Result<()> {
        self.write(DEPLOYMENTS, record.id.clone(), record).await
    }

    async fn get(&self, id: &str) -> Result<Option<DeploymentRecord>> {
        self.read(DEPLOYMENTS, id.to_string()).await
    }

    async fn list(
        &self,
        project: &str,
        environment: Environment,
        limit: usize,
    ) -> Result<Vec<DeploymentRecord>> {
        let all: Vec<DeploymentRecord> = self.scan(DEPLOYMENTS).await?;
        Ok(history::newest_first(
            all.into_iter(),
            project,
            environment,
            limit,
        ))
    }
}

#[async_trait]
impl EnvStore for RegistryDb {
    async fn get(&self, project: &str, environment: Environment) -> Result<Option<EnvRecord>> {
        self.read(ENVIRONMENTS, scoped_key(project, environment))
            .await
    }

    async fn put(&self, record: &EnvRecord) -> Result<()> {
        self.write(
            ENVIRONMENTS,
            scoped_key(&record.project_name, record.environment),
            record,
        )
        .await
    }
}

#[async_trait]
impl ProjectRegistry for RegistryDb {
    async fn get(&self, name: &str) -> Result<Option<Project>> {
        self.read(PROJECTS, name.to_string()).await
    }

    async fn put(&self, project: &Project) -> Result<()> {
        self.write(PROJECTS, project.name.clone(), project).await
    }
}
