use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::models::Environment;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvRecord {
    pub project_name: String,
    pub environment: Environment,
    pub variables: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

/// Central store of workload environment variables. Authoritative over host files.
#[async_trait]
pub trait EnvStore: Send + Sync {
    async fn get(&self, project: &str, environment: Environment) -> Result<Option<EnvRecord>>;
    async fn put(&self, record: &EnvRecord) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSource {
    Central,
    HostFile,
}

/// The env file a workload is started with, and where its contents came from.
#[derive(Debug, Clone)]
pub struct ResolvedEnv {
    pub path: PathBuf,
    pub source: EnvSource,
    pub variable_count: usize,
    pub warning: Option<String>,
}

/// Host-side `.env.{environment}` files, one directory per project.
pub struct HostEnvFiles {
    root: PathBuf,
}

impl HostEnvFiles {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn path(&self, project: &str, environment: Environment) -> PathBuf {
        self.root.join(project).join(format!(".env.{environment}"))
    }

    async fn read(&self, project: &str, environment: Environment) -> Result<Option<BTreeMap<String, String>>> {
        let path = self.path(project, environment);
        if !path.exists() {
            return Ok(None);
        }
        let contents = tokio::fs::read_to_string(&path).await?;
        Ok(Some(parse_dotenv(&contents)))
    }

    async fn write(
        &self,
        project: &str,
        environment: Environment,
        variables: &BTreeMap<String, String>,
    ) -> Result<PathBuf> {
        let path = self.path(project, environment);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = render_dotenv(variables)?;
        write_private(&path, contents.as_bytes()).await?;
        Ok(path)
    }
}

/// Central record wins and is written over the host file. A host-only file is
/// used as-is and backed up centrally for the next deploy.
pub async fn resolve(
    central: &dyn EnvStore,
    host: &HostEnvFiles,
    project: &str,
    environment: Environment,
) -> Result<ResolvedEnv> {
    let sync_err = |e: OrchestratorError| match e {
        OrchestratorError::EnvSyncFailed(_) => e,
        other => OrchestratorError::EnvSyncFailed(other.to_string()),
    };

    if let Some(record) = central.get(project, environment).await.map_err(sync_err)? {
        let path = host
            .write(project, environment, &record.variables)
            .await
            .map_err(sync_err)?;
        return Ok(ResolvedEnv {
            path,
            source: EnvSource::Central,
            variable_count: record.variables.len(),
            warning: None,
        });
    }

    let Some(variables) = host.read(project, environment).await.map_err(sync_err)? else {
        return Err(OrchestratorError::EnvSyncFailed(format!(
            "no environment record for {project} ({environment}) centrally or at {}",
            host.path(project, environment).display()
        )));
    };

    let record = EnvRecord {
        project_name: project.to_string(),
        environment,
        variables,
        updated_at: Utc::now(),
    };
    let warning = match central.put(&record).await {
        Ok(()) => {
            tracing::info!(project, %environment, "backed up host env file to central store");
            None
        }
        Err(e) => {
            tracing::warn!(project, %environment, error = %e, "central env backup failed");
            Some(format!("central env backup failed: {e}"))
        }
    };
    Ok(ResolvedEnv {
        path: host.path(project, environment),
        source: EnvSource::HostFile,
        variable_count: record.variables.len(),
        warning,
    })
}

pub fn parse_dotenv(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// One `KEY=value` line per variable, values written literally as the
/// runtime's `--env-file` reads them. Anything that would not come back
/// unchanged is refused: line breaks, quotes or padding around the value, bad keys.
pub fn render_dotenv(variables: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::new();
    for (key, value) in variables {
        let key_ok = key
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !key_ok {
            return Err(OrchestratorError::EnvSyncFailed(format!(
                "invalid variable name '{}'",
                key.escape_default()
            )));
        }
        if value.chars().any(char::is_control)
            || value.starts_with(['"', '\''])
            || value.trim() != value
        {
            return Err(OrchestratorError::EnvSyncFailed(format!(
                "value of {key} cannot be written to an env file"
            )));
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    Ok(out)
}

/// Env files hold secrets: owner read/write only.
async fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    file.write_all(contents).await?;
    file.flush().await?;
    Ok(())
}

#[derive(Default)]
pub struct MemoryEnvStore {
    records: RwLock<HashMap<(String, Environment), EnvRecord>>,
}

impl MemoryEnvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnvStore for MemoryEnvStore {
    async fn get(&self, project: &str, environment: Environment) -> Result<Option<EnvRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| OrchestratorError::Store("env store lock poisoned".into()))?;
        Ok(records.get(&(project.to_string(), environment)).cloned())
    }

    async fn put(&self, record: &EnvRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| OrchestratorError::Store("env store lock poisoned".into()))?;
        records.insert(
            (record.project_name.clone(), record.environment),
            record.clone(),
        );
        Ok(())
    }
}
