use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{OrchestratorError, Result};
use crate::models::config::RuntimeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" | "configured" | "initialized" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "restarting" => ContainerStatus::Restarting,
            "paused" => ContainerStatus::Paused,
            "exited" | "stopped" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }

    /// The workload is gone and won't come back on its own.
    pub fn has_stopped(self) -> bool {
        matches!(self, ContainerStatus::Exited | ContainerStatus::Dead)
    }
}

/// Health-probe status as reported by the runtime itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeHealth {
    Healthy,
    Unhealthy,
    Starting,
    /// The container declares no health probe.
    None,
}

impl ProbeHealth {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "healthy" => ProbeHealth::Healthy,
            "unhealthy" => ProbeHealth::Unhealthy,
            "starting" => ProbeHealth::Starting,
            _ => ProbeHealth::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub status: ContainerStatus,
    pub exit_code: Option<i32>,
    pub health: ProbeHealth,
}

/// Everything needed to start one slot workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub env_file: Option<PathBuf>,
    pub restart: String,
    pub memory: String,
    pub cpus: String,
    pub health_cmd: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// The container runtime CLI surface the engine drives.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn pull(&self, image: &str) -> Result<()>;
    /// Start detached. Returns the container id.
    async fn run(&self, spec: &RunSpec) -> Result<String>;
    /// Stop and remove. `Ok(false)` when no such container existed.
    async fn remove(&self, name: &str) -> Result<bool>;
    /// `None` when no such container exists.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>>;
    async fn logs(&self, name: &str, tail: u32) -> Result<String>;
    /// HTTP GET from inside the container's network namespace. True on success.
    async fn exec_http_probe(&self, name: &str, port: u16, path: &str) -> Result<bool>;
}

/// `podman`/`docker` driven as a child process, every call under a timeout.
pub struct ContainerCli {
    binary: String,
    command_timeout: Duration,
    pull_timeout: Duration,
}

impl ContainerCli {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            command_timeout: config.command_timeout(),
            pull_timeout: config.pull_timeout(),
        }
    }

    async fn output(&self, args: &[String], timeout: Duration) -> Result<Output> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(OrchestratorError::Runtime(format!(
                "failed to start {}: {e}",
                self.binary
            ))),
            Err(_) => Err(OrchestratorError::Runtime(format!(
                "{} {} timed out after {}s",
                self.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                timeout.as_secs()
            ))),
        }
    }

    async fn run_cli(&self, args: &[String], timeout: Duration) -> Result<String> {
        let output = self.output(args, timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::Runtime(format!(
                "{} {} failed (exit {}): {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn is_missing(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such container")
        || stderr.contains("no such object")
        || stderr.contains("no container with name or id")
}

pub fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = strings(&["run", "-d", "--name", &spec.name]);
    args.push("--restart".into());
    args.push(spec.restart.clone());
    args.push("--memory".into());
    args.push(spec.memory.clone());
    args.push("--cpus".into());
    args.push(spec.cpus.clone());
    args.push("-p".into());
    args.push(format!("{}:{}", spec.host_port, spec.container_port));
    if let Some(env_file) = &spec.env_file {
        args.push("--env-file".into());
        args.push(env_file.to_string_lossy().to_string());
    }
    if let Some(health_cmd) = &spec.health_cmd {
        args.push("--health-cmd".into());
        args.push(health_cmd.clone());
        args.push("--health-interval".into());
        args.push("10s".into());
        args.push("--health-retries".into());
        args.push("3".into());
    }
    for (key, value) in &spec.labels {
        args.push("--label".into());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.image.clone());
    args
}

const INSPECT_FORMAT: &str =
    "{{.State.Status}}|{{.State.ExitCode}}|{{if .State.Health}}{{.State.Health.Status}}{{end}}";

pub fn parse_inspect(output: &str) -> ContainerState {
    let mut parts = output.trim().splitn(3, '|');
    let status = ContainerStatus::parse(parts.next().unwrap_or_default());
    let exit_code = parts.next().and_then(|c| c.trim().parse().ok());
    let health = ProbeHealth::parse(parts.next().unwrap_or_default());
    ContainerState {
        status,
        exit_code,
        health,
    }
}

/// Shell snippet probing `path` on the workload's own loopback.
pub fn probe_command(port: u16, path: &str) -> String {
    let url = format!("http://127.0.0.1:{port}{path}");
    format!("wget -q -O /dev/null {url} || curl -fsS -o /dev/null {url}")
}

#[async_trait]
impl ContainerRuntime for ContainerCli {
    async fn pull(&self, image: &str) -> Result<()> {
        self.run_cli(&strings(&["pull", image]), self.pull_timeout)
            .await?;
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> Result<String> {
        self.run_cli(&run_args(spec), self.command_timeout).await
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let stop = self
            .output(&strings(&["stop", "-t", "10", name]), self.command_timeout)
            .await?;
        if !stop.status.success() && is_missing(&String::from_utf8_lossy(&stop.stderr)) {
            return Ok(false);
        }
        let rm = self
            .output(&strings(&["rm", "-f", name]), self.command_timeout)
            .await?;
        if rm.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&rm.stderr);
        if is_missing(&stderr) {
            return Ok(false);
        }
        Err(OrchestratorError::Runtime(format!(
            "{} rm {name} failed: {}",
            self.binary,
            stderr.trim()
        )))
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        let args = strings(&["inspect", "--format", INSPECT_FORMAT, name]);
        let output = self.output(&args, self.command_timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing(&stderr) {
                return Ok(None);
            }
            return Err(OrchestratorError::Runtime(format!(
                "{} inspect {name} failed: {}",
                self.binary,
                stderr.trim()
            )));
        }
        Ok(Some(parse_inspect(&String::from_utf8_lossy(
            &output.stdout,
        ))))
    }

    async fn logs(&self, name: &str, tail: u32) -> Result<String> {
        let tail = tail.to_string();
        let output = self
            .output(&strings(&["logs", "--tail", &tail, name]), self.command_timeout)
            .await?;
        // Container logs arrive on both streams.
        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(combined.trim().to_string())
    }

    async fn exec_http_probe(&self, name: &str, port: u16, path: &str) -> Result<bool> {
        let script = probe_command(port, path);
        let output = self
            .output(&strings(&["exec", name, "sh", "-c", &script]), self.command_timeout)
            .await?;
        Ok(output.status.success())
    }
}
