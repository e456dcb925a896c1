use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::project::{Project, Role};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_base_domain")]
    pub base_domain: String,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub env_dir: Option<PathBuf>,
    #[serde(default)]
    pub proxy_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default = "default_grace_hours")]
    pub grace_hours: u32,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl PlatformConfig {
    /// Config with every optional field defaulted, rooted at `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            listen: default_listen(),
            base_domain: default_base_domain(),
            data_dir,
            env_dir: None,
            proxy_dir: None,
            log_dir: None,
            runtime: RuntimeConfig::default(),
            registry: RegistryConfig::default(),
            health: HealthConfig::default(),
            proxy: ProxyConfig::default(),
            grace_hours: default_grace_hours(),
            sweep_interval_secs: default_sweep_interval(),
            api_keys: Vec::new(),
            projects: Vec::new(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("registry.redb")
    }

    pub fn slots_dir(&self) -> PathBuf {
        self.data_dir.join("slots")
    }

    pub fn env_dir(&self) -> PathBuf {
        self.env_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("env"))
    }

    pub fn proxy_dir(&self) -> PathBuf {
        self.proxy_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("caddy"))
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.grace_hours))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Container CLI, `podman` or `docker`.
    pub binary: String,
    pub memory: String,
    pub cpus: String,
    pub restart: String,
    pub container_port: u16,
    pub command_timeout_secs: u64,
    pub pull_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "podman".into(),
            memory: "512m".into(),
            cpus: "1".into(),
            restart: "unless-stopped".into(),
            container_port: 3000,
            command_timeout_secs: 60,
            pull_timeout_secs: 300,
        }
    }
}

impl RuntimeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    /// Private registry host, e.g. `registry.internal:5000`.
    pub private: Option<String>,
    /// Public fallback namespace, e.g. `ghcr.io/acme`.
    pub public: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthConfig {
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub startup_delay_secs: u64,
    pub probe_timeout_secs: u64,
    pub log_tail: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            poll_interval_secs: 5,
            startup_delay_secs: 3,
            probe_timeout_secs: 5,
            log_tail: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    pub reload_command: Vec<String>,
    pub reload_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            reload_command: vec![
                "caddy".into(),
                "reload".into(),
                "--config".into(),
                "/etc/caddy/Caddyfile".into(),
            ],
            reload_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyConfig {
    pub key: String,
    pub team_id: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_listen() -> String {
    "127.0.0.1:7070".into()
}

fn default_base_domain() -> String {
    "localhost".into()
}

fn default_grace_hours() -> u32 {
    48
}

fn default_sweep_interval() -> u64 {
    900
}

fn default_role() -> Role {
    Role::Member
}
