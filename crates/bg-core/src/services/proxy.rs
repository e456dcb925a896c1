use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{OrchestratorError, Result};
use crate::models::config::ProxyConfig;
use crate::models::{Environment, Project, SlotName};

/// Routing for one project+environment: live upstream first, standby as failover only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySite {
    pub project: String,
    pub environment: Environment,
    pub domain: String,
    pub slot: SlotName,
    pub version: Option<String>,
    pub primary_port: u16,
    pub standby_port: Option<u16>,
}

/// Public hostname for a project's environment.
pub fn site_domain(project: &Project, environment: Environment, base_domain: &str) -> String {
    match (environment, &project.domain) {
        (Environment::Production, Some(domain)) => domain.clone(),
        (Environment::Production, None) => format!("{}.{base_domain}", project.name),
        _ => format!("{}-{environment}.{base_domain}", project.name),
    }
}

pub fn render_caddy(site: &ProxySite) -> String {
    let mut upstreams = format!("127.0.0.1:{}", site.primary_port);
    if let Some(standby) = site.standby_port {
        let _ = write!(upstreams, " 127.0.0.1:{standby}");
    }
    let version = site.version.as_deref().unwrap_or("unknown");

    let mut out = String::new();
    let _ = writeln!(out, "# {} ({}) - generated, do not edit", site.project, site.environment);
    let _ = writeln!(out, "{} {{", site.domain);
    let _ = writeln!(out, "    reverse_proxy {upstreams} {{");
    let _ = writeln!(out, "        lb_policy first");
    let _ = writeln!(out, "        fail_duration 30s");
    let _ = writeln!(out, "        max_fails 1");
    let _ = writeln!(out, "        unhealthy_status 5xx");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "    header {{");
    let _ = writeln!(out, "        X-Project {}", quoted(&site.project));
    let _ = writeln!(out, "        X-Environment {}", quoted(site.environment.as_str()));
    let _ = writeln!(out, "        X-Version {}", quoted(version));
    let _ = writeln!(out, "        X-Slot {}", quoted(site.slot.as_str()));
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    out
}

/// Caddyfile double-quoted token. Control characters are dropped so a value
/// can never end the line or the block it sits in.
fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars().filter(|c| !c.is_control()) {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Writes the routing for one site and makes the proxy pick it up.
#[async_trait]
pub trait ReverseProxy: Send + Sync {
    async fn apply(&self, site: &ProxySite) -> Result<()>;
}

/// One Caddyfile snippet per project+environment, then a graceful reload.
pub struct CaddyProxy {
    sites_directory: PathBuf,
    reload_command: Vec<String>,
    reload_timeout: Duration,
}

impl CaddyProxy {
    pub fn new(sites_directory: &Path, config: &ProxyConfig) -> Self {
        Self {
            sites_directory: sites_directory.to_path_buf(),
            reload_command: config.reload_command.clone(),
            reload_timeout: Duration::from_secs(config.reload_timeout_secs),
        }
    }

    pub fn site_path(&self, project: &str, environment: Environment) -> PathBuf {
        self.sites_directory
            .join(format!("{project}-{environment}.caddy"))
    }

    async fn reload(&self) -> Result<()> {
        let Some((program, args)) = self.reload_command.split_first() else {
            return Err(OrchestratorError::ReverseProxyUpdateFailed(
                "no reload command configured".into(),
            ));
        };
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        let output = tokio::time::timeout(self.reload_timeout, cmd.output())
            .await
            .map_err(|_| {
                OrchestratorError::ReverseProxyUpdateFailed(format!(
                    "reload timed out after {}s",
                    self.reload_timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                OrchestratorError::ReverseProxyUpdateFailed(format!("failed to run {program}: {e}"))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::ReverseProxyUpdateFailed(format!(
                "reload failed (exit {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ReverseProxy for CaddyProxy {
    async fn apply(&self, site: &ProxySite) -> Result<()> {
        let write_err = |e: std::io::Error| OrchestratorError::ReverseProxyUpdateFailed(e.to_string());
        tokio::fs::create_dir_all(&self.sites_directory)
            .await
            .map_err(write_err)?;

        let path = self.site_path(&site.project, site.environment);
        let previous = tokio::fs::read_to_string(&path).await.ok();
        tokio::fs::write(&path, render_caddy(site))
            .await
            .map_err(write_err)?;

        if let Err(e) = self.reload().await {
            // Put the old routing back so the file matches what the proxy is serving.
            let restored = match &previous {
                Some(contents) => tokio::fs::write(&path, contents).await,
                None => tokio::fs::remove_file(&path).await,
            };
            if let Err(restore_err) = restored {
                tracing::error!(path = %path.display(), error = %restore_err, "failed to restore proxy config");
            }
            return Err(e);
        }

        tracing::info!(
            project = %site.project,
            environment = %site.environment,
            domain = %site.domain,
            primary = site.primary_port,
            standby = ?site.standby_port,
            "reverse proxy updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> ProxySite {
        ProxySite {
            project: "demo".into(),
            environment: Environment::Production,
            domain: "demo.apps.example.com".into(),
            slot: SlotName::Green,
            version: Some("v2".into()),
            primary_port: 4101,
            standby_port: Some(4100),
        }
    }

    #[test]
    fn renders_primary_before_standby() {
        insta::assert_snapshot!(render_caddy(&site()), @r###"
        # demo (production) - generated, do not edit
        demo.apps.example.com {
            reverse_proxy 127.0.0.1:4101 127.0.0.1:4100 {
                lb_policy first
                fail_duration 30s
                max_fails 1
                unhealthy_status 5xx
            }
            header {
                X-Project "demo"
                X-Environment "production"
                X-Version "v2"
                X-Slot "green"
            }
        }
        "###);
    }

    #[test]
    fn renders_without_standby() {
        let mut site = site();
        site.standby_port = None;
        let rendered = render_caddy(&site);
        assert!(rendered.contains("    reverse_proxy 127.0.0.1:4101 {\n"));
    }

    #[test]
    fn header_values_cannot_break_out_of_the_site_block() {
        let mut site = site();
        site.version = Some("v1\"\n    }\n}\nvictim.apps.io {\n    reverse_proxy 10.0.0.9:22".into());
        let rendered = render_caddy(&site);
        assert!(!rendered.contains("victim.apps.io {\n"));
        assert_eq!(rendered.lines().count(), 15);
        assert!(rendered.contains(
            r#"X-Version "v1\"    }}victim.apps.io {    reverse_proxy 10.0.0.9:22""#
        ));
    }

    #[test]
    fn quoting_escapes_backslashes() {
        assert_eq!(quoted(r"a\b"), r#""a\\b""#);
        assert_eq!(quoted("tab\there"), r#""tabhere""#);
    }

    #[test]
    fn domains_per_environment() {
        let mut project = Project {
            name: "demo".into(),
            team_id: "team-a".into(),
            domain: None,
        };
        assert_eq!(
            site_domain(&project, Environment::Production, "apps.io"),
            "demo.apps.io"
        );
        assert_eq!(
            site_domain(&project, Environment::Staging, "apps.io"),
            "demo-staging.apps.io"
        );
        project.domain = Some("www.demo.com".into());
        assert_eq!(
            site_domain(&project, Environment::Production, "apps.io"),
            "www.demo.com"
        );
        assert_eq!(
            site_domain(&project, Environment::Preview, "apps.io"),
            "demo-preview.apps.io"
        );
    }

    fn proxy(dir: &Path, reload: &[&str]) -> CaddyProxy {
        CaddyProxy::new(
            dir,
            &ProxyConfig {
                reload_command: reload.iter().map(|s| s.to_string()).collect(),
                reload_timeout_secs: 5,
            },
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn apply_writes_site_file() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(dir.path(), &["true"]);
        proxy.apply(&site()).await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("demo-production.caddy")).unwrap();
        assert_eq!(written, render_caddy(&site()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_reload_restores_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo-production.caddy");
        std::fs::write(&path, "previous").unwrap();

        let proxy = proxy(dir.path(), &["false"]);
        let err = proxy.apply(&site()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ReverseProxyUpdateFailed(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous");
    }
}
