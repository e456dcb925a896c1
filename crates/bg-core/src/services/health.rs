use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{OrchestratorError, Result};
use crate::models::config::HealthConfig;

use super::probe::{self, HttpProbe};
use super::runtime::{ContainerRuntime, ProbeHealth};

/// Paths probed in order; any 2xx counts.
pub const HEALTH_PATHS: [&str; 2] = ["/health", "/api/health"];

const LOG_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Which signal declared the workload healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSignal {
    RuntimeProbe,
    ContainerHttp,
    HostHttp,
}

impl HealthSignal {
    pub fn describe(self) -> &'static str {
        match self {
            HealthSignal::RuntimeProbe => "runtime health probe reported healthy",
            HealthSignal::ContainerHttp => "in-container HTTP probe succeeded",
            HealthSignal::HostHttp => "host HTTP probe succeeded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub poll_interval: Duration,
    pub startup_delay: Duration,
    pub log_tail: u32,
    /// Port the workload listens on inside its own network namespace.
    pub container_port: u16,
}

impl HealthSettings {
    pub fn from_config(config: &HealthConfig, container_port: u16) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            startup_delay: Duration::from_secs(config.startup_delay_secs),
            log_tail: config.log_tail,
            container_port,
        }
    }
}

pub struct HealthChecker {
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HttpProbe>,
    settings: HealthSettings,
}

impl HealthChecker {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn HttpProbe>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            runtime,
            probe,
            settings,
        }
    }

    /// Poll `container` until one health signal passes or `timeout` elapses.
    ///
    /// A container that has already exited, or whose runtime probe reports
    /// unhealthy, fails at once with its recent logs.
    pub async fn wait_for_healthy(
        &self,
        container: &str,
        host_port: u16,
        timeout: Duration,
    ) -> Result<HealthSignal> {
        let started = Instant::now();
        let deadline = started + timeout;
        tokio::time::sleep(self.settings.startup_delay.min(timeout)).await;

        // The deadline cuts through a poll that is still waiting on the runtime.
        let checking = self.check_until_healthy(container, host_port);
        match tokio::time::timeout_at(deadline, checking).await {
            Ok(Ok(signal)) => {
                tracing::info!(
                    container,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    signal = signal.describe(),
                    "workload healthy"
                );
                Ok(signal)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(self
                .failure(
                    container,
                    format!("Health check failed after {}s", timeout.as_secs()),
                )
                .await),
        }
    }

    async fn check_until_healthy(&self, container: &str, host_port: u16) -> Result<HealthSignal> {
        self.fast_fail(container).await?;
        loop {
            if let Some(signal) = self.poll_once(container, host_port).await? {
                return Ok(signal);
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// A container that is already gone is not worth polling.
    async fn fast_fail(&self, container: &str) -> Result<()> {
        match self.runtime.inspect(container).await {
            Ok(Some(state)) if state.status.has_stopped() => {
                let code = state
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".into());
                Err(self
                    .failure(container, format!("Health check failed: container exited during startup (exit code {code})"))
                    .await)
            }
            Ok(None) => Err(self
                .failure(container, "Health check failed: container is not running".into())
                .await),
            Ok(Some(_)) => Ok(()),
            Err(e) => {
                tracing::warn!(container, error = %e, "startup inspect failed");
                Ok(())
            }
        }
    }

    /// One pass over the three signals. `Ok(None)` means "not yet".
    async fn poll_once(&self, container: &str, host_port: u16) -> Result<Option<HealthSignal>> {
        match self.runtime.inspect(container).await {
            Ok(Some(state)) => {
                if state.status.has_stopped() {
                    return Err(self
                        .failure(container, "Health check failed: container exited".into())
                        .await);
                }
                match state.health {
                    ProbeHealth::Healthy => return Ok(Some(HealthSignal::RuntimeProbe)),
                    ProbeHealth::Unhealthy => {
                        return Err(self
                            .failure(
                                container,
                                "Health check failed: runtime probe reported unhealthy".into(),
                            )
                            .await)
                    }
                    ProbeHealth::Starting | ProbeHealth::None => {}
                }
            }
            Ok(None) => {
                return Err(self
                    .failure(container, "Health check failed: container disappeared".into())
                    .await)
            }
            Err(e) => tracing::debug!(container, error = %e, "inspect failed during health poll"),
        }

        for path in HEALTH_PATHS {
            match self
                .runtime
                .exec_http_probe(container, self.settings.container_port, path)
                .await
            {
                Ok(true) => return Ok(Some(HealthSignal::ContainerHttp)),
                Ok(false) => {}
                Err(e) => tracing::debug!(container, path, error = %e, "in-container probe failed"),
            }
        }

        for path in HEALTH_PATHS {
            let url = probe::local_url(host_port, path);
            match self.probe.status(&url).await {
                Ok(status) if probe::is_success(status) => return Ok(Some(HealthSignal::HostHttp)),
                Ok(status) => tracing::debug!(container, %url, status, "host probe not ready"),
                Err(e) => tracing::debug!(container, %url, error = %e, "host probe failed"),
            }
        }

        Ok(None)
    }

    async fn failure(&self, container: &str, message: String) -> OrchestratorError {
        let tail = self.runtime.logs(container, self.settings.log_tail);
        let logs = match tokio::time::timeout(LOG_FETCH_TIMEOUT, tail).await {
            Ok(Ok(logs)) => logs,
            Ok(Err(e)) => format!("(logs unavailable: {e})"),
            Err(_) => "(logs unavailable: timed out)".to_string(),
        };
        tracing::warn!(container, %message, "health check failed");
        OrchestratorError::HealthCheckFailed { message, logs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::runtime::{ContainerStatus, RunSpec};
    use crate::services::testing::{FakeProbe, FakeRuntime};

    const NAME: &str = "demo-production-blue";

    fn settings() -> HealthSettings {
        HealthSettings {
            poll_interval: Duration::from_secs(5),
            startup_delay: Duration::from_secs(3),
            log_tail: 50,
            container_port: 3000,
        }
    }

    fn started(runtime: &FakeRuntime) {
        runtime.start(RunSpec {
            name: NAME.into(),
            image: "demo:v1".into(),
            host_port: 4100,
            container_port: 3000,
            env_file: None,
            restart: "no".into(),
            memory: "64m".into(),
            cpus: "1".into(),
            health_cmd: None,
            labels: Default::default(),
        });
    }

    fn checker(runtime: Arc<FakeRuntime>, probe: Arc<FakeProbe>) -> HealthChecker {
        HealthChecker::new(runtime, probe, settings())
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_probe_healthy_wins_first() {
        let runtime = Arc::new(FakeRuntime::new());
        started(&runtime);
        runtime.set_health(ProbeHealth::Healthy);
        let signal = checker(runtime, Arc::new(FakeProbe::new()))
            .wait_for_healthy(NAME, 4100, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(signal, HealthSignal::RuntimeProbe);
    }

    #[tokio::test(start_paused = true)]
    async fn in_container_probe_before_host_probe() {
        let runtime = Arc::new(FakeRuntime::new());
        started(&runtime);
        runtime.set_exec_healthy(true);
        let probe = Arc::new(FakeProbe::new());
        probe.serve(4100, 200);
        let signal = checker(runtime, probe)
            .wait_for_healthy(NAME, 4100, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(signal, HealthSignal::ContainerHttp);
    }

    #[tokio::test(start_paused = true)]
    async fn host_probe_on_published_port() {
        let runtime = Arc::new(FakeRuntime::new());
        started(&runtime);
        let probe = Arc::new(FakeProbe::new());
        probe.set(&probe::local_url(4100, "/api/health"), 204);
        let signal = checker(runtime, probe)
            .wait_for_healthy(NAME, 4100, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(signal, HealthSignal::HostHttp);
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_container_fails_fast_with_logs() {
        let runtime = Arc::new(FakeRuntime::new());
        started(&runtime);
        runtime.set_status(ContainerStatus::Exited);
        runtime.set_logs("Error: Cannot find module 'express'");
        let begin = Instant::now();
        let err = checker(runtime, Arc::new(FakeProbe::new()))
            .wait_for_healthy(NAME, 4100, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(begin.elapsed() < Duration::from_secs(10));
        assert!(err.to_string().contains("exited during startup"));
        assert_eq!(err.logs(), Some("Error: Cannot find module 'express'"));
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_runtime_probe_fails_immediately() {
        let runtime = Arc::new(FakeRuntime::new());
        started(&runtime);
        runtime.set_health(ProbeHealth::Unhealthy);
        let err = checker(runtime, Arc::new(FakeProbe::new()))
            .wait_for_healthy(NAME, 4100, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reported unhealthy"));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_log_tail() {
        let runtime = Arc::new(FakeRuntime::new());
        started(&runtime);
        runtime.set_health(ProbeHealth::Starting);
        runtime.set_logs("listening on :8080");
        let begin = Instant::now();
        let err = checker(runtime, Arc::new(FakeProbe::new()))
            .wait_for_healthy(NAME, 4100, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(begin.elapsed() >= Duration::from_secs(60));
        assert_eq!(err.to_string(), "Health check failed after 60s");
        assert_eq!(err.logs(), Some("listening on :8080"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_in_container_check_cannot_outlast_the_timeout() {
        let runtime = Arc::new(FakeRuntime::new());
        started(&runtime);
        runtime.set_health(ProbeHealth::Starting);
        runtime.set_exec_delay(Duration::from_secs(60));
        let begin = Instant::now();
        let err = checker(runtime, Arc::new(FakeProbe::new()))
            .wait_for_healthy(NAME, 4100, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Health check failed after 60s");
        assert!(begin.elapsed() >= Duration::from_secs(60));
        assert!(begin.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn becomes_healthy_on_later_poll() {
        let runtime = Arc::new(FakeRuntime::new());
        started(&runtime);
        let probe = Arc::new(FakeProbe::new());
        let checker = checker(runtime.clone(), probe);

        let flip = {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(12)).await;
                runtime.set_health(ProbeHealth::Healthy);
            })
        };
        let begin = Instant::now();
        let signal = checker
            .wait_for_healthy(NAME, 4100, Duration::from_secs(60))
            .await
            .unwrap();
        flip.await.unwrap();
        assert_eq!(signal, HealthSignal::RuntimeProbe);
        assert!(begin.elapsed() >= Duration::from_secs(12));
        assert!(begin.elapsed() < Duration::from_secs(60));
    }
}
