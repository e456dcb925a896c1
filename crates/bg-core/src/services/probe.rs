use std::time::Duration;

use async_trait::async_trait;

use crate::error::{OrchestratorError, Result};

/// HTTP GET from the orchestrator host. Returns the response status code;
/// connection failures are errors.
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn status(&self, url: &str) -> Result<u16>;
}

pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// 2xx or 3xx, which is all a root-path readiness probe asks for.
pub fn is_reachable(status: u16) -> bool {
    (200..400).contains(&status)
}

pub fn local_url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{port}{path}")
}

pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OrchestratorError::Runtime(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn status(&self, url: &str) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| OrchestratorError::Runtime(format!("GET {url}: {e}")))?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert!(is_success(200));
        assert!(is_success(204));
        assert!(!is_success(301));
        assert!(is_reachable(301));
        assert!(!is_reachable(404));
        assert!(!is_reachable(502));
    }

    #[test]
    fn local_urls() {
        assert_eq!(local_url(4101, "/health"), "http://127.0.0.1:4101/health");
    }
}
