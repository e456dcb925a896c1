use std::future::Future;

use tokio::time::Instant;

use crate::error::Result;
use crate::models::{DeployStep, StepStatus};

/// Times pipeline steps and keeps their outcomes in order.
#[derive(Debug, Default)]
pub struct StepRecorder {
    steps: Vec<DeployStep>,
}

impl StepRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one step, recording success or the error it failed with.
    pub async fn run<T, F>(&mut self, name: &str, step: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let outcome = step.await;
        let duration = started.elapsed().as_millis() as u64;
        let (status, error) = match &outcome {
            Ok(_) => (StepStatus::Success, None),
            Err(e) => (StepStatus::Failed, Some(e.to_string())),
        };
        tracing::debug!(step = name, ?status, duration_ms = duration, "step finished");
        self.steps.push(DeployStep {
            name: name.to_string(),
            status,
            duration,
            output: None,
            error,
        });
        outcome
    }

    pub fn skip(&mut self, name: &str, reason: &str) {
        self.steps.push(DeployStep {
            name: name.to_string(),
            status: StepStatus::Skipped,
            duration: 0,
            output: Some(reason.to_string()),
            error: None,
        });
    }

    /// Attach output to the most recent step.
    pub fn annotate(&mut self, output: impl Into<String>) {
        if let Some(step) = self.steps.last_mut() {
            step.output = Some(output.into());
        }
    }

    pub fn steps(&self) -> &[DeployStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<DeployStep> {
        self.steps
    }
}
