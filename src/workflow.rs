//! The workflow contract: one pass over the step sequence per iteration.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::WorkflowConfig;
use crate::data::Sources;
use crate::debug::DebugLogger;
use crate::event::{Event, Reporter};
use crate::limiter::RateLimiter;
use crate::shutdown::ShutdownWatch;
use crate::step::{HttpStep, Step, StepDisposition};
use crate::variables::Variables;
use crate::StampedeError;

/// Why an iteration (or the executor driving it) stopped early.
///
/// Transport and template failures are local to a single iteration: the
/// executor skips the iteration's remaining steps and starts its next
/// iteration from step one. Cancellation and the iteration cap end the
/// executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The scope was cancelled.
    Cancelled,
    /// The runner hit its per-executor iteration cap.
    MaxIterationsReached,
    /// Step I/O failed before a protocol status arrived.
    Transport(String),
    /// Substitution or extraction failed.
    Template(String),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RunError::Cancelled => write!(f, "cancelled"),
            RunError::MaxIterationsReached => write!(f, "max iterations reached"),
            RunError::Transport(e) => write!(f, "transport error: {}", e),
            RunError::Template(e) => write!(f, "template error: {}", e),
        }
    }
}

impl std::error::Error for RunError {}

/// A user journey driven repeatedly by every executor.
#[async_trait]
pub trait Workflow: Send + Sync {
    async fn run(
        &self,
        shutdown: &ShutdownWatch,
        actor_id: usize,
        reporter: &dyn Reporter,
    ) -> Result<(), RunError>;
}

/// Runs the configured HTTP steps in order with per-iteration variables.
pub struct HttpWorkflow {
    steps: Vec<Box<dyn Step>>,
    rate_limiter: Arc<RateLimiter>,
    sources: Arc<Sources>,
}

impl HttpWorkflow {
    pub fn new(
        config: &WorkflowConfig,
        client: reqwest::Client,
        rate_limiter: Arc<RateLimiter>,
        debug: Option<Arc<DebugLogger>>,
        sources: Arc<Sources>,
    ) -> Result<HttpWorkflow, StampedeError> {
        let mut steps: Vec<Box<dyn Step>> = Vec::with_capacity(config.steps.len());
        for step_config in &config.steps {
            steps.push(Box::new(HttpStep::new(
                step_config.clone(),
                client.clone(),
                debug.clone(),
            )?));
        }
        Ok(HttpWorkflow {
            steps,
            rate_limiter,
            sources,
        })
    }
}

#[async_trait]
impl Workflow for HttpWorkflow {
    async fn run(
        &self,
        shutdown: &ShutdownWatch,
        actor_id: usize,
        reporter: &dyn Reporter,
    ) -> Result<(), RunError> {
        // Admission control gates the whole iteration, not individual steps.
        self.rate_limiter.acquire(shutdown).await?;

        let mut vars = Variables::new();
        self.sources.inject(&mut vars);

        for step in &self.steps {
            let outcome = step.execute(shutdown, actor_id, &mut vars).await;

            if outcome.disposition == StepDisposition::Cancelled {
                // No trailing event for cancelled executors.
                return Err(RunError::Cancelled);
            }

            reporter.report(Event {
                actor_id,
                timestamp: Utc::now(),
                step: step.name().to_string(),
                protocol: "http".to_string(),
                duration: outcome.duration,
                success: outcome.success,
                error: outcome.error.clone(),
                status_code: outcome.status_code,
                bytes_sent: outcome.bytes_sent,
                bytes_received: outcome.bytes_received,
            });

            if outcome.success && !outcome.extract.is_empty() {
                vars.merge(outcome.extract);
            }

            match outcome.disposition {
                StepDisposition::TransportFailed => {
                    return Err(RunError::Transport(outcome.error));
                }
                StepDisposition::TemplateFailed => {
                    return Err(RunError::Template(outcome.error));
                }
                _ => {}
            }
        }

        Ok(())
    }
}
