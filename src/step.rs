//! The step contract and its HTTP implementation.
//!
//! A step is a named unit of work inside a workflow iteration. The core
//! only depends on the [`Step`] trait; HTTP is one implementation of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::StepConfig;
use crate::debug::DebugLogger;
use crate::shutdown::ShutdownWatch;
use crate::template;
use crate::variables::Variables;
use crate::StampedeError;

/// How a step concluded, beyond the success flag recorded on its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDisposition {
    /// A protocol status was received; the workflow continues even if the
    /// status classified as a failure.
    Completed,
    /// The scope shut down mid-step; the iteration stops without an event.
    Cancelled,
    /// I/O failed before a status arrived; remaining steps are skipped.
    TransportFailed,
    /// Substitution or extraction failed; remaining steps are skipped.
    TemplateFailed,
}

/// The outcome of one step execution.
#[derive(Debug)]
pub struct StepOutcome {
    /// Measured from execute entry until the response body was drained.
    pub duration: Duration,
    pub success: bool,
    /// Human readable error text, empty on success.
    pub error: String,
    /// Protocol status, 0 if none was received.
    pub status_code: u16,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Values extracted from the response, merged into the iteration's
    /// variables on success.
    pub extract: HashMap<String, Value>,
    pub disposition: StepDisposition,
}

impl StepOutcome {
    fn failure(duration: Duration, error: String, disposition: StepDisposition) -> StepOutcome {
        StepOutcome {
            duration,
            success: false,
            error,
            status_code: 0,
            bytes_sent: 0,
            bytes_received: 0,
            extract: HashMap::new(),
            disposition,
        }
    }
}

/// A named unit of work driven once per iteration.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Perform the step's I/O. Implementations must honor `shutdown` for
    /// cancellation and must not impose timeouts of their own.
    async fn execute(
        &self,
        shutdown: &ShutdownWatch,
        actor_id: usize,
        vars: &mut Variables,
    ) -> StepOutcome;
}

/// One HTTP request: substitute URL, body and headers, send, classify the
/// status, optionally extract variables from the response body.
pub struct HttpStep {
    config: StepConfig,
    method: reqwest::Method,
    client: reqwest::Client,
    debug: Option<Arc<DebugLogger>>,
}

impl HttpStep {
    pub fn new(
        config: StepConfig,
        client: reqwest::Client,
        debug: Option<Arc<DebugLogger>>,
    ) -> Result<HttpStep, StampedeError> {
        let method = config
            .method
            .to_uppercase()
            .parse::<reqwest::Method>()
            .map_err(|_| StampedeError::InvalidConfig {
                detail: format!("step '{}' has invalid method '{}'", config.name, config.method),
            })?;
        Ok(HttpStep {
            config,
            method,
            client,
            debug,
        })
    }

    fn template_failure(&self, actor_id: usize, started: Instant, error: String) -> StepOutcome {
        let duration = started.elapsed();
        if let Some(debug) = &self.debug {
            debug.log_error(actor_id, &self.config.name, &error, duration);
        }
        StepOutcome::failure(duration, error, StepDisposition::TemplateFailed)
    }

    fn transport_failure(&self, actor_id: usize, started: Instant, error: String) -> StepOutcome {
        let duration = started.elapsed();
        if let Some(debug) = &self.debug {
            debug.log_error(actor_id, &self.config.name, &error, duration);
        }
        StepOutcome::failure(duration, error, StepDisposition::TransportFailed)
    }
}

#[async_trait]
impl Step for HttpStep {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(
        &self,
        shutdown: &ShutdownWatch,
        actor_id: usize,
        vars: &mut Variables,
    ) -> StepOutcome {
        let started = Instant::now();

        let url = match template::substitute(&self.config.url, vars) {
            Ok(url) => url,
            Err(e) => return self.template_failure(actor_id, started, e),
        };
        let body = match template::substitute(&self.config.body, vars) {
            Ok(body) => body,
            Err(e) => return self.template_failure(actor_id, started, e),
        };
        let headers = match template::substitute_map(&self.config.headers, vars) {
            Ok(headers) => headers,
            Err(e) => return self.template_failure(actor_id, started, e),
        };

        let mut request = self.client.request(self.method.clone(), url.as_str());
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let bytes_sent = body.len() as u64;
        if !body.is_empty() {
            request = request.body(body.clone());
        }

        if let Some(debug) = &self.debug {
            debug.log_request(
                actor_id,
                &self.config.name,
                self.method.as_str(),
                &url,
                &headers,
                &body,
            );
        }

        let response = tokio::select! {
            response = request.send() => response,
            _ = shutdown.wait() => {
                return StepOutcome::failure(
                    started.elapsed(),
                    "cancelled".to_string(),
                    StepDisposition::Cancelled,
                );
            }
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => return self.transport_failure(actor_id, started, e.to_string()),
        };

        let status = response.status();
        // Read to the end even when the body is unused: draining permits
        // connection reuse.
        let body_bytes = tokio::select! {
            bytes = response.bytes() => match bytes {
                Ok(bytes) => bytes,
                Err(e) => return self.transport_failure(actor_id, started, e.to_string()),
            },
            _ = shutdown.wait() => {
                return StepOutcome::failure(
                    started.elapsed(),
                    "cancelled".to_string(),
                    StepDisposition::Cancelled,
                );
            }
        };
        let duration = started.elapsed();

        let mut success = status.as_u16() < 400;
        let mut error = if success {
            String::new()
        } else {
            match status.canonical_reason() {
                Some(reason) => format!("{} {}", status.as_u16(), reason),
                None => status.as_u16().to_string(),
            }
        };

        if let Some(debug) = &self.debug {
            debug.log_response(actor_id, &self.config.name, status.as_u16(), &body_bytes, duration);
        }

        let mut disposition = StepDisposition::Completed;
        let mut extracted = HashMap::new();
        if success && !self.config.extract.is_empty() {
            match template::extract(&body_bytes, &self.config.extract) {
                Ok(values) => extracted = values,
                Err(e) => {
                    success = false;
                    error = e;
                    disposition = StepDisposition::TemplateFailed;
                }
            }
        }

        StepOutcome {
            duration,
            success,
            error,
            status_code: status.as_u16(),
            bytes_sent,
            bytes_received: body_bytes.len() as u64,
            extract: extracted,
            disposition,
        }
    }
}
