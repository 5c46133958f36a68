//! # Stampede
//!
//! Stampede is a YAML-driven HTTP workload generator. It drives a
//! user-defined multi-step request journey against a target service under a
//! configurable concurrency profile, collects per-step samples, derives
//! latency and error statistics, and decides a pass/fail verdict against
//! declarative thresholds.
//!
//! ## Running a load test
//!
//! A test is described in YAML: a workflow (the step sequence every
//! executor iterates), and optionally a load profile, thresholds, execution
//! limits and data sources.
//!
//! ```yaml
//! workflow:
//!   name: checkout
//!   steps:
//!     - name: login
//!       method: POST
//!       url: http://shop.local/auth/login
//!       body: '{"user":"${data.users.username}","password":"${data.users.password}"}'
//!       extract:
//!         token: $.token
//!     - name: cart
//!       url: http://shop.local/cart
//!       headers:
//!         Authorization: Bearer ${token}
//!
//! loadProfile:
//!   phases:
//!     - name: warmup
//!       duration: 30s
//!       actors: 2
//!     - name: ramp
//!       duration: 2m
//!       startActors: 2
//!       endActors: 20
//!       rps: 50
//!
//! thresholds:
//!   http_req_duration:
//!     p95: 500ms
//!   http_req_failed:
//!     rate: "1%"
//!
//! data:
//!   users:
//!     file: users.csv
//! ```
//!
//! ```bash
//! $ stampede --config checkout.yaml
//! ```
//!
//! Without a `loadProfile` the test runs in classic mode: `--actors`
//! executors for `--duration`. With one, a supervisor drives the executor
//! pool along the phases, growing and shrinking it as the profile demands
//! and applying each phase's request-rate ceiling.
//!
//! Step URLs, bodies and headers support `${variable}`, `${env:NAME}` and
//! built-in functions such as `${uuid()}` and `${random(1,100)}`; `extract`
//! rules pull values out of JSON responses for later steps of the same
//! iteration.
//!
//! When the test ends (deadline, profile completion, per-executor
//! iteration cap, or ctrl-c) a summary prints and, if thresholds were
//! configured, the verdict decides the exit code:
//!
//! ```text
//! Stampede - Load Test Results
//! ============================
//!
//! Duration:       30.0s
//! Total Requests: 42,513
//! Success Rate:   99.9% (42,498 / 42,513)
//! Requests/sec:   1417.1
//!
//! Response Times:
//!   Min:    2ms
//!   Avg:    13ms
//!   P50:    11ms
//!   P90:    24ms
//!   P95:    31ms
//!   P99:    58ms
//!   Max:    312ms
//!
//! By Step:
//!   login           21,257 reqs   avg=15ms  p95=34ms  p99=61ms
//!   cart            21,256 reqs   avg=11ms  p95=28ms  p99=52ms
//!
//! Thresholds:
//!   ✓ http_req_duration.p95 < 500ms (actual: 31ms)
//!   ✓ http_req_failed.rate < 1% (actual: 0.04%)
//! ```

#[macro_use]
extern crate log;

pub mod clock;
pub mod collector;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod debug;
pub mod event;
pub mod limiter;
pub mod metrics;
pub mod phase;
pub mod progress;
pub mod runner;
pub mod shutdown;
pub mod step;
pub mod template;
pub mod thresholds;
pub mod util;
pub mod variables;
pub mod workflow;

use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::collector::Collector;
use crate::config::{Configuration, OutputFormat, TestConfig};
use crate::coordinator::Coordinator;
use crate::data::Sources;
use crate::debug::DebugLogger;
use crate::limiter::RateLimiter;
use crate::metrics::{compute_metrics, Metrics};
use crate::progress::Progress;
use crate::runner::RunnerConfig;
use crate::shutdown::shutdown_pair;
use crate::thresholds::ThresholdResults;
use crate::workflow::HttpWorkflow;

/// All thresholds passed, or none were configured.
pub const EXIT_SUCCESS: i32 = 0;
/// At least one threshold failed.
pub const EXIT_THRESHOLD_FAILED: i32 = 1;
/// Configuration or invocation error.
pub const EXIT_ERROR: i32 = 2;

/// Extra scope time past a profile's total duration before hard cancellation.
const PROFILE_GRACE: Duration = Duration::from_secs(5);

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Errors surfaced to the operator.
#[derive(Debug)]
pub enum StampedeError {
    /// Wraps a [`std::io::Error`].
    Io(io::Error),
    /// Failed to parse the YAML test config.
    Yaml(serde_yaml::Error),
    /// Failed to build the HTTP client.
    Reqwest(reqwest::Error),
    /// A command line option had an invalid value.
    InvalidOption {
        option: String,
        value: String,
        detail: String,
    },
    /// The test config is malformed.
    InvalidConfig { detail: String },
}

impl fmt::Display for StampedeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StampedeError::Io(e) => write!(f, "io error: {}", e),
            StampedeError::Yaml(e) => write!(f, "config parse error: {}", e),
            StampedeError::Reqwest(e) => write!(f, "http client error: {}", e),
            StampedeError::InvalidOption {
                option,
                value,
                detail,
            } => {
                if value.is_empty() {
                    write!(f, "invalid option {}: {}", option, detail)
                } else {
                    write!(f, "invalid option {} '{}': {}", option, value, detail)
                }
            }
            StampedeError::InvalidConfig { detail } => write!(f, "invalid config: {}", detail),
        }
    }
}

impl std::error::Error for StampedeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StampedeError::Io(e) => Some(e),
            StampedeError::Yaml(e) => Some(e),
            StampedeError::Reqwest(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StampedeError {
    fn from(e: io::Error) -> StampedeError {
        StampedeError::Io(e)
    }
}

impl From<serde_yaml::Error> for StampedeError {
    fn from(e: serde_yaml::Error) -> StampedeError {
        StampedeError::Yaml(e)
    }
}

impl From<reqwest::Error> for StampedeError {
    fn from(e: reqwest::Error) -> StampedeError {
        StampedeError::Reqwest(e)
    }
}

/// Everything the CLI needs to render results and pick an exit code.
pub struct TestSummary {
    pub metrics: Metrics,
    pub thresholds: Option<ThresholdResults>,
    pub dropped_events: usize,
    pub interrupted: bool,
}

impl TestSummary {
    /// Render the summary in the requested format.
    pub fn write(&self, w: &mut dyn Write, format: OutputFormat) -> io::Result<()> {
        match format {
            OutputFormat::Text => {
                metrics::write_text(w, &self.metrics, self.thresholds.as_ref(), self.dropped_events)
            }
            OutputFormat::Json => {
                metrics::write_json(w, &self.metrics, self.thresholds.as_ref(), self.dropped_events)
            }
        }
    }

    /// The process exit code this run deserves.
    ///
    /// An interrupted run exits 0 even when thresholds would have failed:
    /// partial metrics are informational, not a verdict.
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            return EXIT_SUCCESS;
        }
        match &self.thresholds {
            Some(results) if !results.passed => EXIT_THRESHOLD_FAILED,
            _ => EXIT_SUCCESS,
        }
    }
}

/// A fully configured load test, ready to execute.
pub struct LoadTest {
    configuration: Configuration,
    config: TestConfig,
    config_dir: PathBuf,
}

impl LoadTest {
    /// Build a load test from command line options, reading the YAML config
    /// from disk.
    pub fn new(configuration: Configuration) -> Result<LoadTest, StampedeError> {
        configuration.validate()?;
        let path = match &configuration.config {
            Some(path) => path.clone(),
            None => {
                return Err(StampedeError::InvalidOption {
                    option: "--config".to_string(),
                    value: String::new(),
                    detail: "a YAML test config is required".to_string(),
                });
            }
        };
        let config = TestConfig::from_file(&path)?;
        let config_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(LoadTest {
            configuration,
            config,
            config_dir,
        })
    }

    /// Build a load test from an already-loaded config. Used by tests and
    /// embedders; the `--config` option is not consulted.
    pub fn with_config(
        configuration: Configuration,
        config: TestConfig,
    ) -> Result<LoadTest, StampedeError> {
        if configuration.actors == 0 {
            return Err(StampedeError::InvalidOption {
                option: "--actors".to_string(),
                value: "0".to_string(),
                detail: "at least 1 actor is required".to_string(),
            });
        }
        configuration.classic_duration()?;
        config.validate()?;
        Ok(LoadTest {
            configuration,
            config,
            config_dir: PathBuf::from("."),
        })
    }

    /// CLI flags override the config file's execution limits.
    fn runner_config(&self) -> Option<RunnerConfig> {
        let mut runner_config = RunnerConfig {
            max_iterations: self.config.execution.max_iterations,
            warmup_iterations: self.config.execution.warmup_iterations,
        };
        if self.configuration.max_iterations > 0 {
            runner_config.max_iterations = self.configuration.max_iterations;
        }
        if self.configuration.warmup > 0 {
            runner_config.warmup_iterations = self.configuration.warmup;
        }
        if runner_config.max_iterations == 0 && runner_config.warmup_iterations == 0 {
            None
        } else {
            Some(runner_config)
        }
    }

    /// Execute the load test to completion and return its summary.
    ///
    /// The test ends on scope cancellation (deadline or interrupt), profile
    /// completion, or every executor reaching its iteration cap. The
    /// summary is produced even after an interrupt.
    pub async fn execute(&self) -> Result<TestSummary, StampedeError> {
        let runner_config = self.runner_config();
        let sources = Arc::new(Sources::load(&self.config.data, &self.config_dir)?);

        let collector = Arc::new(Collector::new());
        let coordinator = Coordinator::new(collector.clone());

        let debug = if self.configuration.verbose {
            Some(Arc::new(DebugLogger::new()))
        } else {
            None
        };

        // Seed the limiter like the first rate-limited phase would; the
        // supervisor re-applies the active phase's rate every tick.
        let initial_rate = self
            .config
            .load_profile
            .as_ref()
            .and_then(|profile| profile.phases.iter().find(|phase| phase.rps > 0))
            .map_or(0, |phase| phase.rps);
        let rate_limiter = Arc::new(RateLimiter::new(initial_rate));

        // The scope is the only deadline; the client gets no timeout.
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()?;
        let workflow = Arc::new(HttpWorkflow::new(
            &self.config.workflow,
            client,
            rate_limiter.clone(),
            debug,
            sources,
        )?);

        let (trigger, watch) = shutdown_pair();
        let interrupted = Arc::new(AtomicBool::new(false));
        util::setup_interrupt_handler(&trigger, &interrupted);

        let progress = Progress::new(collector.clone(), self.configuration.quiet);

        if let Some(profile) = &self.config.load_profile {
            info!(
                "starting load profile, workflow '{}'",
                self.config.workflow.name
            );
            trigger.trigger_after(profile.total_duration() + PROFILE_GRACE);
            progress.start();
            coordinator
                .run_with_profile(
                    &watch,
                    profile,
                    workflow,
                    &rate_limiter,
                    Some(&progress),
                    runner_config,
                )
                .await;
        } else {
            let duration = self.configuration.classic_duration()?;
            info!(
                "starting classic load test: {} actors for {}, workflow '{}'",
                self.configuration.actors,
                util::format_duration(duration),
                self.config.workflow.name
            );
            trigger.trigger_after(duration);
            progress.start();
            coordinator.spawn(&watch, self.configuration.actors, workflow, runner_config);
        }

        coordinator.wait().await;
        collector.close().await;
        progress.stop();

        let metrics = compute_metrics(&collector.events(), collector.duration());
        let thresholds = self
            .config
            .thresholds
            .as_ref()
            .map(|thresholds| thresholds.check(&metrics));

        Ok(TestSummary {
            metrics,
            thresholds,
            dropped_events: collector.dropped(),
            interrupted: interrupted.load(Ordering::SeqCst),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_display() {
        let error = StampedeError::InvalidOption {
            option: "--output".to_string(),
            value: "yaml".to_string(),
            detail: "must be 'text' or 'json'".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "invalid option --output 'yaml': must be 'text' or 'json'"
        );

        let error = StampedeError::InvalidConfig {
            detail: "workflow has no steps".to_string(),
        };
        assert_eq!(error.to_string(), "invalid config: workflow has no steps");
    }

    #[test]
    fn exit_codes() {
        let passed = TestSummary {
            metrics: compute_metrics(&[], Duration::ZERO),
            thresholds: None,
            dropped_events: 0,
            interrupted: false,
        };
        assert_eq!(passed.exit_code(), EXIT_SUCCESS);

        let failed = TestSummary {
            metrics: compute_metrics(&[], Duration::ZERO),
            thresholds: Some(ThresholdResults {
                passed: false,
                results: vec![],
            }),
            dropped_events: 0,
            interrupted: false,
        };
        assert_eq!(failed.exit_code(), EXIT_THRESHOLD_FAILED);

        let interrupted = TestSummary {
            metrics: compute_metrics(&[], Duration::ZERO),
            thresholds: Some(ThresholdResults {
                passed: false,
                results: vec![],
            }),
            dropped_events: 0,
            interrupted: true,
        };
        assert_eq!(interrupted.exit_code(), EXIT_SUCCESS);
    }
}
