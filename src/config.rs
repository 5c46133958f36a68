//! Run-time configuration.
//!
//! Stampede is configured from two places: command line options defined by
//! the [`Configuration`] structure (derived with
//! [`gumdrop`](https://docs.rs/gumdrop/)), and a YAML test file describing
//! the workflow, optional load profile, thresholds, execution limits and
//! data sources. Command line options override their file counterparts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use gumdrop::Options;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::data::DataFileConfig;
use crate::phase::LoadProfile;
use crate::thresholds::Thresholds;
use crate::util;
use crate::StampedeError;

/// Runtime options available when launching a stampede load test.
#[derive(Options, Debug, Clone, Default)]
#[options(
    help = r#"Stampede is a YAML-driven HTTP workload generator.

The following runtime options are available:"#
)]
pub struct Configuration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,

    /// Path to the YAML test config (required)
    #[options(short = "c", meta = "PATH")]
    pub config: Option<PathBuf>,
    /// Sets classic-mode concurrency (default: 5)
    #[options(no_short, meta = "N", default = "5")]
    pub actors: usize,
    /// Sets classic-mode deadline (30s, 20m, 1h30m, etc; default: 10s)
    #[options(short = "t", meta = "TIME", default = "10s")]
    pub duration: String,
    /// Caps iterations per executor, overrides config (0 = unbounded)
    #[options(no_short, meta = "N")]
    pub max_iterations: usize,
    /// Warmup iterations before metrics count, overrides config
    #[options(no_short, meta = "N")]
    pub warmup: usize,
    /// Sets result format (text, json; default: text)
    #[options(short = "o", meta = "FORMAT", default = "text")]
    pub output: OutputFormat,
    /// Suppresses live progress output
    #[options(short = "q")]
    pub quiet: bool,
    /// Enables request/response logging
    #[options(short = "v")]
    pub verbose: bool,
    /// Increases log level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
}

impl Configuration {
    /// Check option combinations that cannot be expressed in types.
    pub fn validate(&self) -> Result<(), StampedeError> {
        if self.config.is_none() {
            return Err(StampedeError::InvalidOption {
                option: "--config".to_string(),
                value: String::new(),
                detail: "a YAML test config is required".to_string(),
            });
        }
        if self.actors == 0 {
            return Err(StampedeError::InvalidOption {
                option: "--actors".to_string(),
                value: "0".to_string(),
                detail: "at least 1 actor is required".to_string(),
            });
        }
        self.classic_duration()?;
        Ok(())
    }

    /// The classic-mode deadline parsed from `--duration`.
    pub fn classic_duration(&self) -> Result<Duration, StampedeError> {
        util::parse_duration(&self.duration).map_err(|detail| StampedeError::InvalidOption {
            option: "--duration".to_string(),
            value: self.duration.clone(),
            detail,
        })
    }
}

/// Result rendering format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Allow `--output` values in any case by implementing [`FromStr`].
impl FromStr for OutputFormat {
    type Err = StampedeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(StampedeError::InvalidOption {
                option: "--output".to_string(),
                value: s.to_string(),
                detail: "must be 'text' or 'json'".to_string(),
            }),
        }
    }
}

/// The root of the YAML test file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default, rename = "loadProfile", skip_serializing_if = "Option::is_none")]
    pub load_profile: Option<LoadProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Thresholds>,
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Optional parameter data sources, keyed by source name.
    #[serde(default)]
    pub data: HashMap<String, DataFileConfig>,
}

/// A named workflow: the ordered step sequence every iteration runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// One HTTP request step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// Variable name → JSON path extraction rules.
    #[serde(default)]
    pub extract: HashMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Iteration-level execution limits.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// 0 = unbounded.
    #[serde(default)]
    pub max_iterations: usize,
    #[serde(default)]
    pub warmup_iterations: usize,
}

impl TestConfig {
    /// Read and validate a YAML test file.
    pub fn from_file(path: &Path) -> Result<TestConfig, StampedeError> {
        let contents = std::fs::read_to_string(path)?;
        let config: TestConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StampedeError> {
        if self.workflow.steps.is_empty() {
            return Err(StampedeError::InvalidConfig {
                detail: "workflow has no steps".to_string(),
            });
        }
        for (index, step) in self.workflow.steps.iter().enumerate() {
            if step.name.is_empty() {
                return Err(StampedeError::InvalidConfig {
                    detail: format!("step {} has no name", index),
                });
            }
            if step.url.is_empty() {
                return Err(StampedeError::InvalidConfig {
                    detail: format!("step '{}' has no url", step.name),
                });
            }
            if reqwest::Method::from_str(&step.method.to_uppercase()).is_err() {
                return Err(StampedeError::InvalidConfig {
                    detail: format!("step '{}' has invalid method '{}'", step.name, step.method),
                });
            }
            // URLs containing placeholders are only resolvable per iteration.
            if !step.url.contains("${") && Url::parse(&step.url).is_err() {
                return Err(StampedeError::InvalidConfig {
                    detail: format!("step '{}' has invalid url '{}'", step.name, step.url),
                });
            }
        }
        if let Some(profile) = &self.load_profile {
            profile
                .validate()
                .map_err(|detail| StampedeError::InvalidConfig { detail })?;
        }
        for (name, source) in &self.data {
            if source.file.is_empty() {
                return Err(StampedeError::InvalidConfig {
                    detail: format!("data source '{}' has no file", name),
                });
            }
        }
        Ok(())
    }
}
