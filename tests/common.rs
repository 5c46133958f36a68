#![allow(dead_code)]

use std::collections::HashMap;

use stampede::config::{Configuration, StepConfig, TestConfig, WorkflowConfig};

/// Manually specify configuration for tests, normally provided as CLI
/// options. Quiet by default so test output stays readable.
pub fn build_configuration() -> Configuration {
    Configuration {
        help: false,
        version: false,
        config: None,
        actors: 1,
        duration: "1s".to_string(),
        max_iterations: 0,
        warmup: 0,
        output: Default::default(),
        quiet: true,
        verbose: false,
        log_level: 0,
    }
}

/// A bare step with no headers, body or extraction.
pub fn step(name: &str, method: &str, url: &str) -> StepConfig {
    StepConfig {
        name: name.to_string(),
        method: method.to_string(),
        url: url.to_string(),
        headers: HashMap::new(),
        body: String::new(),
        extract: HashMap::new(),
    }
}

/// A test config wrapping the given steps, with nothing else configured.
pub fn test_config(steps: Vec<StepConfig>) -> TestConfig {
    TestConfig {
        workflow: WorkflowConfig {
            name: "test".to_string(),
            steps,
        },
        load_profile: None,
        thresholds: None,
        execution: Default::default(),
        data: HashMap::new(),
    }
}
