//! Per-executor iteration control.
//!
//! A runner gates warmup iterations and enforces the per-executor iteration
//! cap. Runners are not shared: each executor task owns one.

use std::sync::Arc;

use crate::event::{NullReporter, Reporter};
use crate::shutdown::ShutdownWatch;
use crate::workflow::{RunError, Workflow};

/// Iteration-level execution limits for one executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerConfig {
    /// 0 = unbounded.
    pub max_iterations: usize,
    /// Iterations whose events are discarded before metrics count.
    pub warmup_iterations: usize,
}

/// Drives one executor's iterations against a workflow.
pub struct Runner {
    workflow: Arc<dyn Workflow>,
    reporter: Arc<dyn Reporter>,
    actor_id: usize,
    config: RunnerConfig,
    iteration: usize,
}

impl Runner {
    pub fn new(
        workflow: Arc<dyn Workflow>,
        reporter: Arc<dyn Reporter>,
        actor_id: usize,
        config: RunnerConfig,
    ) -> Runner {
        Runner {
            workflow,
            reporter,
            actor_id,
            config,
            iteration: 0,
        }
    }

    /// Execute one complete workflow iteration.
    ///
    /// Returns [`RunError::MaxIterationsReached`] once the cap is hit;
    /// otherwise propagates the workflow's result. The iteration counter
    /// advances even when the workflow fails.
    pub async fn run_iteration(&mut self, shutdown: &ShutdownWatch) -> Result<(), RunError> {
        if self.config.max_iterations > 0 && self.iteration >= self.config.max_iterations {
            return Err(RunError::MaxIterationsReached);
        }

        // Warmup iterations report into the void.
        let result = if self.iteration < self.config.warmup_iterations {
            self.workflow
                .run(shutdown, self.actor_id, &NullReporter)
                .await
        } else {
            self.workflow
                .run(shutdown, self.actor_id, self.reporter.as_ref())
                .await
        };

        self.iteration += 1;
        result
    }

    /// Completed iteration count.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// True while iterations are still discarded as warmup.
    pub fn is_warmup(&self) -> bool {
        self.iteration < self.config.warmup_iterations
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::testing::VecReporter;
    use crate::event::Event;
    use crate::shutdown::shutdown_pair;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Reports one event per run and counts invocations.
    struct CountingWorkflow {
        runs: AtomicUsize,
        fail_every_other: bool,
    }

    impl CountingWorkflow {
        fn new() -> CountingWorkflow {
            CountingWorkflow {
                runs: AtomicUsize::new(0),
                fail_every_other: false,
            }
        }
    }

    #[async_trait]
    impl Workflow for CountingWorkflow {
        async fn run(
            &self,
            _shutdown: &ShutdownWatch,
            actor_id: usize,
            reporter: &dyn Reporter,
        ) -> Result<(), RunError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            reporter.report(Event {
                actor_id,
                timestamp: Utc::now(),
                step: "count".to_string(),
                protocol: "test".to_string(),
                duration: Duration::from_millis(1),
                success: true,
                error: String::new(),
                status_code: 200,
                bytes_sent: 0,
                bytes_received: 0,
            });
            if self.fail_every_other && run % 2 == 1 {
                return Err(RunError::Transport("boom".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn cap_returns_sentinel() {
        let (_trigger, watch) = shutdown_pair();
        let workflow = Arc::new(CountingWorkflow::new());
        let reporter = Arc::new(VecReporter::new());
        let mut runner = Runner::new(
            workflow.clone(),
            reporter.clone(),
            1,
            RunnerConfig {
                max_iterations: 3,
                warmup_iterations: 0,
            },
        );

        for _ in 0..3 {
            runner.run_iteration(&watch).await.unwrap();
        }
        assert_eq!(
            runner.run_iteration(&watch).await,
            Err(RunError::MaxIterationsReached)
        );
        // The workflow is not invoked past the cap.
        assert_eq!(workflow.runs.load(Ordering::SeqCst), 3);
        assert_eq!(reporter.len(), 3);
        assert_eq!(runner.iteration(), 3);
    }

    #[tokio::test]
    async fn warmup_discards_reports() {
        let (_trigger, watch) = shutdown_pair();
        let workflow = Arc::new(CountingWorkflow::new());
        let reporter = Arc::new(VecReporter::new());
        let mut runner = Runner::new(
            workflow.clone(),
            reporter.clone(),
            1,
            RunnerConfig {
                max_iterations: 5,
                warmup_iterations: 2,
            },
        );

        assert!(runner.is_warmup());
        while runner.run_iteration(&watch).await.is_ok() {}

        // Exactly max_iterations runs, at most max - warmup reported.
        assert_eq!(workflow.runs.load(Ordering::SeqCst), 5);
        assert_eq!(reporter.len(), 3);
        assert!(!runner.is_warmup());
    }

    #[tokio::test]
    async fn warmup_beyond_cap_discards_everything() {
        let (_trigger, watch) = shutdown_pair();
        let workflow = Arc::new(CountingWorkflow::new());
        let reporter = Arc::new(VecReporter::new());
        let mut runner = Runner::new(
            workflow.clone(),
            reporter.clone(),
            1,
            RunnerConfig {
                max_iterations: 2,
                warmup_iterations: 10,
            },
        );

        while runner.run_iteration(&watch).await.is_ok() {}
        assert_eq!(workflow.runs.load(Ordering::SeqCst), 2);
        assert_eq!(reporter.len(), 0);
    }

    #[tokio::test]
    async fn failed_iterations_still_count() {
        let (_trigger, watch) = shutdown_pair();
        let workflow = Arc::new(CountingWorkflow {
            runs: AtomicUsize::new(0),
            fail_every_other: true,
        });
        let reporter = Arc::new(VecReporter::new());
        let mut runner = Runner::new(
            workflow.clone(),
            reporter.clone(),
            1,
            RunnerConfig {
                max_iterations: 4,
                warmup_iterations: 0,
            },
        );

        let mut failures = 0;
        loop {
            match runner.run_iteration(&watch).await {
                Ok(()) => {}
                Err(RunError::MaxIterationsReached) => break,
                Err(_) => failures += 1,
            }
        }
        assert_eq!(workflow.runs.load(Ordering::SeqCst), 4);
        assert_eq!(failures, 2);
        assert_eq!(runner.iteration(), 4);
    }

    #[tokio::test]
    async fn unbounded_runner_never_hits_cap() {
        let (_trigger, watch) = shutdown_pair();
        let workflow = Arc::new(CountingWorkflow::new());
        let reporter = Arc::new(VecReporter::new());
        let mut runner = Runner::new(workflow, reporter, 1, RunnerConfig::default());
        for _ in 0..50 {
            runner.run_iteration(&watch).await.unwrap();
        }
        assert_eq!(runner.iteration(), 50);
    }
}
