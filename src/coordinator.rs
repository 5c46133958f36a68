//! Executor pool lifecycle.
//!
//! The coordinator owns every executor task. In classic mode it spawns a
//! fixed number of executors that run until the scope cancels. In profile
//! mode a supervisor loop ticks every 100 ms, drives the pool toward the
//! phase manager's target concurrency, and pushes the phase rate into the
//! shared limiter. Downscaled executors finish their current iteration
//! before exiting; stop signals close in FIFO spawn order.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;

use crate::event::{Event, Reporter};
use crate::limiter::RateLimiter;
use crate::phase::{LoadProfile, PhaseManager};
use crate::progress::Progress;
use crate::runner::{Runner, RunnerConfig};
use crate::shutdown::{shutdown_pair, ShutdownTrigger, ShutdownWatch};
use crate::util;
use crate::workflow::{RunError, Workflow};

/// How often the supervisor checks for phase transitions and adjusts the
/// pool. Bounds worst-case over-provisioning under steep ramps.
const PHASE_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Spawns executors and manages their lifecycle.
pub struct Coordinator {
    next_id: AtomicUsize,
    active: Arc<AtomicUsize>,
    reporter: Arc<dyn Reporter>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    stops: Mutex<VecDeque<ShutdownTrigger>>,
}

impl Coordinator {
    pub fn new(reporter: Arc<dyn Reporter>) -> Coordinator {
        Coordinator {
            next_id: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            reporter,
            handles: Mutex::new(Vec::new()),
            stops: Mutex::new(VecDeque::new()),
        }
    }

    /// Classic mode: launch `count` executors sharing the scope.
    ///
    /// Each executor iterates until the scope cancels or, when a runner
    /// config is given, the iteration cap is reached.
    pub fn spawn(
        &self,
        shutdown: &ShutdownWatch,
        count: usize,
        workflow: Arc<dyn Workflow>,
        runner_config: Option<RunnerConfig>,
    ) {
        for _ in 0..count {
            self.spawn_executor(shutdown.clone(), None, workflow.clone(), runner_config);
        }
    }

    /// Current number of live executors.
    pub fn active_actors(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Block until every spawned executor has exited.
    pub async fn wait(&self) {
        loop {
            let handles: Vec<_> = {
                let mut guard = self.handles.lock().unwrap();
                guard.drain(..).collect()
            };
            if handles.is_empty() {
                return;
            }
            futures::future::join_all(handles).await;
        }
    }

    /// Profile mode: drive the pool toward the profile's concurrency target
    /// until the profile completes or the scope cancels.
    pub async fn run_with_profile(
        &self,
        shutdown: &ShutdownWatch,
        profile: &LoadProfile,
        workflow: Arc<dyn Workflow>,
        rate_limiter: &RateLimiter,
        progress: Option<&Progress>,
        runner_config: Option<RunnerConfig>,
    ) {
        let phase_manager = PhaseManager::new(profile.phases.clone());

        announce(
            progress,
            &format!(
                "Starting load profile with {} phases, total duration: {}",
                profile.phases.len(),
                util::format_duration(profile.total_duration())
            ),
        );

        let mut current_phase: Option<usize> = None;
        let mut ticker = tokio::time::interval(PHASE_TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    self.stop_all_actors();
                    return;
                }
                _ = ticker.tick() => {}
            }

            if phase_manager.complete() {
                self.stop_all_actors();
                return;
            }

            // Announce phase transitions.
            let phase_index = phase_manager.index();
            if current_phase != Some(phase_index) {
                current_phase = Some(phase_index);
                if let Some(phase) = phase_manager.current() {
                    if phase.rps > 0 {
                        announce(
                            progress,
                            &format!(
                                "Phase: {} (duration: {}, target actors: {}, rps: {})",
                                phase.name,
                                util::format_duration(phase.duration),
                                phase_manager.target_concurrency(),
                                phase.rps
                            ),
                        );
                    } else {
                        announce(
                            progress,
                            &format!(
                                "Phase: {} (duration: {}, target actors: {})",
                                phase.name,
                                util::format_duration(phase.duration),
                                phase_manager.target_concurrency()
                            ),
                        );
                    }
                }
            }

            // Drive the pool toward the target.
            let target = phase_manager.target_concurrency();
            let current = self.active_actors();
            if current < target {
                for _ in current..target {
                    let (stop_trigger, stop_watch) = shutdown_pair();
                    self.stops.lock().unwrap().push_back(stop_trigger);
                    self.spawn_executor(
                        shutdown.clone(),
                        Some(stop_watch),
                        workflow.clone(),
                        runner_config,
                    );
                }
            } else if current > target {
                self.stop_actors(current - target);
            }

            // An rps of 0 is "unbounded"; push whatever the phase says on
            // every tick rather than inferring "no change".
            rate_limiter.set_rate(phase_manager.current_rate());
        }
    }

    fn spawn_executor(
        &self,
        shutdown: ShutdownWatch,
        stop: Option<ShutdownWatch>,
        workflow: Arc<dyn Workflow>,
        runner_config: Option<RunnerConfig>,
    ) {
        let actor_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.active.fetch_add(1, Ordering::SeqCst);

        let active = self.active.clone();
        let reporter = self.reporter.clone();
        let handle = tokio::spawn(async move {
            debug!("launching executor {}...", actor_id);
            let result = AssertUnwindSafe(run_executor(
                shutdown,
                stop,
                workflow,
                runner_config,
                actor_id,
                reporter.clone(),
            ))
            .catch_unwind()
            .await;

            // A panicking executor leaves one synthetic event behind and
            // exits cleanly; the rest of the pool is unaffected.
            if let Err(panic) = result {
                reporter.report(Event {
                    actor_id,
                    timestamp: Utc::now(),
                    step: "panic".to_string(),
                    protocol: String::new(),
                    duration: Duration::ZERO,
                    success: false,
                    error: format!("panic: {}", panic_message(panic.as_ref())),
                    status_code: 0,
                    bytes_sent: 0,
                    bytes_received: 0,
                });
            }

            active.fetch_sub(1, Ordering::SeqCst);
            debug!("executor {} exited", actor_id);
        });
        self.handles.lock().unwrap().push(handle);
    }

    /// Close `count` stop signals, oldest executors first. Their executors
    /// exit at the next iteration boundary.
    fn stop_actors(&self, count: usize) {
        let mut stops = self.stops.lock().unwrap();
        for _ in 0..count {
            match stops.pop_front() {
                Some(trigger) => trigger.trigger(),
                None => break,
            }
        }
    }

    fn stop_all_actors(&self) {
        let mut stops = self.stops.lock().unwrap();
        for trigger in stops.drain(..) {
            trigger.trigger();
        }
    }
}

/// The executor loop shared by both modes.
///
/// Transport and template failures are local to one iteration; the next
/// iteration starts from step one. Cancellation, stop signals and the
/// iteration cap end the executor.
async fn run_executor(
    shutdown: ShutdownWatch,
    stop: Option<ShutdownWatch>,
    workflow: Arc<dyn Workflow>,
    runner_config: Option<RunnerConfig>,
    actor_id: usize,
    reporter: Arc<dyn Reporter>,
) {
    let mut runner = runner_config
        .map(|config| Runner::new(workflow.clone(), reporter.clone(), actor_id, config));

    loop {
        if shutdown.is_shutdown() {
            return;
        }
        if let Some(stop) = &stop {
            if stop.is_shutdown() {
                return;
            }
        }

        let result = match runner.as_mut() {
            Some(runner) => runner.run_iteration(&shutdown).await,
            None => workflow.run(&shutdown, actor_id, reporter.as_ref()).await,
        };

        match result {
            Ok(()) => {}
            Err(RunError::Cancelled) | Err(RunError::MaxIterationsReached) => return,
            Err(RunError::Transport(e)) => {
                debug!("executor {}: iteration aborted: {}", actor_id, e);
            }
            Err(RunError::Template(e)) => {
                debug!("executor {}: iteration aborted: {}", actor_id, e);
            }
        }
    }
}

fn announce(progress: Option<&Progress>, message: &str) {
    match progress {
        Some(progress) => progress.printf(message),
        None => info!("{}", message),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
