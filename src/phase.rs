//! Load profile phases and the manager mapping wall time to phase state.
//!
//! A load profile is an ordered list of phases, each holding concurrency
//! steady or ramping it between two values, with an optional request-rate
//! ceiling. The [`PhaseManager`] is read-only after construction: all
//! accessors derive their answer from a single clock read, so any number of
//! readers can call them concurrently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::util;

/// A single phase in a load profile.
///
/// Exactly one concurrency mode must be set: `actors` for a steady phase,
/// or both `start_actors` and `end_actors` for a ramp. An `rps` of 0 leaves
/// the request rate unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    #[serde(default)]
    pub name: String,
    #[serde(with = "util::serde_duration")]
    pub duration: Duration,
    #[serde(default)]
    pub actors: Option<usize>,
    #[serde(default, rename = "startActors")]
    pub start_actors: Option<usize>,
    #[serde(default, rename = "endActors")]
    pub end_actors: Option<usize>,
    #[serde(default)]
    pub rps: usize,
}

impl Phase {
    /// Target concurrency at `phase_elapsed` into this phase.
    fn target_at(&self, phase_elapsed: Duration) -> usize {
        if let Some(actors) = self.actors {
            return actors;
        }
        let start = self.start_actors.unwrap_or(0);
        let end = self.end_actors.unwrap_or(0);
        if start == end {
            return start;
        }
        // A zero-duration phase is already over; treat progress as 1.
        let progress = if self.duration.is_zero() {
            1.0
        } else {
            (phase_elapsed.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
        };
        let target = start as f64 + (end as f64 - start as f64) * progress;
        target.floor().max(0.0) as usize
    }

    /// Validate the concurrency mode invariant.
    pub(crate) fn validate(&self, index: usize) -> Result<(), String> {
        let ramp = self.start_actors.is_some() || self.end_actors.is_some();
        if self.actors.is_some() && ramp {
            return Err(format!(
                "phase {} ({}): set either 'actors' or 'startActors'/'endActors', not both",
                index, self.name
            ));
        }
        if self.actors.is_none() {
            if self.start_actors.is_none() || self.end_actors.is_none() {
                return Err(format!(
                    "phase {} ({}): a ramp needs both 'startActors' and 'endActors'",
                    index, self.name
                ));
            }
        }
        Ok(())
    }
}

/// An ordered, non-empty sequence of phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadProfile {
    pub phases: Vec<Phase>,
}

impl LoadProfile {
    /// Sum of all phase durations.
    pub fn total_duration(&self) -> Duration {
        self.phases.iter().map(|p| p.duration).sum()
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.phases.is_empty() {
            return Err("load profile has no phases".to_string());
        }
        for (index, phase) in self.phases.iter().enumerate() {
            phase.validate(index)?;
        }
        Ok(())
    }
}

/// Maps elapsed wall time to (current phase, target concurrency, rate).
///
/// State is an immutable start instant plus the phase list; every accessor
/// is hot-callable from the supervisor loop.
pub struct PhaseManager {
    phases: Vec<Phase>,
    start: Instant,
    clock: Arc<dyn Clock>,
}

impl PhaseManager {
    pub fn new(phases: Vec<Phase>) -> PhaseManager {
        PhaseManager::with_clock(phases, Arc::new(SystemClock))
    }

    /// Construct with a custom clock so ramp math can be tested without
    /// sleeping.
    pub fn with_clock(phases: Vec<Phase>, clock: Arc<dyn Clock>) -> PhaseManager {
        PhaseManager {
            phases,
            start: clock.now(),
            clock,
        }
    }

    /// Elapsed time since construction.
    pub fn elapsed(&self) -> Duration {
        self.clock.since(self.start)
    }

    /// Index of the current phase; equals the phase count when complete.
    pub fn index(&self) -> usize {
        let elapsed = self.elapsed();
        let mut cumulative = Duration::ZERO;
        for (index, phase) in self.phases.iter().enumerate() {
            cumulative += phase.duration;
            if elapsed < cumulative {
                return index;
            }
        }
        self.phases.len()
    }

    /// The currently active phase, if any.
    pub fn current(&self) -> Option<&Phase> {
        self.phases.get(self.index())
    }

    /// True once every phase has finished.
    pub fn complete(&self) -> bool {
        self.index() >= self.phases.len()
    }

    /// Target concurrency for this moment; 0 after completion.
    pub fn target_concurrency(&self) -> usize {
        let elapsed = self.elapsed();
        let mut cumulative = Duration::ZERO;
        for phase in &self.phases {
            let phase_end = cumulative + phase.duration;
            if elapsed < phase_end {
                return phase.target_at(elapsed - cumulative);
            }
            cumulative = phase_end;
        }
        0
    }

    /// Rate ceiling of the current phase; 0 when complete or unbounded.
    pub fn current_rate(&self) -> usize {
        self.current().map_or(0, |phase| phase.rps)
    }
}
