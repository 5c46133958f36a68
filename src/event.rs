//! Event samples and the reporter contract.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single measurement from one executor's workflow step.
///
/// Events are immutable once reported. An event is successful exactly when
/// its error text is empty and its status code is in the protocol's success
/// set (for HTTP, `< 400`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique id of the executor that produced this sample.
    pub actor_id: usize,
    /// Wall time the sample was recorded.
    pub timestamp: DateTime<Utc>,
    /// Name of the workflow step.
    pub step: String,
    /// Protocol tag, e.g. "http".
    pub protocol: String,
    /// Time the step took, entry to response drained.
    pub duration: Duration,
    pub success: bool,
    /// Human readable error text, empty on success.
    pub error: String,
    /// Protocol-specific status (HTTP 200 etc), 0 if none was received.
    pub status_code: u16,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// The interface executors use to send events to the collector.
pub trait Reporter: Send + Sync {
    fn report(&self, event: Event);
}

/// Discards all events. Warmup iterations report here.
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _event: Event) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Test reporter capturing every event in memory.
    pub(crate) struct VecReporter {
        pub events: Mutex<Vec<Event>>,
    }

    impl VecReporter {
        pub(crate) fn new() -> VecReporter {
            VecReporter {
                events: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn len(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    impl Reporter for VecReporter {
        fn report(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }
}
