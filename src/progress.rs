//! Live progress display.
//!
//! Unless `--quiet` is set, a single line on stderr is refreshed every
//! second with request, rate and error counts. Announcements (phase
//! transitions, startup messages) go through [`Progress::printf`], which
//! erases the live line first so the two interleave cleanly.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::collector::Collector;
use crate::metrics::compute_metrics;
use crate::shutdown::{shutdown_pair, ShutdownTrigger};

/// Erase the current terminal line.
const CLEAR_LINE: &str = "\r\x1b[K";

/// Displays live test progress on stderr.
pub struct Progress {
    shared: Arc<ProgressShared>,
    ticker_stop: Mutex<Option<ShutdownTrigger>>,
    quiet: bool,
    stopped: AtomicBool,
}

struct ProgressShared {
    collector: Arc<Collector>,
    output: Mutex<Box<dyn Write + Send>>,
    start: Instant,
}

impl Progress {
    /// Create a progress indicator. With `quiet` nothing is ever printed.
    pub fn new(collector: Arc<Collector>, quiet: bool) -> Progress {
        Progress {
            shared: Arc::new(ProgressShared {
                collector,
                output: Mutex::new(Box::new(std::io::stderr())),
                start: Instant::now(),
            }),
            ticker_stop: Mutex::new(None),
            quiet,
            stopped: AtomicBool::new(false),
        }
    }

    /// Redirect output, for tests.
    pub fn set_output(&self, output: Box<dyn Write + Send>) {
        *self.shared.output.lock().unwrap() = output;
    }

    /// Begin refreshing the progress line every second.
    pub fn start(&self) {
        if self.quiet {
            return;
        }
        let (trigger, watch) = shutdown_pair();
        *self.ticker_stop.lock().unwrap() = Some(trigger);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            // The immediate first tick would print an all-zero line.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = watch.wait() => return,
                    _ = ticker.tick() => shared.display(),
                }
            }
        });
    }

    /// Halt the display and erase the progress line. Safe to call twice.
    pub fn stop(&self) {
        if self.quiet || self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(trigger) = self.ticker_stop.lock().unwrap().take() {
            trigger.trigger();
        }
        self.shared.write(CLEAR_LINE);
    }

    /// Print a message above the live progress line.
    pub fn printf(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.shared.write(&format!("{}{}\n", CLEAR_LINE, message));
    }
}

impl ProgressShared {
    fn display(&self) {
        let events = self.collector.events();
        let elapsed = self.start.elapsed();
        let metrics = compute_metrics(&events, elapsed);

        let elapsed_seconds = elapsed.as_secs();
        let line = format!(
            "[{:02}:{:02}] Requests: {} | RPS: {:.1} | Errors: {} ({:.1}%)",
            elapsed_seconds / 60,
            elapsed_seconds % 60,
            metrics.total_requests,
            metrics.requests_per_sec,
            metrics.failure_count,
            100.0 - metrics.success_rate
        );
        self.write(&format!("{}{}", CLEAR_LINE, line));
    }

    fn write(&self, text: &str) {
        let mut output = self.output.lock().unwrap();
        let _ = output.write_all(text.as_bytes());
        let _ = output.flush();
    }
}
