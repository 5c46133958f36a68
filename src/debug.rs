//! Verbose request/response logging.
//!
//! Enabled with `--verbose`. The step implementation feeds request and
//! response details here; the core never parses responses for logging. A
//! single writer sits behind a mutex so concurrent executors do not
//! interleave their output.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use crate::util::format_duration;

/// Max bytes of a request or response body included in the log.
const MAX_BODY_LOG_SIZE: usize = 1024;

/// Logs HTTP request/response details for debugging.
pub struct DebugLogger {
    out: Mutex<Box<dyn Write + Send>>,
}

impl DebugLogger {
    /// Create a debug logger writing to stderr.
    pub fn new() -> DebugLogger {
        DebugLogger::with_writer(Box::new(std::io::stderr()))
    }

    /// Create a debug logger writing to the given writer.
    pub fn with_writer(out: Box<dyn Write + Send>) -> DebugLogger {
        DebugLogger { out: Mutex::new(out) }
    }

    /// Log an outgoing request.
    pub fn log_request(
        &self,
        actor_id: usize,
        step_name: &str,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: &str,
    ) {
        let mut buffer = String::new();
        buffer.push_str(&format!("\n[Actor {}] >>> REQUEST: {}\n", actor_id, step_name));
        buffer.push_str(&format!("  {} {}\n", method, url));
        if !headers.is_empty() {
            buffer.push_str("  Headers:\n");
            let mut names: Vec<&String> = headers.keys().collect();
            names.sort();
            for name in names {
                buffer.push_str(&format!("    {}: {}\n", name, headers[name]));
            }
        }
        if !body.is_empty() {
            buffer.push_str(&format!("  Body: {}\n", truncate_body(body.as_bytes())));
        }
        self.write(&buffer);
    }

    /// Log a received response.
    pub fn log_response(
        &self,
        actor_id: usize,
        step_name: &str,
        status: u16,
        body: &[u8],
        duration: Duration,
    ) {
        let mut buffer = String::new();
        buffer.push_str(&format!(
            "[Actor {}] <<< RESPONSE: {} ({})\n",
            actor_id,
            step_name,
            format_duration(duration)
        ));
        buffer.push_str(&format!("  Status: {}\n", status));
        if !body.is_empty() {
            buffer.push_str(&format!("  Body: {}\n", truncate_body(body)));
        }
        self.write(&buffer);
    }

    /// Log a request that failed before a response arrived.
    pub fn log_error(&self, actor_id: usize, step_name: &str, error: &str, duration: Duration) {
        self.write(&format!(
            "[Actor {}] !!! ERROR: {} ({})\n  {}\n",
            actor_id,
            step_name,
            format_duration(duration),
            error
        ));
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock().unwrap();
        // Logging must never fail the load test.
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

impl Default for DebugLogger {
    fn default() -> Self {
        DebugLogger::new()
    }
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if body.len() <= MAX_BODY_LOG_SIZE {
        return text.to_string();
    }
    let truncated: String = text.chars().take(MAX_BODY_LOG_SIZE).collect();
    format!("{}... (truncated, {} bytes total)", truncated, body.len())
}
