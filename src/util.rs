//! Utility functions used across the crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use num_format::{Locale, ToFormattedString};

use crate::shutdown::ShutdownTrigger;

/// Parse a string representing a time span and return a [`Duration`].
///
/// A bare integer is interpreted as seconds. Otherwise the value is parsed
/// with humantime, accepting formats like "500ms", "30s", "20m", "1h30m".
pub fn parse_duration(time_str: &str) -> Result<Duration, String> {
    let time_str = time_str.trim();
    if time_str.is_empty() {
        return Err("empty duration".to_string());
    }
    // If an integer is passed in, assume it's seconds.
    if let Ok(seconds) = time_str.parse::<u64>() {
        trace!("{} is integer: {} seconds", time_str, seconds);
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(time_str)
        .map_err(|e| format!("invalid duration '{}': {}", time_str, e))
}

/// Format a duration for display.
///
/// Sub-millisecond durations are shown in microseconds, sub-second in
/// milliseconds, sub-minute as fractional seconds, anything longer as
/// minutes and seconds.
pub fn format_duration(duration: Duration) -> String {
    if duration < Duration::from_millis(1) {
        format!("{}µs", duration.as_micros())
    } else if duration < Duration::from_secs(1) {
        format!("{}ms", duration.as_millis())
    } else if duration < Duration::from_secs(60) {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        // Round to the nearest second before splitting into minutes.
        let total_seconds = (duration.as_secs_f64() + 0.5) as u64;
        format!("{}m{}s", total_seconds / 60, total_seconds % 60)
    }
}

/// Format large number in locale appropriate style.
pub fn format_number(number: usize) -> String {
    number.to_formatted_string(&Locale::en)
}

/// Serde adapter for duration fields in YAML configs.
///
/// Accepts humantime strings ("500ms", "1h30m") or integer seconds, and
/// serializes back to a humantime string.
pub mod serde_duration {
    use std::time::Duration;

    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> de::Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a duration string (e.g. \"30s\") or integer seconds")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
                super::parse_duration(value).map_err(de::Error::custom)
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
                if value < 0 {
                    return Err(de::Error::custom("duration must not be negative"));
                }
                Ok(Duration::from_secs(value as u64))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

/// Install a handler canceling the test scope on SIGINT/SIGTERM.
///
/// The first interrupt triggers a graceful shutdown so the summary still
/// prints; an additional interrupt exits immediately.
pub fn setup_interrupt_handler(trigger: &ShutdownTrigger, interrupted: &Arc<AtomicBool>) {
    let trigger = trigger.clone();
    let caught = interrupted.clone();
    match ctrlc::set_handler(move || {
        if caught.load(Ordering::SeqCst) {
            warn!("caught another interrupt, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught interrupt, stopping...");
            caught.store(true, Ordering::SeqCst);
            trigger.trigger();
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            info!("failed to set interrupt handler: {}", e);
        }
    }
}
