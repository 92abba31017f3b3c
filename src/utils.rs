// Licensed under the EUPL-1.2-or-later

//! contains log throttling and small shared helpers.
use std::collections::HashMap;
use std::fmt::Arguments;
use std::time::{Duration, Instant};

/// Throttle period used for per-sample warnings (bad commands, bound clamps).
pub static WARN_THROTTLE_PERIOD: Duration = Duration::from_secs(2);
/// Throttle period used for warnings about ignorable input (unknown joint names).
pub static IGNORED_INPUT_THROTTLE_PERIOD: Duration = Duration::from_secs(5);

/// Rate limiter for repetitive log messages.
///
/// The control loop runs at hundreds of hertz and a malformed command stream
/// would otherwise flood the log with identical lines. Each message is keyed
/// by a topic string; a topic is logged at most once per period and silently
/// dropped in between. The caller only emits, the throttle owns the rate
/// logic.
#[derive(Debug, Default)]
pub struct LogThrottle {
    last_emitted: HashMap<&'static str, Instant>,
}

impl LogThrottle {
    pub fn new() -> Self {
        LogThrottle::default()
    }

    /// Logs a warning for `topic`, at most once per `period`.
    pub fn warn(&mut self, topic: &'static str, period: Duration, args: Arguments<'_>) {
        if self.allow(topic, period) {
            log::warn!("{}", args);
        }
    }

    fn allow(&mut self, topic: &'static str, period: Duration) -> bool {
        let now = Instant::now();
        match self.last_emitted.get(topic) {
            Some(&last) if now.duration_since(last) < period => false,
            _ => {
                self.last_emitted.insert(topic, now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_drops_repeats_within_period() {
        let mut throttle = LogThrottle::new();
        assert!(throttle.allow("topic", Duration::from_secs(60)));
        assert!(!throttle.allow("topic", Duration::from_secs(60)));
        assert!(!throttle.allow("topic", Duration::from_secs(60)));
    }

    #[test]
    fn throttle_topics_are_independent() {
        let mut throttle = LogThrottle::new();
        assert!(throttle.allow("a", Duration::from_secs(60)));
        assert!(throttle.allow("b", Duration::from_secs(60)));
        assert!(!throttle.allow("a", Duration::from_secs(60)));
    }

    #[test]
    fn throttle_allows_after_period_elapsed() {
        let mut throttle = LogThrottle::new();
        assert!(throttle.allow("topic", Duration::from_nanos(1)));
        std::thread::sleep(Duration::from_millis(1));
        assert!(throttle.allow("topic", Duration::from_nanos(1)));
    }
}
