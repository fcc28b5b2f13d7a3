// src/backoff.rs
//
// Exponential delay schedule used for MQTT reconnects and relay restarts.

use std::time::Duration;

/// Doubling delay, capped at `max`. `reset()` returns to `initial`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Sleep for `delay`, waking early when `stop` returns true.
/// Returns false if the sleep was cut short.
pub fn sleep_unless(delay: Duration, stop: impl Fn() -> bool) -> bool {
    const STEP: Duration = Duration::from_millis(50);
    let deadline = std::time::Instant::now() + delay;
    loop {
        if stop() {
            return false;
        }
        let now = std::time::Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(STEP.min(deadline - now));
    }
}
