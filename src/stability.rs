use std::time::{Duration, Instant};

/// Tracks the last distinct log line and when it last changed.
///
/// "No new output" and "repeated identical output" are deliberately the same
/// thing here: both leave `last_change` untouched, so a worker spinning on an
/// unchanging status line counts as stalled just like a silent one.
pub struct StabilityState {
    last_line: String,
    last_change: Instant,
}

impl StabilityState {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        Self {
            last_line: String::new(),
            last_change: now,
        }
    }

    /// Feed a newly observed line. Blank lines are ignored; identical lines
    /// leave the change time alone.
    pub fn observe(&mut self, line: &str) {
        self.observe_at(line, Instant::now());
    }

    fn observe_at(&mut self, line: &str, now: Instant) {
        if line.trim().is_empty() {
            return;
        }
        if line != self.last_line {
            self.last_line = line.to_string();
            self.last_change = now;
        }
    }

    /// The current stable line (empty until the first non-blank observation).
    pub fn last_line(&self) -> &str {
        &self.last_line
    }

    /// Elapsed time since the stable line last changed.
    pub fn stable_duration(&self) -> Duration {
        self.last_change.elapsed()
    }

    #[cfg(test)]
    fn stable_duration_at(&self, now: Instant) -> Duration {
        now.duration_since(self.last_change)
    }
}
