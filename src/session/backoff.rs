use std::time::Duration;

/// Exponential delay `base * 2^min(attempt - 1, 3)` between repair attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_ms: u64) -> Self {
        Self { base_ms, attempt: 0 }
    }

    pub fn next(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.base_ms * 2u64.pow((self.attempt - 1).min(3));
        Duration::from_millis(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
