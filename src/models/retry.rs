use chrono::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl RetryConfig {
    /// Backoff before retry number `retry_count + 1` of a queue entry:
    /// `initial * multiplier^retry_count`, capped at `max_delay_ms`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1).saturating_pow(retry_count);
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);

        Duration::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 60_000,
            max_delay_ms: 3_600_000,
            backoff_multiplier: 2,
        }
    }
}
