use std::time::Duration;

/// Retry budget for the realtime channel.
///
/// Transport drops are retried after a fixed `delay`, at most
/// `max_attempts` times in a row; the budget resets on every successful
/// connect. Kept as a standalone value so tests can swap in a tight one.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// No automatic reconnects at all.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}
