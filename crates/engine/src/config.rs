//! Tunable parameters of the dispatch engine.

use std::time::Duration;

/// Knobs governing provider selection, retries, and disconnect handling.
///
/// Every threshold that used to be a constant in earlier iterations of this
/// system is configuration here; [`DispatchConfig::from_env`] reads the
/// documented environment variables and falls back to the defaults.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// A provider whose in-flight queue is longer than this is skipped by
    /// selection and excluded from the market minimum cost.
    pub busy_queue_threshold: usize,
    /// How long a disconnected provider stays registered before it is
    /// evicted and its remaining tasks are failed.
    pub offline_grace: Duration,
    /// Scheduling rounds granted to one task across reschedules before it
    /// is failed as unplaceable.
    pub max_schedule_attempts: u32,
    /// Send attempts against one provider before the task is failed as
    /// unsendable.
    pub send_attempts: u32,
    /// Pause between scheduling rounds when no provider is eligible.
    pub schedule_retry_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            busy_queue_threshold: 50,
            offline_grace: Duration::from_secs(3),
            max_schedule_attempts: 5,
            send_attempts: 3,
            schedule_retry_delay: Duration::from_millis(250),
        }
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `BUSY_QUEUE_THRESHOLD`    | `50`    |
    /// | `OFFLINE_GRACE_MS`        | `3000`  |
    /// | `MAX_SCHEDULE_ATTEMPTS`   | `5`     |
    /// | `SEND_ATTEMPTS`           | `3`     |
    /// | `SCHEDULE_RETRY_DELAY_MS` | `250`   |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let busy_queue_threshold: usize = std::env::var("BUSY_QUEUE_THRESHOLD")
            .map(|v| v.parse().expect("BUSY_QUEUE_THRESHOLD must be a valid usize"))
            .unwrap_or(defaults.busy_queue_threshold);

        let offline_grace = std::env::var("OFFLINE_GRACE_MS")
            .map(|v| {
                Duration::from_millis(v.parse().expect("OFFLINE_GRACE_MS must be a valid u64"))
            })
            .unwrap_or(defaults.offline_grace);

        let max_schedule_attempts: u32 = std::env::var("MAX_SCHEDULE_ATTEMPTS")
            .map(|v| v.parse().expect("MAX_SCHEDULE_ATTEMPTS must be a valid u32"))
            .unwrap_or(defaults.max_schedule_attempts);

        let send_attempts: u32 = std::env::var("SEND_ATTEMPTS")
            .map(|v| v.parse().expect("SEND_ATTEMPTS must be a valid u32"))
            .unwrap_or(defaults.send_attempts);

        let schedule_retry_delay = std::env::var("SCHEDULE_RETRY_DELAY_MS")
            .map(|v| {
                Duration::from_millis(
                    v.parse().expect("SCHEDULE_RETRY_DELAY_MS must be a valid u64"),
                )
            })
            .unwrap_or(defaults.schedule_retry_delay);

        Self {
            busy_queue_threshold,
            offline_grace,
            max_schedule_attempts,
            send_attempts,
            schedule_retry_delay,
        }
    }
}
