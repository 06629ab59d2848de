//! Marketplace cost model.
//!
//! Pure functions shared by the dispatcher's provider selection and the
//! HTTP admission check.

/// Lowest cost assumed for a provider whose registration omits one.
pub const DEFAULT_MIN_COST: u32 = 10;

/// Spending cap applied to submissions that omit `max_cost`.
pub const DEFAULT_MAX_COST: u32 = 15;

/// Default weighting of waiting time against money.
pub const DEFAULT_TIME_TO_MONEY_RATIO: f64 = 1.0;

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Score of placing a task on a provider. Lower is better.
///
/// `waiting_time_ms` must already include the estimate for the task being
/// placed; `time_to_money_ratio` expresses what one millisecond of waiting
/// costs the submitter.
pub fn provider_score(min_cost: u32, waiting_time_ms: u64, time_to_money_ratio: f64) -> f64 {
    min_cost as f64 + waiting_time_ms as f64 * time_to_money_ratio
}

/// Whether a provider's minimum price fits under a task's spending cap.
pub fn accepts_cost(provider_min_cost: u32, task_max_cost: u32) -> bool {
    provider_min_cost <= task_max_cost
}
