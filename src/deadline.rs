//! Deadline model.
//!
//! A worker's admission budget shrinks linearly with wall-clock time since
//! start. `smart_scheduling` gates whether an estimated job runtime is
//! checked against the remaining budget at all.

use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct DeadlineConfig {
    pub max_runtime_secs: i64,
    pub margin_time_secs: i64,
    pub speed_factor: f64,
    pub smart_scheduling: bool,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            max_runtime_secs: 86_400,
            margin_time_secs: 0,
            speed_factor: 1.0,
            smart_scheduling: true,
        }
    }
}

/// Required wall-clock seconds for a job of the given time estimate, scaled
/// by a worker's speed factor. The single source of truth for this formula:
/// both `Deadline::admits` and the claim engine's per-candidate filter call
/// through here rather than each re-deriving it.
pub fn required_seconds(estimate_time_hours: f64, speed_factor: f64) -> f64 {
    estimate_time_hours * 3600.0 / speed_factor
}

/// Whether a job of the given time estimate fits in `budget_seconds`.
pub fn fits_budget(estimate_time_hours: f64, speed_factor: f64, budget_seconds: i64) -> bool {
    required_seconds(estimate_time_hours, speed_factor) <= budget_seconds as f64
}

/// Tracks worker start time and derives the remaining claim-admission budget.
#[derive(Debug, Clone)]
pub struct Deadline {
    config: DeadlineConfig,
    start: Instant,
}

impl Deadline {
    pub fn start_now(config: DeadlineConfig) -> Self {
        Self {
            config,
            start: Instant::now(),
        }
    }

    /// `budget_seconds = max_runtime - margin_time - elapsed`. Once this is
    /// `<= 0` the worker must stop claiming new jobs.
    pub fn budget_seconds(&self) -> i64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        self.config.max_runtime_secs - self.config.margin_time_secs - elapsed as i64
    }

    pub fn smart_scheduling(&self) -> bool {
        self.config.smart_scheduling
    }

    pub fn speed_factor(&self) -> f64 {
        self.config.speed_factor
    }

    /// Required wall-clock seconds for a job of the given estimate, scaled
    /// by the worker's speed factor.
    pub fn required_seconds(&self, estimate_time_hours: f64) -> f64 {
        required_seconds(estimate_time_hours, self.config.speed_factor)
    }

    /// Whether a job with the given time estimate is admissible right now.
    /// When `smart_scheduling` is disabled, estimates are never rejected.
    pub fn admits(&self, estimate_time_hours: f64) -> bool {
        if !self.config.smart_scheduling {
            return true;
        }
        let budget = self.budget_seconds();
        if budget <= 0 {
            return false;
        }
        fits_budget(estimate_time_hours, self.config.speed_factor, budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_within_budget() {
        let cfg = DeadlineConfig {
            max_runtime_secs: 3600,
            margin_time_secs: 0,
            speed_factor: 1.0,
            smart_scheduling: true,
        };
        let deadline = Deadline::start_now(cfg);
        assert!(deadline.admits(0.5)); // 1800s <= ~3600s budget
        assert!(!deadline.admits(2.0)); // 7200s > budget
    }

    #[test]
    fn smart_scheduling_disabled_ignores_estimate() {
        let cfg = DeadlineConfig {
            max_runtime_secs: 1,
            margin_time_secs: 0,
            speed_factor: 1.0,
            smart_scheduling: false,
        };
        let deadline = Deadline::start_now(cfg);
        assert!(deadline.admits(1000.0));
    }

    #[test]
    fn speed_factor_scales_required_time() {
        let cfg = DeadlineConfig {
            max_runtime_secs: 3600,
            margin_time_secs: 0,
            speed_factor: 2.0,
            smart_scheduling: true,
        };
        let deadline = Deadline::start_now(cfg);
        // 2 hours at speed factor 2.0 => required 3600s, within budget.
        assert!(deadline.admits(2.0));
    }
}
