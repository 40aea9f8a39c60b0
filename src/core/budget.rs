//! Timeout budgets for resolution requests.
//!
//! The hierarchy is strict:
//! - per-attempt timeout < extraction budget
//! - extraction budget < pipeline budget
//! - pipeline budget < external caller timeout
//! - max queue wait < pipeline budget
//!
//! A request that respects the pipeline budget always answers before the
//! upstream gateway gives up.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timeout budgets, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutBudget {
    /// Timeout of the external caller (add-on gateway) (default: 10s)
    #[serde(default = "default_caller_timeout")]
    pub caller_timeout_ms: u64,

    /// Whole request, admission wait included (default: 8s)
    #[serde(default = "default_pipeline_budget")]
    pub pipeline_budget_ms: u64,

    /// Extraction fallback chain, all attempts included (default: 6s)
    #[serde(default = "default_extraction_budget")]
    pub extraction_budget_ms: u64,

    /// Single extraction attempt (default: 2.5s)
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,

    /// Longest a request may sit in the admission queue (default: 1.5s)
    #[serde(default = "default_max_queue_wait")]
    pub max_queue_wait_ms: u64,

    /// Start the next attempt early if the current one is still pending
    /// after this long (disabled by default)
    #[serde(default)]
    pub hedge_after_ms: Option<u64>,
}

fn default_caller_timeout() -> u64 {
    10_000
}
fn default_pipeline_budget() -> u64 {
    8_000
}
fn default_extraction_budget() -> u64 {
    6_000
}
fn default_attempt_timeout() -> u64 {
    2_500
}
fn default_max_queue_wait() -> u64 {
    1_500
}

impl Default for TimeoutBudget {
    fn default() -> Self {
        Self {
            caller_timeout_ms: default_caller_timeout(),
            pipeline_budget_ms: default_pipeline_budget(),
            extraction_budget_ms: default_extraction_budget(),
            attempt_timeout_ms: default_attempt_timeout(),
            max_queue_wait_ms: default_max_queue_wait(),
            hedge_after_ms: None,
        }
    }
}

impl TimeoutBudget {
    /// Check the strict ordering of the hierarchy
    pub fn validate(&self) -> Result<(), BudgetViolation> {
        if self.attempt_timeout_ms == 0 {
            return Err(BudgetViolation::Zero {
                name: "attempt_timeout_ms",
            });
        }

        if self.attempt_timeout_ms >= self.extraction_budget_ms {
            return Err(BudgetViolation::NotBelow {
                inner: "attempt_timeout_ms",
                inner_ms: self.attempt_timeout_ms,
                outer: "extraction_budget_ms",
                outer_ms: self.extraction_budget_ms,
            });
        }

        if self.extraction_budget_ms >= self.pipeline_budget_ms {
            return Err(BudgetViolation::NotBelow {
                inner: "extraction_budget_ms",
                inner_ms: self.extraction_budget_ms,
                outer: "pipeline_budget_ms",
                outer_ms: self.pipeline_budget_ms,
            });
        }

        if self.pipeline_budget_ms >= self.caller_timeout_ms {
            return Err(BudgetViolation::NotBelow {
                inner: "pipeline_budget_ms",
                inner_ms: self.pipeline_budget_ms,
                outer: "caller_timeout_ms",
                outer_ms: self.caller_timeout_ms,
            });
        }

        if self.max_queue_wait_ms >= self.pipeline_budget_ms {
            return Err(BudgetViolation::NotBelow {
                inner: "max_queue_wait_ms",
                inner_ms: self.max_queue_wait_ms,
                outer: "pipeline_budget_ms",
                outer_ms: self.pipeline_budget_ms,
            });
        }

        if let Some(hedge) = self.hedge_after_ms {
            if hedge == 0 || hedge >= self.attempt_timeout_ms {
                return Err(BudgetViolation::NotBelow {
                    inner: "hedge_after_ms",
                    inner_ms: hedge,
                    outer: "attempt_timeout_ms",
                    outer_ms: self.attempt_timeout_ms,
                });
            }
        }

        Ok(())
    }

    pub fn caller_timeout(&self) -> Duration {
        Duration::from_millis(self.caller_timeout_ms)
    }

    pub fn pipeline_budget(&self) -> Duration {
        Duration::from_millis(self.pipeline_budget_ms)
    }

    pub fn extraction_budget(&self) -> Duration {
        Duration::from_millis(self.extraction_budget_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn max_queue_wait(&self) -> Duration {
        Duration::from_millis(self.max_queue_wait_ms)
    }

    pub fn hedge_after(&self) -> Option<Duration> {
        self.hedge_after_ms.map(Duration::from_millis)
    }
}

/// Tracks the remaining time of one budget
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started_at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start counting now
    pub fn start(budget: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            budget,
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn at(&self) -> Instant {
        self.started_at + self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time left, zero once expired
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started_at.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// The given timeout, clipped to what is left of this deadline
    pub fn clip(&self, timeout: Duration) -> Duration {
        timeout.min(self.remaining())
    }
}

/// Budget hierarchy violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetViolation {
    #[error("{inner} ({inner_ms}ms) must be strictly below {outer} ({outer_ms}ms)")]
    NotBelow {
        inner: &'static str,
        inner_ms: u64,
        outer: &'static str,
        outer_ms: u64,
    },

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget_is_valid() {
        let budget = TimeoutBudget::default();
        assert!(budget.validate().is_ok());
        assert!(budget.pipeline_budget() < budget.caller_timeout());
    }

    #[test]
    fn test_attempt_must_be_below_extraction() {
        let budget = TimeoutBudget {
            attempt_timeout_ms: 6_000,
            ..Default::default()
        };
        assert!(matches!(
            budget.validate(),
            Err(BudgetViolation::NotBelow {
                inner: "attempt_timeout_ms",
                ..
            })
        ));
    }

    #[test]
    fn test_pipeline_must_be_below_caller() {
        let budget = TimeoutBudget {
            pipeline_budget_ms: 10_000,
            ..Default::default()
        };
        assert!(matches!(
            budget.validate(),
            Err(BudgetViolation::NotBelow {
                outer: "caller_timeout_ms",
                ..
            })
        ));
    }

    #[test]
    fn test_hedge_must_be_below_attempt() {
        let budget = TimeoutBudget {
            hedge_after_ms: Some(2_500),
            ..Default::default()
        };
        assert!(budget.validate().is_err());

        let budget = TimeoutBudget {
            hedge_after_ms: Some(800),
            ..Default::default()
        };
        assert!(budget.validate().is_ok());
    }

    #[test]
    fn test_deadline_clip() {
        let deadline = Deadline::start(Duration::from_secs(60));
        assert_eq!(
            deadline.clip(Duration::from_millis(100)),
            Duration::from_millis(100)
        );
        assert!(deadline.clip(Duration::from_secs(120)) <= Duration::from_secs(60));
        assert!(!deadline.is_expired());

        let expired = Deadline::start(Duration::ZERO);
        assert!(expired.is_expired());
        assert_eq!(expired.clip(Duration::from_secs(1)), Duration::ZERO);
    }
}
