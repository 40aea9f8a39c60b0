//! Per-instance health of extraction backends.
//!
//! Each instance keeps success/failure counts, its current failure streak and
//! the times of its last success and failure. The rolling score is a smoothed
//! success ratio scaled down by a recency penalty that fades linearly over the
//! recovery window after the last failure.
//!
//! State lives in a `DashMap`: an update to one instance takes only that
//! instance's shard lock, so readers never see a half-applied outcome and
//! unrelated instances never contend on a global lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Health scoring parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// How long a failure keeps weighing on the score (default: 300s)
    #[serde(default = "default_recovery_window")]
    pub recovery_window_seconds: u64,

    /// Penalty per consecutive failure (default: 0.25)
    #[serde(default = "default_failure_penalty")]
    pub failure_penalty: f64,

    /// Upper bound of the recency penalty (default: 0.9)
    #[serde(default = "default_max_penalty")]
    pub max_penalty: f64,

    /// Interval of scheduled count decay (default: 600s)
    #[serde(default = "default_decay_interval")]
    pub decay_interval_seconds: u64,

    /// Factor applied to counts at each decay (default: 0.5)
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,
}

fn default_recovery_window() -> u64 {
    300
}
fn default_failure_penalty() -> f64 {
    0.25
}
fn default_max_penalty() -> f64 {
    0.9
}
fn default_decay_interval() -> u64 {
    600
}
fn default_decay_factor() -> f64 {
    0.5
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            recovery_window_seconds: default_recovery_window(),
            failure_penalty: default_failure_penalty(),
            max_penalty: default_max_penalty(),
            decay_interval_seconds: default_decay_interval(),
            decay_factor: default_decay_factor(),
        }
    }
}

impl HealthConfig {
    pub fn recovery_window(&self) -> Duration {
        Duration::from_secs(self.recovery_window_seconds)
    }

    pub fn decay_interval(&self) -> Duration {
        Duration::from_secs(self.decay_interval_seconds)
    }
}

#[derive(Debug, Clone)]
struct InstanceStats {
    /// Registration order, last tie-break
    position: usize,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
}

impl InstanceStats {
    fn new(position: usize) -> Self {
        Self {
            position,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
        }
    }
}

/// Point-in-time view of one instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceHealth {
    pub instance_id: String,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub seconds_since_success: Option<u64>,
    pub seconds_since_failure: Option<u64>,
    /// Rolling score in [0, 1]
    pub score: f64,
}

/// Shared table of backend instance health
#[derive(Debug)]
pub struct HealthTracker {
    config: HealthConfig,
    instances: DashMap<String, InstanceStats>,
}

impl HealthTracker {
    /// Tracker pre-populated with instances in their configured order
    pub fn new<I, S>(config: HealthConfig, instance_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let instances = DashMap::new();
        for (position, id) in instance_ids.into_iter().enumerate() {
            instances
                .entry(id.into())
                .or_insert_with(|| InstanceStats::new(position));
        }
        Self { config, instances }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Record one attempt outcome
    pub fn record_outcome(&self, instance_id: &str, success: bool) {
        self.record_outcome_at(instance_id, success, Instant::now());
    }

    /// Record one attempt outcome observed at `now`
    pub fn record_outcome_at(&self, instance_id: &str, success: bool, now: Instant) {
        let next_position = self.instances.len();
        let mut stats = self
            .instances
            .entry(instance_id.to_string())
            .or_insert_with(|| InstanceStats::new(next_position));

        if success {
            stats.successes = stats.successes.saturating_add(1);
            stats.consecutive_failures = 0;
            stats.last_success = Some(now);
        } else {
            stats.failures = stats.failures.saturating_add(1);
            stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);
            stats.last_failure = Some(now);
        }

        debug!(
            instance = instance_id,
            success,
            successes = stats.successes,
            failures = stats.failures,
            "Recorded extraction outcome"
        );
    }

    /// Instances best first
    pub fn ranked_order(&self) -> Vec<String> {
        self.ranked_order_at(Instant::now())
    }

    /// Instances best first, scored as of `now`.
    ///
    /// Ties on score go to the most recent success, then registration order.
    pub fn ranked_order_at(&self, now: Instant) -> Vec<String> {
        let mut rows: Vec<(String, f64, InstanceStats)> = self
            .instances
            .iter()
            .map(|entry| {
                let stats = entry.value().clone();
                (entry.key().clone(), self.score_of(&stats, now), stats)
            })
            .collect();

        rows.sort_by(|(_, sa, a), (_, sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| b.last_success.cmp(&a.last_success))
                .then_with(|| a.position.cmp(&b.position))
        });

        rows.into_iter().map(|(id, _, _)| id).collect()
    }

    /// Rolling score of one instance, `None` if unknown
    pub fn score(&self, instance_id: &str) -> Option<f64> {
        self.score_at(instance_id, Instant::now())
    }

    pub fn score_at(&self, instance_id: &str, now: Instant) -> Option<f64> {
        self.instances
            .get(instance_id)
            .map(|stats| self.score_of(&stats, now))
    }

    /// Snapshot of every instance, in ranked order
    pub fn snapshot(&self) -> Vec<InstanceHealth> {
        let now = Instant::now();
        let order = self.ranked_order_at(now);
        order
            .into_iter()
            .filter_map(|id| {
                let stats = self.instances.get(&id)?.clone();
                Some(InstanceHealth {
                    score: self.score_of(&stats, now),
                    successes: stats.successes,
                    failures: stats.failures,
                    consecutive_failures: stats.consecutive_failures,
                    seconds_since_success: stats
                        .last_success
                        .map(|t| now.saturating_duration_since(t).as_secs()),
                    seconds_since_failure: stats
                        .last_failure
                        .map(|t| now.saturating_duration_since(t).as_secs()),
                    instance_id: id,
                })
            })
            .collect()
    }

    /// Scheduled decay: scale counts down so old history weighs less.
    ///
    /// This is the only operation that lowers counts.
    pub fn decay(&self) {
        let factor = self.config.decay_factor.clamp(0.0, 1.0);
        for mut entry in self.instances.iter_mut() {
            let stats = entry.value_mut();
            stats.successes = (stats.successes as f64 * factor).floor() as u64;
            stats.failures = (stats.failures as f64 * factor).floor() as u64;
        }
        debug!(factor, instances = self.instances.len(), "Decayed instance health");
    }

    fn score_of(&self, stats: &InstanceStats, now: Instant) -> f64 {
        let ratio = (stats.successes as f64 + 1.0)
            / (stats.successes as f64 + stats.failures as f64 + 2.0);

        let penalty = match stats.last_failure {
            Some(failed_at) if stats.consecutive_failures > 0 => {
                let window = self.config.recovery_window().as_secs_f64();
                let since = now.saturating_duration_since(failed_at).as_secs_f64();
                let freshness = if window <= 0.0 {
                    0.0
                } else {
                    (1.0 - since / window).max(0.0)
                };
                let streak = (stats.consecutive_failures as f64 * self.config.failure_penalty)
                    .min(self.config.max_penalty);
                streak * freshness
            }
            _ => 0.0,
        };

        (ratio * (1.0 - penalty)).clamp(0.0, 1.0)
    }
}
