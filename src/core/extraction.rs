//! Extraction fallback chain.
//!
//! Turns an accepted candidate into a playable URL by trying extraction
//! instances in health-ranked order:
//!
//! ```text
//! Pending → Trying(i) → Succeeded
//!                     → Trying(i+1)   (attempt failed or timed out)
//!                     → Exhausted     (no instances left)
//!                     → TotalTimeout  (chain budget spent)
//! ```
//!
//! Every attempt runs as its own task under a per-attempt timeout clipped to
//! the remaining chain budget. The first success aborts whatever is still in
//! flight. With hedging enabled, the next instance is started once the current
//! attempt has been pending for the hedge delay.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::adapters::ExtractionBackend;
use crate::domain::{AttemptOutcome, Candidate, ExtractionAttempt, ResolvedStream, ScoredCandidate};

use super::budget::{Deadline, TimeoutBudget};
use super::health::HealthTracker;

/// Result of running the chain for one candidate
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Succeeded {
        stream: ResolvedStream,
        attempts: Vec<ExtractionAttempt>,
    },

    /// Every instance failed before the budget ran out
    Exhausted { attempts: Vec<ExtractionAttempt> },

    /// The chain budget ran out first
    TotalTimeout {
        elapsed: Duration,
        attempts: Vec<ExtractionAttempt>,
    },
}

impl ExtractionOutcome {
    pub fn attempts(&self) -> &[ExtractionAttempt] {
        match self {
            Self::Succeeded { attempts, .. }
            | Self::Exhausted { attempts }
            | Self::TotalTimeout { attempts, .. } => attempts,
        }
    }
}

/// Chain state, traced at each transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Pending,
    /// Index of the most recently started instance
    Trying(usize),
    Succeeded,
    Exhausted,
    TotalTimeout,
}

struct AttemptReport {
    attempt: ExtractionAttempt,
    url: Option<String>,
    /// Ran under less than the full attempt timeout
    clipped: bool,
}

/// Ordered multi-backend extraction with fallback
pub struct ExtractionChain {
    backend: Arc<dyn ExtractionBackend>,
    health: Arc<HealthTracker>,
    attempt_timeout: Duration,
    total_budget: Duration,
    hedge_after: Option<Duration>,
}

impl ExtractionChain {
    pub fn new(
        backend: Arc<dyn ExtractionBackend>,
        health: Arc<HealthTracker>,
        budget: &TimeoutBudget,
    ) -> Self {
        Self {
            backend,
            health,
            attempt_timeout: budget.attempt_timeout(),
            total_budget: budget.extraction_budget(),
            hedge_after: budget.hedge_after(),
        }
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Try `instance_order` until one instance yields a playable URL
    pub async fn extract(
        &self,
        scored: &ScoredCandidate,
        instance_order: &[String],
    ) -> ExtractionOutcome {
        self.extract_within(scored, instance_order, self.total_budget)
            .await
    }

    /// Like [`extract`](Self::extract), with the chain budget capped at `limit`
    #[instrument(
        skip(self, scored, instance_order),
        fields(
            provider = %scored.candidate.provider,
            provider_id = %scored.candidate.provider_id,
            instances = instance_order.len(),
            budget_ms = limit.min(self.total_budget).as_millis() as u64
        )
    )]
    pub async fn extract_within(
        &self,
        scored: &ScoredCandidate,
        instance_order: &[String],
        limit: Duration,
    ) -> ExtractionOutcome {
        let deadline = Deadline::start(limit.min(self.total_budget));
        let mut attempts: Vec<ExtractionAttempt> = Vec::new();
        let mut state = ChainState::Pending;

        if deadline.is_expired() {
            let mut pending = JoinSet::new();
            return budget_spent(&mut state, &mut pending, &deadline, attempts);
        }

        if instance_order.is_empty() {
            warn!("No extraction instances configured");
            transition(&mut state, ChainState::Exhausted);
            return ExtractionOutcome::Exhausted { attempts };
        }

        let mut pending: JoinSet<AttemptReport> = JoinSet::new();
        let mut next = 0usize;
        let mut last_launch = Instant::now();

        let total_timer = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline.at()));
        tokio::pin!(total_timer);

        loop {
            if pending.is_empty() {
                if next < instance_order.len() {
                    self.launch(&mut pending, &scored.candidate, &instance_order[next], &deadline);
                    transition(&mut state, ChainState::Trying(next));
                    next += 1;
                    last_launch = Instant::now();
                    continue;
                }

                transition(&mut state, ChainState::Exhausted);
                warn!(
                    attempts = attempts.len(),
                    elapsed_ms = deadline.elapsed().as_millis() as u64,
                    "All extraction instances failed"
                );
                return ExtractionOutcome::Exhausted { attempts };
            }

            let hedge_at = match self.hedge_after {
                Some(delay) if next < instance_order.len() => Some(last_launch + delay),
                _ => None,
            };
            let hedge_timer = async move {
                match hedge_at {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                joined = pending.join_next() => {
                    let report = match joined {
                        Some(Ok(report)) => report,
                        Some(Err(e)) => {
                            // Attempts are never aborted individually, so this is unexpected
                            warn!(error = %e, "Extraction attempt task ended abnormally");
                            continue;
                        }
                        None => continue,
                    };

                    let success = report.attempt.outcome.is_success();
                    let cut_by_budget = report.clipped
                        && report.attempt.outcome == AttemptOutcome::Timeout
                        && deadline.is_expired();
                    if cut_by_budget {
                        debug!(
                            instance = %report.attempt.instance_id,
                            "Attempt cut off by chain budget, not counted against instance"
                        );
                    } else {
                        self.health.record_outcome(&report.attempt.instance_id, success);
                    }

                    match report.url {
                        Some(url) if success => {
                            transition(&mut state, ChainState::Succeeded);
                            info!(
                                instance = %report.attempt.instance_id,
                                latency_ms = report.attempt.latency.as_millis() as u64,
                                in_flight = pending.len(),
                                "Extraction succeeded"
                            );
                            let stream = ResolvedStream::new(
                                url,
                                report.attempt.instance_id.clone(),
                                scored.candidate.provider.clone(),
                                scored.candidate.provider_id.clone(),
                            );
                            attempts.push(report.attempt);
                            pending.abort_all();
                            return ExtractionOutcome::Succeeded { stream, attempts };
                        }
                        _ => {
                            warn!(
                                instance = %report.attempt.instance_id,
                                outcome = ?report.attempt.outcome,
                                latency_ms = report.attempt.latency.as_millis() as u64,
                                error = report.attempt.error.as_deref().unwrap_or(""),
                                "Extraction attempt failed"
                            );
                            attempts.push(report.attempt);

                            // A clipped attempt ends together with the budget
                            if deadline.is_expired() {
                                return budget_spent(&mut state, &mut pending, &deadline, attempts);
                            }
                        }
                    }
                }

                _ = &mut total_timer => {
                    return budget_spent(&mut state, &mut pending, &deadline, attempts);
                }

                _ = hedge_timer => {
                    debug!(instance = %instance_order[next], "Hedging with next instance");
                    self.launch(&mut pending, &scored.candidate, &instance_order[next], &deadline);
                    transition(&mut state, ChainState::Trying(next));
                    next += 1;
                    last_launch = Instant::now();
                }
            }
        }
    }

    fn launch(
        &self,
        pending: &mut JoinSet<AttemptReport>,
        candidate: &Candidate,
        instance_id: &str,
        deadline: &Deadline,
    ) {
        let backend = Arc::clone(&self.backend);
        let candidate = candidate.clone();
        let instance_id = instance_id.to_string();
        let timeout = deadline.clip(self.attempt_timeout);
        let clipped = timeout < self.attempt_timeout;

        pending.spawn(async move {
            let started_at = Utc::now();
            let start = Instant::now();

            let call = AssertUnwindSafe(backend.resolve_url(&candidate, &instance_id, timeout))
                .catch_unwind();
            let result = tokio::time::timeout(timeout, call).await;
            let latency = start.elapsed();

            let (outcome, url, error) = match result {
                Ok(Ok(Ok(url))) => match validate_stream_url(&url) {
                    Ok(()) => (AttemptOutcome::Success, Some(url), None),
                    Err(reason) => (AttemptOutcome::Failure, None, Some(reason)),
                },
                Ok(Ok(Err(e))) => (AttemptOutcome::Failure, None, Some(format!("{:#}", e))),
                Ok(Err(_)) => (
                    AttemptOutcome::Failure,
                    None,
                    Some("backend panicked".to_string()),
                ),
                Err(_) => (
                    AttemptOutcome::Timeout,
                    None,
                    Some(format!("timed out after {}ms", timeout.as_millis())),
                ),
            };

            AttemptReport {
                attempt: ExtractionAttempt {
                    instance_id,
                    started_at,
                    outcome,
                    latency,
                    error,
                },
                url,
                clipped,
            }
        });
    }
}

/// A playable URL is an absolute http(s) URL
fn validate_stream_url(raw: &str) -> Result<(), String> {
    let url = reqwest::Url::parse(raw.trim()).map_err(|e| format!("invalid URL '{}': {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported URL scheme '{}'", other)),
    }
}

fn budget_spent(
    state: &mut ChainState,
    pending: &mut JoinSet<AttemptReport>,
    deadline: &Deadline,
    attempts: Vec<ExtractionAttempt>,
) -> ExtractionOutcome {
    transition(state, ChainState::TotalTimeout);
    pending.abort_all();
    let elapsed = deadline.elapsed();
    warn!(
        attempts = attempts.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Extraction budget exceeded"
    );
    ExtractionOutcome::TotalTimeout { elapsed, attempts }
}

fn transition(state: &mut ChainState, next: ChainState) {
    debug!(from = ?*state, to = ?next, "Extraction chain transition");
    *state = next;
}
