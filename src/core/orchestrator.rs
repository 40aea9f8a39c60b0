//! Request orchestration.
//!
//! `Resolver::resolve` runs one request through the whole pipeline:
//!
//! ```text
//! admission → cache (get_or_compute) → metadata → search (all providers)
//!           → scoring → extraction over health-ranked instances → cache write
//! ```
//!
//! The whole request, admission wait included, runs under the pipeline budget.
//! The extraction chain gets whatever is left of that budget, capped at its own.
//! Dropping the future returned by `resolve` releases the admission slot and,
//! once no other caller is waiting on the same key, cancels the extraction
//! attempts behind it.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::adapters::{CandidateSearch, ExtractionBackend, MetadataProvider};
use crate::domain::{Candidate, MediaIdentifier, ResolveError, ResolvedStream, TargetMetadata};

use super::admission::{AdmissionConfig, AdmissionController, AdmissionStats};
use super::budget::{Deadline, TimeoutBudget};
use super::cache::{CacheConfig, CacheStats, CacheValue, ResolutionCache};
use super::extraction::{ExtractionChain, ExtractionOutcome};
use super::health::{HealthConfig, HealthTracker, InstanceHealth};
use super::rerank::Reranker;
use super::scoring::{Scorer, ScoringConfig};

/// Left over at the end of the pipeline so the chain reports before the request times out
const CHAIN_FINISH_MARGIN: Duration = Duration::from_millis(50);

/// Snapshot served by the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ResolverStats {
    pub cache: CacheStats,
    pub admission: AdmissionStats,
    pub backends: Vec<InstanceHealth>,
}

struct ResolverInner {
    budget: TimeoutBudget,
    admission: AdmissionController,
    cache: ResolutionCache,
    sweep_interval: Duration,
    health: Arc<HealthTracker>,
    scorer: Scorer,
    chain: ExtractionChain,
    metadata: Arc<dyn MetadataProvider>,
    search: Vec<Arc<dyn CandidateSearch>>,
}

/// Trailer resolver; clones share state
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<ResolverInner>,
}

/// Assembles a [`Resolver`] from collaborators and settings
pub struct ResolverBuilder {
    metadata: Arc<dyn MetadataProvider>,
    backend: Arc<dyn ExtractionBackend>,
    search: Vec<Arc<dyn CandidateSearch>>,
    instances: Vec<String>,
    budget: TimeoutBudget,
    admission: AdmissionConfig,
    cache_config: CacheConfig,
    cache: Option<ResolutionCache>,
    health: HealthConfig,
    scoring: ScoringConfig,
    reranker: Option<Arc<dyn Reranker>>,
}

impl ResolverBuilder {
    pub fn search(mut self, provider: Arc<dyn CandidateSearch>) -> Self {
        self.search.push(provider);
        self
    }

    /// Extraction instance ids, in initial preference order
    pub fn instances<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instances.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn budget(mut self, budget: TimeoutBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn admission(mut self, config: AdmissionConfig) -> Self {
        self.admission = config;
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Use a prepared cache instead of one built from the cache config
    pub fn cache(mut self, cache: ResolutionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn health(mut self, config: HealthConfig) -> Self {
        self.health = config;
        self
    }

    pub fn scoring(mut self, config: ScoringConfig) -> Self {
        self.scoring = config;
        self
    }

    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Validate settings and assemble the resolver
    pub fn build(self) -> Result<Resolver> {
        self.budget.validate()?;
        self.scoring.validate()?;

        if self.search.is_empty() {
            anyhow::bail!("At least one candidate search provider is required");
        }
        if self.instances.is_empty() {
            warn!("No extraction instances configured; every accepted match will be exhausted");
        }

        let cache = match self.cache {
            Some(cache) => cache,
            None => {
                self.cache_config.validate()?;
                ResolutionCache::new(&self.cache_config)
            }
        };

        let health = Arc::new(HealthTracker::new(self.health, self.instances));
        let chain = ExtractionChain::new(self.backend, Arc::clone(&health), &self.budget);

        let mut scorer = Scorer::new(self.scoring);
        if let Some(reranker) = self.reranker {
            scorer = scorer.with_reranker(reranker);
        }

        info!(
            search_providers = self.search.len(),
            instances = health.snapshot().len(),
            pipeline_budget_ms = self.budget.pipeline_budget_ms,
            "Resolver ready"
        );

        Ok(Resolver {
            inner: Arc::new(ResolverInner {
                admission: AdmissionController::new(&self.admission, self.budget.max_queue_wait()),
                cache,
                sweep_interval: self.cache_config.sweep_interval(),
                health,
                scorer,
                chain,
                metadata: self.metadata,
                search: self.search,
                budget: self.budget,
            }),
        })
    }
}

impl Resolver {
    pub fn builder(
        metadata: Arc<dyn MetadataProvider>,
        backend: Arc<dyn ExtractionBackend>,
    ) -> ResolverBuilder {
        ResolverBuilder {
            metadata,
            backend,
            search: Vec::new(),
            instances: Vec::new(),
            budget: TimeoutBudget::default(),
            admission: AdmissionConfig::default(),
            cache_config: CacheConfig::default(),
            cache: None,
            health: HealthConfig::default(),
            scoring: ScoringConfig::default(),
            reranker: None,
        }
    }

    /// Resolve `id` to a playable stream within the pipeline budget
    pub async fn resolve(&self, id: &MediaIdentifier) -> Result<ResolvedStream, ResolveError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("resolve", %request_id, media = %id);

        async {
            let start = Instant::now();
            let budget = self.inner.budget.pipeline_budget();
            let pipeline = Deadline::start(budget);

            let result = match tokio::time::timeout(budget, self.resolve_admitted(id, pipeline)).await {
                Ok(result) => result,
                Err(_) => Err(ResolveError::Timeout {
                    budget_ms: self.inner.budget.pipeline_budget_ms,
                }),
            };

            let elapsed_ms = start.elapsed().as_millis() as u64;
            match &result {
                Ok(stream) => info!(
                    elapsed_ms,
                    instance = %stream.instance_id,
                    provider = %stream.provider,
                    "Resolved"
                ),
                Err(e) if e.is_negative_result() => {
                    info!(elapsed_ms, outcome = e.kind(), "No stream")
                }
                Err(e) => warn!(elapsed_ms, outcome = e.kind(), error = %e, "Resolution failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn resolve_admitted(
        &self,
        id: &MediaIdentifier,
        pipeline: Deadline,
    ) -> Result<ResolvedStream, ResolveError> {
        let slot = self.inner.admission.admit().await?;
        if !slot.waited().is_zero() {
            debug!(waited_ms = slot.waited().as_millis() as u64, "Admitted after queueing");
        }

        let key = id.cache_key();
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        let value = self
            .inner
            .cache
            .get_or_compute(&key, move || {
                async move { inner.compute(&id, pipeline).await }.in_current_span()
            })
            .await;

        self.inner.admission.release(slot);

        match value? {
            CacheValue::Found(stream) => Ok(stream),
            CacheValue::NotFound => Err(ResolveError::NotFound),
        }
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            cache: self.inner.cache.stats(),
            admission: self.inner.admission.stats(),
            backends: self.inner.health.snapshot(),
        }
    }

    pub fn budget(&self) -> &TimeoutBudget {
        &self.inner.budget
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.inner.cache
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.inner.health
    }

    /// Stop admitting new requests
    pub fn shutdown(&self) {
        info!("Closing admission");
        self.inner.admission.close();
    }

    /// Periodically purge expired cache entries and decay backend health.
    ///
    /// The task ends once every `Resolver` handle has been dropped.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let weak: Weak<ResolverInner> = Arc::downgrade(&self.inner);
        let sweep_every = self.inner.sweep_interval;
        let decay_every = self
            .inner
            .health
            .config()
            .decay_interval()
            .max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_every);
            let mut decay = tokio::time::interval(decay_every);
            // Both fire immediately on the first tick
            sweep.tick().await;
            decay.tick().await;

            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.cache.purge_expired();
                    }
                    _ = decay.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.health.decay();
                    }
                }
            }
            debug!("Maintenance task stopped");
        })
    }
}

impl ResolverInner {
    async fn compute(
        &self,
        id: &MediaIdentifier,
        pipeline: Deadline,
    ) -> Result<CacheValue, ResolveError> {
        let target = match self.metadata.lookup(id).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                info!(provider = self.metadata.name(), "Unknown to metadata provider");
                return Ok(CacheValue::NotFound);
            }
            Err(e) => {
                warn!(provider = self.metadata.name(), error = %format!("{:#}", e), "Metadata lookup failed");
                return Err(ResolveError::UpstreamError(format!(
                    "{}: {:#}",
                    self.metadata.name(),
                    e
                )));
            }
        };

        let candidates = self.search_all(id, &target).await?;
        debug!(candidates = candidates.len(), title = %target.title, "Scoring candidates");

        let Some(accepted) = self.scorer.score(&target, &candidates) else {
            info!(candidates = candidates.len(), "No candidate accepted");
            return Ok(CacheValue::NotFound);
        };
        info!(
            provider = %accepted.candidate.provider,
            provider_id = %accepted.candidate.provider_id,
            score = accepted.score,
            tier = ?accepted.tier,
            "Candidate accepted"
        );

        let order = self.health.ranked_order();
        let limit = pipeline.remaining().saturating_sub(CHAIN_FINISH_MARGIN);
        match self.chain.extract_within(&accepted, &order, limit).await {
            ExtractionOutcome::Succeeded { stream, .. } => Ok(CacheValue::Found(stream)),
            ExtractionOutcome::Exhausted { attempts } => Err(ResolveError::ExtractionExhausted {
                attempts: attempts.len(),
            }),
            ExtractionOutcome::TotalTimeout { elapsed, .. } => Err(ResolveError::TotalTimeout {
                elapsed_ms: elapsed.as_millis() as u64,
            }),
        }
    }

    /// Query every provider concurrently and merge, dropping duplicates
    async fn search_all(
        &self,
        id: &MediaIdentifier,
        target: &TargetMetadata,
    ) -> Result<Vec<Candidate>, ResolveError> {
        let searches = self.search.iter().map(|provider| async move {
            let result = provider
                .search(&target.title, target.year, id.media_type)
                .await;
            (provider.name(), result)
        });
        let results = join_all(searches).await;

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut merged = Vec::new();
        let mut failures = Vec::new();

        for (name, result) in results {
            match result {
                Ok(candidates) => {
                    debug!(provider = name, found = candidates.len(), "Search returned");
                    for candidate in candidates {
                        let key = (candidate.provider.clone(), candidate.provider_id.clone());
                        if seen.insert(key) {
                            merged.push(candidate);
                        }
                    }
                }
                Err(e) => {
                    warn!(provider = name, error = %format!("{:#}", e), "Search provider failed");
                    failures.push(format!("{}: {:#}", name, e));
                }
            }
        }

        if failures.len() == self.search.len() {
            return Err(ResolveError::UpstreamError(failures.join("; ")));
        }

        Ok(merged)
    }
}
