//! Core resolution logic.
//!
//! This module contains:
//! - Scoring: candidate matching against target metadata
//! - Extraction: ordered fallback over backend instances
//! - Health: per-instance reliability tracking
//! - Admission: bounded concurrency with a bounded queue
//! - Cache: TTL cache with in-flight de-duplication
//! - Orchestrator: the request pipeline tying these together

pub mod admission;
pub mod budget;
pub mod cache;
pub mod extraction;
pub mod health;
pub mod orchestrator;
pub mod rerank;
pub mod scoring;

// Re-export commonly used types
pub use admission::{AdmissionConfig, AdmissionController, AdmissionStats, Slot};
pub use budget::{BudgetViolation, Deadline, TimeoutBudget};
pub use cache::{CacheConfig, CacheEntry, CacheStats, CacheValue, ResolutionCache};
pub use extraction::{ChainState, ExtractionChain, ExtractionOutcome};
pub use health::{HealthConfig, HealthTracker, InstanceHealth};
pub use orchestrator::{Resolver, ResolverBuilder, ResolverStats};
pub use rerank::{HeuristicReranker, Reranker, TokenReranker};
pub use scoring::{Scorer, ScoringConfig};
