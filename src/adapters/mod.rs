//! Adapter interfaces for external systems.
//!
//! The resolver talks to three kinds of collaborators: a metadata provider
//! describing the requested title, one or more candidate search providers, and
//! the extraction instances that turn a candidate into a playable URL.

pub mod http;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Candidate, MediaIdentifier, MediaType, TargetMetadata};

pub use http::{HttpCandidateSearch, HttpExtractionBackend, HttpMetadataProvider};

/// Looks up what is known about a requested item
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// `Ok(None)` when the provider has no record of the item
    async fn lookup(&self, id: &MediaIdentifier) -> Result<Option<TargetMetadata>>;
}

/// Searches one trailer provider for candidates
#[async_trait]
pub trait CandidateSearch: Send + Sync {
    /// Provider name, stamped on every candidate it returns
    fn name(&self) -> &str;

    async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        media_type: MediaType,
    ) -> Result<Vec<Candidate>>;
}

/// Turns a candidate into a direct stream URL on a given instance
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve on `instance_id`, giving up after `timeout`
    async fn resolve_url(
        &self,
        candidate: &Candidate,
        instance_id: &str,
        timeout: Duration,
    ) -> Result<String>;
}
