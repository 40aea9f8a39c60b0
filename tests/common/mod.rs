//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use trailer_resolver::adapters::{CandidateSearch, ExtractionBackend, MetadataProvider};
use trailer_resolver::core::{HealthConfig, HealthTracker, TimeoutBudget};
use trailer_resolver::domain::{Candidate, MediaIdentifier, MediaType, TargetMetadata};

/// Small budgets so timing tests finish quickly
pub fn fast_budget() -> TimeoutBudget {
    TimeoutBudget {
        caller_timeout_ms: 2_000,
        pipeline_budget_ms: 1_500,
        extraction_budget_ms: 1_000,
        attempt_timeout_ms: 400,
        max_queue_wait_ms: 200,
        hedge_after_ms: None,
    }
}

pub fn health(ids: &[&str]) -> Arc<HealthTracker> {
    Arc::new(HealthTracker::new(HealthConfig::default(), ids.iter().copied()))
}

pub fn order(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

pub enum MetadataScript {
    Found(TargetMetadata),
    Unknown,
    Fail,
    Slow(Duration, TargetMetadata),
}

pub struct ScriptedMetadata {
    script: MetadataScript,
    calls: AtomicUsize,
}

impl ScriptedMetadata {
    pub fn new(script: MetadataScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn found(target: TargetMetadata) -> Arc<Self> {
        Self::new(MetadataScript::Found(target))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataProvider for ScriptedMetadata {
    fn name(&self) -> &str {
        "scripted-metadata"
    }

    async fn lookup(&self, _id: &MediaIdentifier) -> Result<Option<TargetMetadata>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            MetadataScript::Found(target) => Ok(Some(target.clone())),
            MetadataScript::Unknown => Ok(None),
            MetadataScript::Fail => anyhow::bail!("metadata service unavailable"),
            MetadataScript::Slow(delay, target) => {
                tokio::time::sleep(*delay).await;
                Ok(Some(target.clone()))
            }
        }
    }
}

pub struct ScriptedSearch {
    name: String,
    hits: Vec<(String, String, Option<i32>)>,
    fail: bool,
    calls: AtomicUsize,
}

impl ScriptedSearch {
    /// Hits as (provider id, title, year)
    pub fn with_hits(name: &str, hits: &[(&str, &str, Option<i32>)]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            hits: hits
                .iter()
                .map(|(id, title, year)| (id.to_string(), title.to_string(), *year))
                .collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            hits: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateSearch for ScriptedSearch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        _title: &str,
        _year: Option<i32>,
        _media_type: MediaType,
    ) -> Result<Vec<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("{} returned 500", self.name);
        }
        Ok(self
            .hits
            .iter()
            .map(|(id, title, year)| Candidate::new(&self.name, id, title, *year))
            .collect())
    }
}

/// How an instance answers an extraction request
#[derive(Clone)]
pub enum Behavior {
    Succeed { after: Duration, url: String },
    Fail { after: Duration },
    Hang,
    Panic,
}

impl Behavior {
    pub fn succeed(after_ms: u64, url: &str) -> Self {
        Self::Succeed {
            after: Duration::from_millis(after_ms),
            url: url.to_string(),
        }
    }

    pub fn fail(after_ms: u64) -> Self {
        Self::Fail {
            after: Duration::from_millis(after_ms),
        }
    }
}

pub struct ScriptedBackend {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(behaviors: &[(&str, Behavior)]) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors
                .iter()
                .map(|(id, b)| (id.to_string(), b.clone()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Instance ids in the order they were called
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted-backend"
    }

    async fn resolve_url(
        &self,
        _candidate: &Candidate,
        instance_id: &str,
        _timeout: Duration,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(instance_id.to_string());

        match self.behaviors.get(instance_id) {
            Some(Behavior::Succeed { after, url }) => {
                tokio::time::sleep(*after).await;
                Ok(url.clone())
            }
            Some(Behavior::Fail { after }) => {
                tokio::time::sleep(*after).await;
                anyhow::bail!("{} could not extract", instance_id)
            }
            Some(Behavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                anyhow::bail!("{} hung", instance_id)
            }
            Some(Behavior::Panic) => panic!("{} crashed", instance_id),
            None => anyhow::bail!("unknown instance {}", instance_id),
        }
    }
}
