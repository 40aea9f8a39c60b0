//! Resolved streams and extraction attempt records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A direct, playable trailer URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStream {
    /// Playable URL
    pub url: String,

    /// Extraction instance that produced the URL
    pub instance_id: String,

    /// Search provider of the accepted candidate
    pub provider: String,

    /// Provider-native id of the accepted candidate
    pub provider_id: String,

    /// When the URL was extracted
    pub resolved_at: DateTime<Utc>,

    /// When the cached copy stops being served (set by the cache)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ResolvedStream {
    pub fn new(
        url: impl Into<String>,
        instance_id: impl Into<String>,
        provider: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            instance_id: instance_id.into(),
            provider: provider.into(),
            provider_id: provider_id.into(),
            resolved_at: Utc::now(),
            expires_at: None,
        }
    }
}

/// How a single extraction attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One try against one extraction instance. Ephemeral; logged and fed to health.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionAttempt {
    pub instance_id: String,

    pub started_at: DateTime<Utc>,

    pub outcome: AttemptOutcome,

    #[serde(with = "duration_ms")]
    pub latency: Duration,

    /// Error text for failed attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
