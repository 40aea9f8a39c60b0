//! Media identifiers, target metadata and search candidates.
//!
//! A request starts as a [`MediaIdentifier`]; the metadata provider turns it
//! into [`TargetMetadata`]; search providers return raw [`Candidate`]s that the
//! scoring engine ranks into a [`ScoredCandidate`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of catalog item being resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    Series,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "series",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "movie" => Ok(Self::Movie),
            "series" | "tv" | "show" => Ok(Self::Series),
            other => Err(IdentifierError::UnknownMediaType(other.to_string())),
        }
    }
}

/// Errors raised while parsing an inbound identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("Unknown media type: {0}")]
    UnknownMediaType(String),

    #[error("Identifier is empty")]
    Empty,

    #[error("Invalid episode reference in '{0}'")]
    InvalidEpisode(String),
}

/// Identifier of the item a trailer is requested for.
///
/// Constructed once per request and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaIdentifier {
    /// External catalog id (e.g. `tt0111161`)
    pub external_id: String,

    pub media_type: MediaType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
}

impl MediaIdentifier {
    /// Identifier for a movie
    pub fn movie(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            media_type: MediaType::Movie,
            season: None,
            episode: None,
        }
    }

    /// Identifier for a whole series
    pub fn series(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            media_type: MediaType::Series,
            season: None,
            episode: None,
        }
    }

    /// Narrow a series identifier to a single episode
    pub fn with_episode(mut self, season: u32, episode: u32) -> Self {
        self.season = Some(season);
        self.episode = Some(episode);
        self
    }

    /// Parse the add-on form `<id>` or `<id>:<season>:<episode>`
    pub fn parse(media_type: MediaType, raw: &str) -> Result<Self, IdentifierError> {
        let raw = raw.trim();
        let mut parts = raw.split(':');
        let external_id = parts.next().unwrap_or_default().trim();
        if external_id.is_empty() {
            return Err(IdentifierError::Empty);
        }

        let id = Self {
            external_id: external_id.to_string(),
            media_type,
            season: None,
            episode: None,
        };

        match (parts.next(), parts.next(), parts.next()) {
            (None, _, _) => Ok(id),
            (Some(season), Some(episode), None) => {
                let season = season
                    .parse()
                    .map_err(|_| IdentifierError::InvalidEpisode(raw.to_string()))?;
                let episode = episode
                    .parse()
                    .map_err(|_| IdentifierError::InvalidEpisode(raw.to_string()))?;
                Ok(id.with_episode(season, episode))
            }
            _ => Err(IdentifierError::InvalidEpisode(raw.to_string())),
        }
    }

    /// Normalized cache key: identifier plus episode variant
    pub fn cache_key(&self) -> String {
        let id = self.external_id.trim().to_ascii_lowercase();
        match (self.season, self.episode) {
            (Some(season), Some(episode)) => {
                format!("{}:{}:s{}e{}", self.media_type, id, season, episode)
            }
            _ => format!("{}:{}", self.media_type, id),
        }
    }
}

impl fmt::Display for MediaIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.media_type, self.external_id)?;
        if let (Some(season), Some(episode)) = (self.season, self.episode) {
            write!(f, ":{}:{}", season, episode)?;
        }
        Ok(())
    }
}

/// What the metadata provider knows about the requested item.
///
/// Read-only input to scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMetadata {
    /// Canonical title
    pub title: String,

    /// Alternative titles (localized, original-language, etc.)
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Release year, if known
    #[serde(default)]
    pub year: Option<i32>,

    pub media_type: MediaType,

    /// Ids of this item in candidate providers (provider name -> native id)
    #[serde(default)]
    pub known_ids: BTreeMap<String, String>,
}

impl TargetMetadata {
    pub fn new(title: impl Into<String>, year: Option<i32>, media_type: MediaType) -> Self {
        Self {
            title: title.into(),
            aliases: Vec::new(),
            year,
            media_type,
            known_ids: BTreeMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_known_id(mut self, provider: impl Into<String>, id: impl Into<String>) -> Self {
        self.known_ids.insert(provider.into(), id.into());
        self
    }

    /// Title followed by aliases
    pub fn titles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.title.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// A provider-sourced trailer reference not yet verified as correct
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// Search provider that produced this candidate
    pub provider: String,

    /// Provider-native id (video id, catalog id, ...)
    pub provider_id: String,

    /// Raw title as reported by the provider
    pub title: String,

    #[serde(default)]
    pub year: Option<i32>,

    /// Subtitle fragment, when the provider reports it separately
    #[serde(default)]
    pub subtitle: Option<String>,
}

impl Candidate {
    pub fn new(
        provider: impl Into<String>,
        provider_id: impl Into<String>,
        title: impl Into<String>,
        year: Option<i32>,
    ) -> Self {
        Self {
            provider: provider.into(),
            provider_id: provider_id.into(),
            title: title.into(),
            year,
            subtitle: None,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }
}

/// Confidence classification of a composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

/// A candidate with its composite score. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,

    /// Composite score in [0, 1]
    pub score: f64,

    pub tier: ConfidenceTier,

    /// Absolute year difference, `None` when either year is unknown
    pub year_distance: Option<u32>,

    /// Penalty applied for an unmatched subtitle (0 when none)
    pub subtitle_penalty: f64,
}
