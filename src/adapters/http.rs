//! HTTP implementations of the collaborator traits.
//!
//! Each speaks a small JSON contract against a configured base URL:
//!
//! - metadata: `GET {base}/{media_type}/{id}[?season=&episode=]` returns a
//!   `TargetMetadata` document, 404 when unknown
//! - search: `GET {base}/search?title=&year=&type=` returns a list of hits
//! - extraction: `POST {instance}/extract` with `{provider, provider_id}`
//!   returns `{url}`

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CandidateSearch, ExtractionBackend, MetadataProvider};
use crate::domain::{Candidate, MediaIdentifier, MediaType, TargetMetadata};

const USER_AGENT: &str = concat!("trailer-resolver/", env!("CARGO_PKG_VERSION"));

/// Shared client, optionally routed through an egress proxy
pub fn build_client(proxy: Option<&str>, request_timeout: Duration) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(request_timeout);

    if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
        let proxy = reqwest::Proxy::all(proxy)
            .with_context(|| format!("Invalid proxy URL '{}'", proxy))?;
        builder = builder.proxy(proxy);
    }

    builder.build().context("Failed to build HTTP client")
}

/// Parse a base URL, ensuring a trailing slash so `join` appends segments
fn parse_base(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    let url = Url::parse(&with_slash).with_context(|| format!("Invalid base URL '{}'", raw))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => anyhow::bail!("Unsupported scheme '{}' in '{}'", other, raw),
    }
}

async fn error_for_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    anyhow::bail!("{} error ({}): {}", what, status, text.trim())
}

/// Metadata lookups over HTTP
pub struct HttpMetadataProvider {
    base: Url,
    client: Client,
}

impl HttpMetadataProvider {
    pub fn new(base_url: &str, client: Client) -> Result<Self> {
        Ok(Self {
            base: parse_base(base_url)?,
            client,
        })
    }

    fn lookup_url(&self, id: &MediaIdentifier) -> Result<Url> {
        let mut url = self
            .base
            .join(&format!("{}/{}", id.media_type, id.external_id))
            .with_context(|| format!("Failed to build metadata URL for {}", id))?;

        if let (Some(season), Some(episode)) = (id.season, id.episode) {
            url.query_pairs_mut()
                .append_pair("season", &season.to_string())
                .append_pair("episode", &episode.to_string());
        }
        Ok(url)
    }
}

#[async_trait]
impl MetadataProvider for HttpMetadataProvider {
    fn name(&self) -> &str {
        "http-metadata"
    }

    async fn lookup(&self, id: &MediaIdentifier) -> Result<Option<TargetMetadata>> {
        let url = self.lookup_url(id)?;
        debug!(url = %url, "Metadata lookup");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach metadata provider")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let metadata = error_for_status(response, "Metadata provider")
            .await?
            .json::<TargetMetadata>()
            .await
            .context("Failed to parse metadata response")?;
        Ok(Some(metadata))
    }
}

/// One hit in a search response
#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
    title: String,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    subtitle: Option<String>,
}

/// Candidate search over HTTP
pub struct HttpCandidateSearch {
    name: String,
    base: Url,
    client: Client,
}

impl HttpCandidateSearch {
    pub fn new(name: impl Into<String>, base_url: &str, client: Client) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            base: parse_base(base_url)?,
            client,
        })
    }

    fn search_url(&self, title: &str, year: Option<i32>, media_type: MediaType) -> Result<Url> {
        let mut url = self
            .base
            .join("search")
            .context("Failed to build search URL")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("title", title);
            if let Some(year) = year {
                query.append_pair("year", &year.to_string());
            }
            query.append_pair("type", media_type.as_str());
        }
        Ok(url)
    }
}

#[async_trait]
impl CandidateSearch for HttpCandidateSearch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        media_type: MediaType,
    ) -> Result<Vec<Candidate>> {
        let url = self.search_url(title, year, media_type)?;
        debug!(provider = %self.name, url = %url, "Candidate search");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to reach search provider '{}'", self.name))?;

        let hits: Vec<SearchHit> = error_for_status(response, &self.name)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse search response from '{}'", self.name))?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let candidate = Candidate::new(&self.name, hit.id, hit.title, hit.year);
                match hit.subtitle {
                    Some(subtitle) => candidate.with_subtitle(subtitle),
                    None => candidate,
                }
            })
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    provider: &'a str,
    provider_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    url: String,
}

/// Extraction over a set of HTTP instances, addressed by id
pub struct HttpExtractionBackend {
    instances: HashMap<String, Url>,
    client: Client,
}

impl HttpExtractionBackend {
    /// `instances` pairs an instance id with its base URL
    pub fn new<I, S>(instances: I, client: Client) -> Result<Self>
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let mut map = HashMap::new();
        for (id, url) in instances {
            let id = id.as_ref().to_string();
            let base = parse_base(url.as_ref())
                .with_context(|| format!("Invalid URL for extraction instance '{}'", id))?;
            if map.insert(id.clone(), base).is_some() {
                anyhow::bail!("Duplicate extraction instance id '{}'", id);
            }
        }
        Ok(Self {
            instances: map,
            client,
        })
    }

    fn extract_url(&self, instance_id: &str) -> Result<Url> {
        let base = self
            .instances
            .get(instance_id)
            .with_context(|| format!("Unknown extraction instance '{}'", instance_id))?;
        base.join("extract")
            .with_context(|| format!("Failed to build extract URL for '{}'", instance_id))
    }
}

#[async_trait]
impl ExtractionBackend for HttpExtractionBackend {
    fn name(&self) -> &str {
        "http-extraction"
    }

    async fn resolve_url(
        &self,
        candidate: &Candidate,
        instance_id: &str,
        timeout: Duration,
    ) -> Result<String> {
        let url = self.extract_url(instance_id)?;

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(&ExtractRequest {
                provider: &candidate.provider,
                provider_id: &candidate.provider_id,
            })
            .send()
            .await
            .with_context(|| format!("Failed to reach extraction instance '{}'", instance_id))?;

        let body: ExtractResponse = error_for_status(response, instance_id)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse response from '{}'", instance_id))?;

        Ok(body.url)
    }
}
