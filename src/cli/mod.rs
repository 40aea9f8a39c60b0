//! Command-line interface for trailer-resolver.
//!
//! Provides commands for running the HTTP service, resolving a single
//! identifier and inspecting the resolved configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::adapters::http::build_client;
use crate::adapters::{
    CandidateSearch, HttpCandidateSearch, HttpExtractionBackend, HttpMetadataProvider,
};
use crate::config::{self, ConfigFile};
use crate::core::Resolver;
use crate::domain::{MediaIdentifier, MediaType};

pub mod serve;

/// trailer-resolver - Resolve catalog identifiers to playable trailer streams
#[derive(Parser, Debug)]
#[command(name = "trailer-resolver")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP service
    Serve {
        /// Address to bind to (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Resolve one identifier and print the result as JSON
    Resolve {
        /// Media type (movie or series)
        media_type: MediaType,

        /// External id, optionally with season and episode (`tt0903747:2:5`)
        id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Error line printed by `resolve`
#[derive(Serialize)]
struct ResolveFailure<'a> {
    outcome: &'a str,
    message: String,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve { bind } => run_serve(bind).await,
            Commands::Resolve { media_type, id } => resolve_once(media_type, &id).await,
            Commands::Config => show_config(),
        }
    }
}

/// Wire HTTP collaborators from configuration into a resolver
pub fn build_resolver(settings: &ConfigFile) -> Result<Resolver> {
    let providers = &settings.providers;
    let client = build_client(providers.proxy.as_deref(), providers.request_timeout())?;

    let metadata_url = providers
        .metadata_url
        .as_deref()
        .context("providers.metadata_url is not configured")?;
    let metadata = Arc::new(HttpMetadataProvider::new(metadata_url, client.clone())?);

    let backend = Arc::new(HttpExtractionBackend::new(
        providers
            .backends
            .iter()
            .map(|b| (b.id.as_str(), b.url.as_str())),
        client.clone(),
    )?);

    let mut builder = Resolver::builder(metadata, backend)
        .instances(providers.backends.iter().map(|b| b.id.clone()))
        .budget(settings.budget.clone())
        .admission(settings.admission.clone())
        .cache_config(settings.cache.clone())
        .health(settings.health.clone())
        .scoring(settings.scoring.clone());

    for search in &providers.search {
        let provider: Arc<dyn CandidateSearch> =
            Arc::new(HttpCandidateSearch::new(&search.name, &search.url, client.clone())?);
        builder = builder.search(provider);
    }

    builder.build()
}

async fn run_serve(bind: Option<String>) -> Result<()> {
    let resolved = config::config()?;
    let addr = match bind {
        Some(bind) => bind
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", bind))?,
        None => resolved.settings.bind_addr()?,
    };

    let resolver = build_resolver(&resolved.settings)?;
    serve::run(resolver, addr).await
}

async fn resolve_once(media_type: MediaType, raw_id: &str) -> Result<()> {
    let resolved = config::config()?;
    let id = MediaIdentifier::parse(media_type, raw_id)?;
    let resolver = build_resolver(&resolved.settings)?;

    match resolver.resolve(&id).await {
        Ok(stream) => {
            println!("{}", serde_json::to_string_pretty(&stream)?);
            Ok(())
        }
        Err(e) => {
            let failure = ResolveFailure {
                outcome: e.kind(),
                message: e.to_string(),
            };
            println!("{}", serde_json::to_string_pretty(&failure)?);
            Err(e).with_context(|| format!("Failed to resolve {}", id))
        }
    }
}

fn show_config() -> Result<()> {
    let resolved = config::config()?;

    match &resolved.config_file {
        Some(path) => println!("# Config file: {}", path.display()),
        None => println!("# Config file: (none, using defaults)"),
    }
    print!("{}", serde_yaml::to_string(&resolved.settings)?);
    Ok(())
}
