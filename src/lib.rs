//! trailer-resolver - Resolve catalog identifiers to playable trailer streams
//!
//! Given a movie or series identifier, the resolver looks up its metadata,
//! searches trailer providers for candidates, picks the best match and asks
//! a pool of extraction instances for a direct stream URL.
//!
//! # Architecture
//!
//! - Admission bounds concurrent work and sheds load beyond a bounded queue
//! - The resolution cache collapses concurrent requests for the same item
//! - Extraction falls back across instances ordered by their recent health
//! - Every request runs under a budget that ends before the caller gives up
//!
//! # Modules
//!
//! - `adapters`: Metadata, search and extraction collaborators (HTTP)
//! - `core`: Scoring, extraction chain, health, admission, cache, resolver
//! - `domain`: Data structures (MediaIdentifier, Candidate, ResolvedStream)
//! - `cli`: Command-line interface and HTTP service
//!
//! # Usage
//!
//! ```bash
//! # Run the HTTP service
//! trailer-resolver serve
//!
//! # Resolve one identifier
//! trailer-resolver resolve movie tt0113277
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{Resolver, ResolverBuilder, ResolverStats};
pub use domain::{MediaIdentifier, MediaType, ResolveError, ResolvedStream};
