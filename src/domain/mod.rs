//! Domain types for the trailer resolver.
//!
//! This module contains the core data structures:
//! - Media: identifiers, target metadata, candidates
//! - Stream: resolved streams and extraction attempts
//! - Outcome: the error taxonomy returned to callers

pub mod media;
pub mod outcome;
pub mod stream;

// Re-export commonly used types
pub use media::{
    Candidate, ConfidenceTier, IdentifierError, MediaIdentifier, MediaType, ScoredCandidate,
    TargetMetadata,
};
pub use outcome::{Overloaded, ResolveError};
pub use stream::{AttemptOutcome, ExtractionAttempt, ResolvedStream};
