//! Pattern memory for AI agents.
//!
//! Patterns are retrieved by embedding similarity, re-ranked with Maximal
//! Marginal Relevance for diversity, and enriched with quality and
//! reliability scores derived from their usage history.

pub mod backend;
pub mod bank;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod logging;
pub mod matcher;
pub mod ranking;
pub mod scoring;
pub mod types;

pub use backend::{PatternBackend, RetrieveQuery};
pub use error::{Error, Result};
pub use matcher::{DomainFilter, PatternMatcher, Query, SearchOptions};
pub use types::{EnrichedPattern, PatternKind, PatternPayload, PatternRecord, Reliability};
