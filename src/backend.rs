use crate::error::Result;
use crate::types::PatternRecord;

/// Filters passed to a retrieval backend
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveQuery {
    pub domain: Option<String>,
    /// Maximum number of records to return
    pub k: usize,
    pub min_confidence: f64,
}

impl RetrieveQuery {
    pub fn new(k: usize) -> Self {
        Self {
            domain: None,
            k,
            min_confidence: 0.0,
        }
    }

    pub fn domain(mut self, domain: Option<&str>) -> Self {
        self.domain = domain.map(str::to_string);
        self
    }

    pub fn min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

/// Source of candidate patterns for the matcher.
///
/// Implementations return at most `query.k` records, sorted by descending
/// `similarity` to `embedding`, with `similarity` populated on each.
pub trait PatternBackend {
    fn retrieve(&self, embedding: &[f32], query: &RetrieveQuery) -> Result<Vec<PatternRecord>>;
}

impl<B: PatternBackend + ?Sized> PatternBackend for &B {
    fn retrieve(&self, embedding: &[f32], query: &RetrieveQuery) -> Result<Vec<PatternRecord>> {
        (**self).retrieve(embedding, query)
    }
}

impl<B: PatternBackend + ?Sized> PatternBackend for Box<B> {
    fn retrieve(&self, embedding: &[f32], query: &RetrieveQuery) -> Result<Vec<PatternRecord>> {
        (**self).retrieve(embedding, query)
    }
}
