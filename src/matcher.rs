//! Semantic pattern matching with MMR re-ranking and quality filters.

use std::cmp::Ordering;

use crate::backend::{PatternBackend, RetrieveQuery};
use crate::config::MatcherConfig;
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::ranking::apply_mmr;
use crate::scoring::{enrich_pattern_at, now_millis};
use crate::types::{EnrichedPattern, Reliability};

/// Candidate pool size for domain listings
const DOMAIN_POOL_SIZE: usize = 100;

const ANTI_PATTERN_MAX_SUCCESS: f64 = 0.3;
const ANTI_PATTERN_MIN_USAGE: u32 = 3;
const BEST_PRACTICE_MIN_QUALITY: f64 = 0.7;
const BEST_PRACTICE_MIN_USAGE: u32 = 3;
const BEST_PRACTICE_MIN_SUCCESS: f64 = 0.8;

/// What to search for
#[derive(Debug, Clone, Copy)]
pub enum Query<'a> {
    /// Free text, embedded through the matcher's embedder
    Text(&'a str),
    /// A precomputed embedding
    Embedding(&'a [f32]),
}

impl<'a> From<&'a str> for Query<'a> {
    fn from(text: &'a str) -> Self {
        Query::Text(text)
    }
}

impl<'a> From<&'a [f32]> for Query<'a> {
    fn from(embedding: &'a [f32]) -> Self {
        Query::Embedding(embedding)
    }
}

impl<'a> From<&'a Vec<f32>> for Query<'a> {
    fn from(embedding: &'a Vec<f32>) -> Self {
        Query::Embedding(embedding)
    }
}

/// Per-call overrides for [`PatternMatcher::find_similar_patterns`]
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub k: Option<usize>,
    pub use_mmr: Option<bool>,
    pub diversity_weight: Option<f64>,
    pub min_similarity: Option<f64>,
    pub max_patterns: Option<usize>,
    pub domain: Option<String>,
    pub min_confidence: Option<f64>,
}

impl SearchOptions {
    pub fn k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn use_mmr(mut self, use_mmr: bool) -> Self {
        self.use_mmr = Some(use_mmr);
        self
    }

    pub fn diversity_weight(mut self, lambda: f64) -> Self {
        self.diversity_weight = Some(lambda);
        self
    }

    pub fn min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = Some(min_similarity);
        self
    }

    pub fn max_patterns(mut self, max_patterns: usize) -> Self {
        self.max_patterns = Some(max_patterns);
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }
}

/// Quality filters for domain listings
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    pub min_quality: Option<f64>,
    pub min_reliability: Option<Reliability>,
    pub min_usage: Option<u32>,
    pub min_confidence: Option<f64>,
}

impl DomainFilter {
    fn accepts(&self, pattern: &EnrichedPattern) -> bool {
        if self.min_quality.is_some_and(|q| pattern.quality < q) {
            return false;
        }
        if self
            .min_reliability
            .is_some_and(|r| pattern.reliability.score() < r.score())
        {
            return false;
        }
        if self
            .min_usage
            .is_some_and(|u| pattern.record.usage_count < u)
        {
            return false;
        }
        true
    }
}

/// Ranks and enriches patterns served by a [`PatternBackend`]
pub struct PatternMatcher<B> {
    backend: B,
    embedder: Box<dyn Embedder>,
    config: MatcherConfig,
}

impl<B: PatternBackend> PatternMatcher<B> {
    pub fn new(backend: B, embedder: Box<dyn Embedder>, config: MatcherConfig) -> Self {
        Self {
            backend,
            embedder,
            config,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    fn resolve(&self, query: Query<'_>) -> Result<Vec<f32>> {
        match query {
            Query::Text(text) => Ok(self.embedder.embed(text)?),
            Query::Embedding(embedding) => Ok(embedding.to_vec()),
        }
    }

    /// Find the patterns most relevant to `query`.
    ///
    /// Returns at most `k` enriched records above `min_similarity`, in MMR order
    /// when diversity re-ranking kicks in and in similarity order otherwise.
    pub fn find_similar_patterns<'q>(
        &self,
        query: impl Into<Query<'q>>,
        options: &SearchOptions,
    ) -> Result<Vec<EnrichedPattern>> {
        let config = self.config.overlay(options);
        let embedding = self.resolve(query.into())?;

        let retrieve = RetrieveQuery::new(config.max_patterns)
            .domain(options.domain.as_deref())
            .min_confidence(options.min_confidence.unwrap_or(0.0));
        let candidates = self.backend.retrieve(&embedding, &retrieve)?;
        let pool_size = candidates.len();

        let mut patterns: Vec<_> = candidates
            .into_iter()
            .filter(|p| p.similarity >= config.min_similarity)
            .collect();

        let use_mmr = config.use_mmr && patterns.len() > config.k;
        tracing::debug!(
            pool = pool_size,
            above_threshold = patterns.len(),
            k = config.k,
            mmr = use_mmr,
            "ranking candidates"
        );

        if use_mmr {
            patterns = apply_mmr(patterns, config.k, config.diversity_weight);
        } else {
            patterns.truncate(config.k);
        }

        let now = now_millis();
        Ok(patterns
            .into_iter()
            .map(|p| enrich_pattern_at(p, now))
            .collect())
    }

    /// List enriched patterns in `domain`, best quality first.
    ///
    /// The domain name itself is embedded as the query, so this is a nearest
    /// neighbour listing rather than an exhaustive scan.
    pub fn find_by_domain(&self, domain: &str, filter: &DomainFilter) -> Result<Vec<EnrichedPattern>> {
        let embedding = self.embedder.embed(domain)?;

        let retrieve = RetrieveQuery::new(DOMAIN_POOL_SIZE)
            .domain(Some(domain))
            .min_confidence(filter.min_confidence.unwrap_or(0.0));
        let candidates = self.backend.retrieve(&embedding, &retrieve)?;

        let now = now_millis();
        let mut patterns: Vec<_> = candidates
            .into_iter()
            .map(|p| enrich_pattern_at(p, now))
            .filter(|p| filter.accepts(p))
            .collect();

        patterns.sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap_or(Ordering::Equal));
        Ok(patterns)
    }

    /// Frequently used patterns that mostly fail, worst first
    pub fn find_anti_patterns(&self, domain: &str, filter: &DomainFilter) -> Result<Vec<EnrichedPattern>> {
        let mut patterns: Vec<_> = self
            .find_by_domain(domain, filter)?
            .into_iter()
            .filter(|p| {
                p.success_rate < ANTI_PATTERN_MAX_SUCCESS
                    && p.record.usage_count >= ANTI_PATTERN_MIN_USAGE
            })
            .collect();

        patterns.sort_by(|a, b| {
            a.success_rate
                .partial_cmp(&b.success_rate)
                .unwrap_or(Ordering::Equal)
        });
        Ok(patterns)
    }

    /// Proven, high-quality patterns, best first
    pub fn find_best_practices(&self, domain: &str, filter: &DomainFilter) -> Result<Vec<EnrichedPattern>> {
        let filter = DomainFilter {
            min_quality: Some(
                filter
                    .min_quality
                    .map_or(BEST_PRACTICE_MIN_QUALITY, |q| q.max(BEST_PRACTICE_MIN_QUALITY)),
            ),
            min_usage: Some(
                filter
                    .min_usage
                    .map_or(BEST_PRACTICE_MIN_USAGE, |u| u.max(BEST_PRACTICE_MIN_USAGE)),
            ),
            ..filter.clone()
        };

        let mut patterns: Vec<_> = self
            .find_by_domain(domain, &filter)?
            .into_iter()
            .filter(|p| p.success_rate >= BEST_PRACTICE_MIN_SUCCESS)
            .collect();

        patterns.sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap_or(Ordering::Equal));
        Ok(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbedError, LiteEmbedder};
    use crate::error::Error;
    use crate::index::PatternStore;
    use crate::types::{PatternKind, PatternPayload, PatternRecord};
    use proptest::prelude::*;
    use std::cell::RefCell;

    /// Serves a fixed pool the way a vector store would, recording each query
    struct FixedBackend {
        patterns: Vec<PatternRecord>,
        queries: RefCell<Vec<RetrieveQuery>>,
    }

    impl FixedBackend {
        fn new(patterns: Vec<PatternRecord>) -> Self {
            Self {
                patterns,
                queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl PatternBackend for FixedBackend {
        fn retrieve(&self, _embedding: &[f32], query: &RetrieveQuery) -> Result<Vec<PatternRecord>> {
            self.queries.borrow_mut().push(query.clone());

            let mut filtered: Vec<_> = self
                .patterns
                .iter()
                .filter(|p| query.domain.as_deref().map_or(true, |d| p.domain == d))
                .filter(|p| p.confidence >= query.min_confidence)
                .cloned()
                .collect();
            filtered.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
            filtered.truncate(query.k);
            Ok(filtered)
        }
    }

    struct FailingBackend;

    impl PatternBackend for FailingBackend {
        fn retrieve(&self, _embedding: &[f32], _query: &RetrieveQuery) -> Result<Vec<PatternRecord>> {
            Err(Error::NotFound("backend offline".to_string()))
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Server("model not loaded".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn pattern(
        id: &str,
        kind: PatternKind,
        approach: &str,
        embedding: Vec<f32>,
        similarity: f64,
        confidence: f64,
        usage_count: u32,
        success_count: u32,
    ) -> PatternRecord {
        PatternRecord {
            id: id.to_string(),
            domain: "api-optimization".to_string(),
            kind,
            pattern: PatternPayload {
                approach: Some(approach.to_string()),
                ..Default::default()
            },
            embedding: Some(embedding),
            similarity,
            confidence,
            usage_count,
            success_count,
            created_at: 0,
            last_used: 0,
        }
    }

    fn fixture() -> Vec<PatternRecord> {
        vec![
            pattern("pat_1", PatternKind::Experience, "JWT auth", vec![1.0, 0.0, 0.0, 0.0], 0.95, 0.9, 10, 9),
            pattern("pat_2", PatternKind::Experience, "OAuth2", vec![0.0, 1.0, 0.0, 0.0], 0.92, 0.85, 8, 7),
            pattern("pat_3", PatternKind::Experience, "API key", vec![0.0, 0.0, 1.0, 0.0], 0.88, 0.4, 5, 1),
            pattern(
                "pat_4",
                PatternKind::BestPractice,
                "JWT with refresh tokens",
                vec![0.99, 0.05, 0.0, 0.0],
                0.96,
                0.95,
                20,
                19,
            ),
            pattern(
                "pat_5",
                PatternKind::AntiPattern,
                "Plain text passwords",
                vec![0.0, 0.0, 0.0, 1.0],
                0.65,
                0.2,
                3,
                0,
            ),
        ]
    }

    fn matcher(patterns: Vec<PatternRecord>) -> PatternMatcher<FixedBackend> {
        PatternMatcher::new(
            FixedBackend::new(patterns),
            Box::new(LiteEmbedder::with_dim(4)),
            MatcherConfig::default(),
        )
    }

    fn ids(patterns: &[EnrichedPattern]) -> Vec<&str> {
        patterns.iter().map(|p| p.record.id.as_str()).collect()
    }

    #[test]
    fn test_basic_retrieval() {
        let m = matcher(fixture());
        let query = vec![0.5f32; 4];
        let results = m
            .find_similar_patterns(&query, &SearchOptions::default().domain("api-optimization").k(5))
            .unwrap();

        assert!(!results.is_empty());
        assert!(results.len() <= 5);
        for p in &results {
            assert_eq!(p.record.domain, "api-optimization");
            assert!((0.0..=1.0).contains(&p.quality));
        }
    }

    #[test]
    fn test_passes_filters_to_backend() {
        let m = matcher(fixture());
        m.find_similar_patterns(
            "jwt auth",
            &SearchOptions::default()
                .domain("api-optimization")
                .min_confidence(0.5)
                .max_patterns(40),
        )
        .unwrap();

        let queries = m.backend().queries.borrow();
        assert_eq!(
            queries[0],
            RetrieveQuery {
                domain: Some("api-optimization".to_string()),
                k: 40,
                min_confidence: 0.5,
            }
        );
    }

    #[test]
    fn test_min_similarity_filter() {
        let m = matcher(fixture());
        let results = m
            .find_similar_patterns("auth", &SearchOptions::default().min_similarity(0.9))
            .unwrap();

        assert_eq!(ids(&results), vec!["pat_4", "pat_1", "pat_2"]);
        assert!(results.iter().all(|p| p.record.similarity >= 0.9));
    }

    #[test]
    fn test_without_mmr_keeps_similarity_order() {
        let m = matcher(fixture());
        let results = m
            .find_similar_patterns("auth", &SearchOptions::default().k(3).use_mmr(false))
            .unwrap();

        assert_eq!(ids(&results), vec!["pat_4", "pat_1", "pat_2"]);
    }

    #[test]
    fn test_mmr_changes_order_for_near_duplicates() {
        let m = matcher(fixture());
        let with_mmr = m
            .find_similar_patterns("auth", &SearchOptions::default().k(3).diversity_weight(0.5))
            .unwrap();
        let without_mmr = m
            .find_similar_patterns("auth", &SearchOptions::default().k(3).use_mmr(false))
            .unwrap();

        // pat_1 nearly duplicates pat_4, so MMR passes over it
        assert_eq!(ids(&with_mmr), vec!["pat_4", "pat_3", "pat_2"]);
        assert_ne!(ids(&with_mmr), ids(&without_mmr));
    }

    #[test]
    fn test_mmr_picks_distinct_candidate() {
        let a = pattern("A", PatternKind::Experience, "a", vec![1.0, 0.0, 0.0], 0.95, 0.9, 1, 1);
        let b = pattern("B", PatternKind::Experience, "b", vec![0.999, 0.02, 0.0], 0.94, 0.9, 1, 1);
        let c = pattern("C", PatternKind::Experience, "c", vec![0.0, 0.0, 1.0], 0.80, 0.9, 1, 1);
        let m = matcher(vec![a, b, c]);

        let options = SearchOptions::default().k(2).diversity_weight(0.3);
        let query = vec![1.0f32, 0.0, 0.0];
        let diverse = m.find_similar_patterns(&query, &options).unwrap();
        assert_eq!(ids(&diverse), vec!["A", "C"]);

        let plain = m
            .find_similar_patterns(&query, &options.clone().use_mmr(false))
            .unwrap();
        assert_eq!(ids(&plain), vec!["A", "B"]);
    }

    #[test]
    fn test_mmr_skipped_when_pool_fits() {
        let m = matcher(fixture());
        let results = m
            .find_similar_patterns("auth", &SearchOptions::default().k(10).diversity_weight(0.0))
            .unwrap();

        // Five candidates, k = 10: plain similarity order even with λ = 0
        assert_eq!(ids(&results), vec!["pat_4", "pat_1", "pat_2", "pat_3", "pat_5"]);
    }

    #[test]
    fn test_reliability_classification() {
        let m = matcher(fixture());
        let results = m
            .find_similar_patterns("auth", &SearchOptions::default().use_mmr(false))
            .unwrap();

        for p in &results {
            match p.record.kind {
                PatternKind::BestPractice => assert_eq!(p.reliability, Reliability::High),
                PatternKind::AntiPattern => {
                    assert!(matches!(p.reliability, Reliability::Low | Reliability::Untested))
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_empty_pool_returns_empty() {
        let m = matcher(Vec::new());
        let results = m.find_similar_patterns("anything", &SearchOptions::default()).unwrap();
        assert!(results.is_empty());

        let results = m.find_by_domain("debugging", &DomainFilter::default()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_backend_failure_propagates() {
        let m = PatternMatcher::new(
            FailingBackend,
            Box::new(LiteEmbedder::new()),
            MatcherConfig::default(),
        );
        let err = m
            .find_similar_patterns("auth", &SearchOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(ref msg) if msg == "backend offline"));
        assert!(m.find_by_domain("auth", &DomainFilter::default()).is_err());
    }

    #[test]
    fn test_embedder_failure_propagates() {
        let m = PatternMatcher::new(
            FixedBackend::new(fixture()),
            Box::new(FailingEmbedder),
            MatcherConfig::default(),
        );
        let err = m
            .find_similar_patterns("auth", &SearchOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));

        // Precomputed embeddings never touch the embedder
        let query = vec![1.0f32, 0.0, 0.0, 0.0];
        assert!(m.find_similar_patterns(&query, &SearchOptions::default()).is_ok());
    }

    #[test]
    fn test_find_by_domain_sorts_and_filters() {
        let m = matcher(fixture());
        let results = m
            .find_by_domain(
                "api-optimization",
                &DomainFilter {
                    min_quality: Some(0.5),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(ids(&results), vec!["pat_4", "pat_1", "pat_2"]);
        assert!(results.windows(2).all(|w| w[0].quality >= w[1].quality));

        let queries = m.backend().queries.borrow();
        assert_eq!(queries[0].k, DOMAIN_POOL_SIZE);
        assert_eq!(queries[0].domain.as_deref(), Some("api-optimization"));
    }

    #[test]
    fn test_find_by_domain_reliability_and_usage() {
        let m = matcher(fixture());
        let high = m
            .find_by_domain(
                "api-optimization",
                &DomainFilter {
                    min_reliability: Some(Reliability::High),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(ids(&high), vec!["pat_4", "pat_1", "pat_2"]);

        let heavy = m
            .find_by_domain(
                "api-optimization",
                &DomainFilter {
                    min_usage: Some(10),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(ids(&heavy), vec!["pat_4", "pat_1"]);

        let other = m.find_by_domain("debugging", &DomainFilter::default()).unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_find_anti_patterns() {
        let m = matcher(fixture());
        let anti = m
            .find_anti_patterns("api-optimization", &DomainFilter::default())
            .unwrap();

        assert_eq!(ids(&anti), vec!["pat_5", "pat_3"]);
        for p in &anti {
            assert!(p.success_rate < 0.3);
            assert!(p.record.usage_count >= 3);
        }
    }

    #[test]
    fn test_find_best_practices() {
        let m = matcher(fixture());
        let best = m
            .find_best_practices("api-optimization", &DomainFilter::default())
            .unwrap();

        assert_eq!(ids(&best), vec!["pat_4", "pat_1", "pat_2"]);
        for p in &best {
            assert!(p.success_rate >= 0.8);
            assert!(p.quality >= 0.7);
        }

        // A looser caller filter cannot drop below the best-practice floor
        let loose = DomainFilter {
            min_quality: Some(0.1),
            min_usage: Some(1),
            ..Default::default()
        };
        let best = m.find_best_practices("api-optimization", &loose).unwrap();
        assert_eq!(ids(&best), vec!["pat_4", "pat_1", "pat_2"]);

        let strict = DomainFilter {
            min_usage: Some(15),
            ..Default::default()
        };
        let best = m.find_best_practices("api-optimization", &strict).unwrap();
        assert_eq!(ids(&best), vec!["pat_4"]);
    }

    #[test]
    fn test_against_sqlite_store() {
        let store = PatternStore::in_memory().unwrap();
        let embedder = LiteEmbedder::new();
        let texts = [
            ("exp_1", "memory leak in event listeners"),
            ("exp_2", "memory leak in subscriptions"),
            ("exp_3", "flaky integration test timing"),
        ];
        for (id, text) in texts {
            let mut record = pattern(id, PatternKind::Experience, text, embedder.embed(text).unwrap(), 0.0, 0.8, 1, 1);
            record.domain = "debugging".to_string();
            store.insert(&record).unwrap();
        }

        let m = PatternMatcher::new(store, Box::new(LiteEmbedder::new()), MatcherConfig::default());
        let results = m
            .find_similar_patterns(
                "memory leak in event listeners",
                &SearchOptions::default().domain("debugging").min_similarity(0.0).k(2),
            )
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record.id, "exp_1");
        assert!(results[0].record.similarity > 0.99);
    }

    proptest! {
        #[test]
        fn results_respect_k_and_threshold(
            sims in prop::collection::vec(0.0f64..1.0, 0..40),
            k in 1usize..15,
            min_similarity in 0.0f64..1.0,
            use_mmr in any::<bool>(),
            lambda in 0.0f64..=1.0,
        ) {
            let pool: Vec<PatternRecord> = sims
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let angle = i as f32;
                    pattern(
                        &format!("p{}", i),
                        PatternKind::Experience,
                        "x",
                        vec![angle.cos(), angle.sin()],
                        *s,
                        0.5,
                        i as u32,
                        0,
                    )
                })
                .collect();
            let above = sims.iter().filter(|s| **s >= min_similarity).count();

            let m = matcher(pool);
            let options = SearchOptions::default()
                .k(k)
                .min_similarity(min_similarity)
                .use_mmr(use_mmr)
                .diversity_weight(lambda);
            let results = m.find_similar_patterns(&vec![1.0f32, 0.0], &options).unwrap();

            prop_assert!(results.len() <= k);
            prop_assert_eq!(results.len(), k.min(above));
            prop_assert!(results.iter().all(|p| p.record.similarity >= min_similarity));

            let mut unique: Vec<_> = results.iter().map(|p| p.record.id.clone()).collect();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(unique.len(), results.len());
        }
    }
}
