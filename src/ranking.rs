//! Diversity re-ranking and clustering over pattern records.
//!
//! Functions are generic over anything that can be viewed as a
//! [`PatternRecord`], so they work on raw and enriched records alike.

use serde::Serialize;
use std::collections::HashMap;

use crate::embeddings::cosine_similarity;
use crate::scoring;
use crate::types::PatternRecord;

/// Default similarity threshold for [`cluster_patterns`]
pub const DEFAULT_CLUSTER_THRESHOLD: f64 = 0.7;

/// Similarity between two patterns.
///
/// Cosine similarity when both carry embeddings, otherwise a coarse
/// domain/type/approach heuristic in [0, 1].
pub fn pattern_similarity(a: &PatternRecord, b: &PatternRecord) -> f64 {
    if let (Some(ea), Some(eb)) = (&a.embedding, &b.embedding) {
        return cosine_similarity(ea, eb);
    }

    let mut similarity = 0.0;
    if a.domain == b.domain {
        similarity += 0.5;
    }
    if a.kind == b.kind {
        similarity += 0.3;
    }
    // Two missing approaches count as a match
    if a.pattern.approach == b.pattern.approach {
        similarity += 0.2;
    }
    similarity
}

/// Greedy Maximal Marginal Relevance selection.
///
/// `patterns` must be sorted by descending query similarity. `lambda` weighs
/// relevance against redundancy: 1.0 is pure relevance, 0.0 pure diversity.
/// Ties go to the earliest candidate.
pub fn apply_mmr<P>(patterns: Vec<P>, k: usize, lambda: f64) -> Vec<P>
where
    P: AsRef<PatternRecord>,
{
    let mut remaining = patterns;
    let mut selected: Vec<P> = Vec::with_capacity(k.min(remaining.len()));

    if k == 0 || remaining.is_empty() {
        return selected;
    }

    selected.push(remaining.remove(0));

    while selected.len() < k && !remaining.is_empty() {
        let mut best: Option<(usize, f64)> = None;

        for (i, candidate) in remaining.iter().enumerate() {
            let candidate = candidate.as_ref();
            let redundancy = selected
                .iter()
                .map(|s| pattern_similarity(candidate, s.as_ref()))
                .fold(0.0, f64::max);

            let score = lambda * candidate.similarity - (1.0 - lambda) * redundancy;

            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((i, score));
            }
        }

        match best {
            Some((index, _)) => selected.push(remaining.remove(index)),
            // Only reachable with NaN scores
            None => break,
        }
    }

    selected
}

/// Single-pass greedy clustering.
///
/// Each unassigned pattern seeds a cluster and absorbs every later unassigned
/// pattern at least `threshold` similar to the seed. O(n²), meant for pools of
/// a hundred or so.
pub fn cluster_patterns<P>(patterns: &[P], threshold: f64) -> Vec<Vec<P>>
where
    P: AsRef<PatternRecord> + Clone,
{
    let mut clusters = Vec::new();
    let mut assigned = vec![false; patterns.len()];

    for i in 0..patterns.len() {
        if assigned[i] {
            continue;
        }

        let seed = patterns[i].as_ref();
        let mut cluster = vec![patterns[i].clone()];
        assigned[i] = true;

        for j in (i + 1)..patterns.len() {
            if assigned[j] {
                continue;
            }
            if pattern_similarity(seed, patterns[j].as_ref()) >= threshold {
                cluster.push(patterns[j].clone());
                assigned[j] = true;
            }
        }

        clusters.push(cluster);
    }

    clusters
}

/// Aggregate view of a cluster, used when distilling a group of experiences
/// into a higher-level pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub size: usize,
    /// Most common domain, earliest wins on ties
    pub domain: String,
    /// Mean success rate over members that have been used at least once
    pub success_rate: f64,
    pub avg_confidence: f64,
    pub evidence: Vec<String>,
}

pub fn summarize_cluster<P>(cluster: &[P]) -> Option<ClusterSummary>
where
    P: AsRef<PatternRecord>,
{
    if cluster.is_empty() {
        return None;
    }

    let records: Vec<&PatternRecord> = cluster.iter().map(|p| p.as_ref()).collect();

    let mut domain_counts: HashMap<&str, usize> = HashMap::new();
    for r in &records {
        *domain_counts.entry(r.domain.as_str()).or_insert(0) += 1;
    }
    let top = domain_counts.values().copied().max().unwrap_or(0);
    let domain = records
        .iter()
        .find(|r| domain_counts.get(r.domain.as_str()) == Some(&top))
        .map(|r| r.domain.clone())
        .unwrap_or_default();

    let used: Vec<f64> = records
        .iter()
        .filter(|r| r.usage_count > 0)
        .map(|r| scoring::success_rate(r))
        .collect();
    let success_rate = if used.is_empty() {
        0.0
    } else {
        used.iter().sum::<f64>() / used.len() as f64
    };

    let avg_confidence = records.iter().map(|r| r.confidence).sum::<f64>() / records.len() as f64;

    Some(ClusterSummary {
        size: records.len(),
        domain,
        success_rate,
        avg_confidence,
        evidence: records.iter().map(|r| r.id.clone()).collect(),
    })
}
