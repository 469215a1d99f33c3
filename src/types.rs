use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Variant tag of a pattern record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PatternKind {
    Experience,
    Trajectory,
    DistilledPattern,
    BestPractice,
    AntiPattern,
    /// Caller-defined extension
    Other(String),
}

impl PatternKind {
    pub fn as_str(&self) -> &str {
        match self {
            PatternKind::Experience => "experience",
            PatternKind::Trajectory => "trajectory",
            PatternKind::DistilledPattern => "distilled-pattern",
            PatternKind::BestPractice => "best-practice",
            PatternKind::AntiPattern => "anti-pattern",
            PatternKind::Other(s) => s,
        }
    }

    /// Short prefix used when minting record ids
    pub fn id_prefix(&self) -> &str {
        match self {
            PatternKind::Experience => "exp",
            PatternKind::Trajectory => "traj",
            PatternKind::DistilledPattern => "dist",
            PatternKind::BestPractice => "best",
            PatternKind::AntiPattern => "anti",
            PatternKind::Other(_) => "pat",
        }
    }
}

impl From<&str> for PatternKind {
    fn from(s: &str) -> Self {
        match s {
            "experience" => PatternKind::Experience,
            "trajectory" => PatternKind::Trajectory,
            "distilled-pattern" => PatternKind::DistilledPattern,
            "best-practice" => PatternKind::BestPractice,
            "anti-pattern" => PatternKind::AntiPattern,
            other => PatternKind::Other(other.to_string()),
        }
    }
}

impl From<String> for PatternKind {
    fn from(s: String) -> Self {
        PatternKind::from(s.as_str())
    }
}

impl From<PatternKind> for String {
    fn from(kind: PatternKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form pattern payload. Known fields are typed, everything else is kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approach: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A pattern as returned by a retrieval backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub id: String,
    pub domain: String,
    #[serde(rename = "type")]
    pub kind: PatternKind,
    #[serde(default)]
    pub pattern: PatternPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Relevance to the active query, populated by the backend
    #[serde(default)]
    pub similarity: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub success_count: u32,
    /// Epoch milliseconds
    #[serde(default)]
    pub created_at: i64,
    /// Epoch milliseconds
    #[serde(default)]
    pub last_used: i64,
}

impl AsRef<PatternRecord> for PatternRecord {
    fn as_ref(&self) -> &PatternRecord {
        self
    }
}

/// Coarse reliability bucket. Variants are ordered from least to most reliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    Untested,
    Low,
    Medium,
    High,
}

impl Reliability {
    /// Ordinal score: high=3, medium=2, low=1, untested=0
    pub fn score(self) -> u8 {
        match self {
            Reliability::Untested => 0,
            Reliability::Low => 1,
            Reliability::Medium => 2,
            Reliability::High => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Reliability::Untested => "untested",
            Reliability::Low => "low",
            Reliability::Medium => "medium",
            Reliability::High => "high",
        }
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reliability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Reliability::High),
            "medium" => Ok(Reliability::Medium),
            "low" => Ok(Reliability::Low),
            "untested" => Ok(Reliability::Untested),
            other => Err(format!("unknown reliability: {}", other)),
        }
    }
}

/// A pattern record plus derived metadata. Recomputed on every call, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPattern {
    #[serde(flatten)]
    pub record: PatternRecord,
    pub success_rate: f64,
    pub quality: f64,
    /// Milliseconds since creation
    pub age: i64,
    /// Milliseconds since last use
    pub freshness: i64,
    pub reliability: Reliability,
}

impl AsRef<PatternRecord> for EnrichedPattern {
    fn as_ref(&self) -> &PatternRecord {
        &self.record
    }
}

/// Statistics about the pattern store
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_patterns: usize,
    pub by_domain: HashMap<String, usize>,
    pub by_kind: HashMap<String, usize>,
    pub avg_confidence: f64,
    pub total_usage: u64,
    pub total_successes: u64,
}
