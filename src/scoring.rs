//! Derived pattern metadata: success rate, quality, reliability.
//!
//! Everything here is a pure function of the record and the instant passed in.

use crate::types::{EnrichedPattern, PatternRecord, Reliability};

const SUCCESS_WEIGHT: f64 = 0.5;
const CONFIDENCE_WEIGHT: f64 = 0.3;
const USAGE_WEIGHT: f64 = 0.2;

/// Usage count at which the usage term of the quality score saturates
const USAGE_SATURATION: f64 = 10.0;

/// Fraction of uses that succeeded, 0 for untested patterns
pub fn success_rate(record: &PatternRecord) -> f64 {
    if record.usage_count > 0 {
        record.success_count as f64 / record.usage_count as f64
    } else {
        0.0
    }
}

/// Weighted composite of success rate, confidence and usage volume
pub fn quality(record: &PatternRecord) -> f64 {
    let usage_score = (record.usage_count as f64 / USAGE_SATURATION).min(1.0);

    SUCCESS_WEIGHT * success_rate(record)
        + CONFIDENCE_WEIGHT * record.confidence
        + USAGE_WEIGHT * usage_score
}

/// Bucket a pattern by quality and usage. First matching tier wins.
pub fn reliability(quality: f64, usage_count: u32) -> Reliability {
    if quality >= 0.8 && usage_count >= 5 {
        Reliability::High
    } else if quality >= 0.6 && usage_count >= 3 {
        Reliability::Medium
    } else if usage_count >= 1 {
        Reliability::Low
    } else {
        Reliability::Untested
    }
}

/// Enrich a record relative to `now` (epoch milliseconds)
pub fn enrich_pattern_at(record: PatternRecord, now: i64) -> EnrichedPattern {
    let success_rate = success_rate(&record);
    let quality = quality(&record);
    let reliability = reliability(quality, record.usage_count);

    EnrichedPattern {
        success_rate,
        quality,
        age: now.saturating_sub(record.created_at),
        freshness: now.saturating_sub(record.last_used),
        reliability,
        record,
    }
}

/// Enrich a record relative to the current wall clock
pub fn enrich_pattern(record: PatternRecord) -> EnrichedPattern {
    enrich_pattern_at(record, now_millis())
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
