use crate::backend::{PatternBackend, RetrieveQuery};
use crate::embeddings::cosine_similarity;
use crate::error::{Error, Result};
use crate::types::{PatternKind, PatternRecord, StoreStats};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::cmp::Ordering;
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS patterns (
    id TEXT PRIMARY KEY,
    domain TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    embedding BLOB,
    confidence REAL NOT NULL DEFAULT 0.5,
    usage_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    last_used INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_patterns_domain ON patterns(domain);
"#;

const COLUMNS: &str =
    "id, domain, kind, payload, embedding, confidence, usage_count, success_count, created_at, last_used";

/// Pattern store backed by SQLite
pub struct PatternStore {
    conn: Connection,
}

impl PatternStore {
    /// Open or create the pattern database
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // -------------------------------------------------------------------------
    // Embedding serialization
    // -------------------------------------------------------------------------

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn read_record(row: &Row<'_>) -> rusqlite::Result<PatternRecord> {
        let kind: String = row.get(2)?;
        let payload: String = row.get(3)?;
        let pattern = serde_json::from_str(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
        let embedding: Option<Vec<u8>> = row.get(4)?;

        Ok(PatternRecord {
            id: row.get(0)?,
            domain: row.get(1)?,
            kind: PatternKind::from(kind),
            pattern,
            embedding: embedding.map(|bytes| Self::deserialize_embedding(&bytes)),
            similarity: 0.0,
            confidence: row.get(5)?,
            usage_count: row.get(6)?,
            success_count: row.get(7)?,
            created_at: row.get(8)?,
            last_used: row.get(9)?,
        })
    }

    // -------------------------------------------------------------------------
    // Pattern operations
    // -------------------------------------------------------------------------

    /// Insert a pattern, replacing any existing record with the same id.
    ///
    /// Confidence is clamped to [0, 1] and `success_count` to `usage_count`
    /// so stored records always score inside the quality range.
    pub fn insert(&self, record: &PatternRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.pattern)?;
        let embedding = record.embedding.as_deref().map(Self::serialize_embedding);

        let confidence = if record.confidence.is_nan() {
            0.0
        } else {
            record.confidence.clamp(0.0, 1.0)
        };
        let success_count = record.success_count.min(record.usage_count);
        if confidence != record.confidence || success_count != record.success_count {
            tracing::warn!(
                id = %record.id,
                confidence = record.confidence,
                usage_count = record.usage_count,
                success_count = record.success_count,
                "clamping out-of-range pattern counters"
            );
        }

        self.conn.execute(
            &format!("INSERT OR REPLACE INTO patterns ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)", COLUMNS),
            params![
                record.id,
                record.domain,
                record.kind.as_str(),
                payload,
                embedding,
                confidence,
                record.usage_count,
                success_count,
                record.created_at,
                record.last_used,
            ],
        )?;

        tracing::info!(id = %record.id, domain = %record.domain, kind = %record.kind, "stored pattern");
        Ok(())
    }

    /// Get a pattern by ID
    pub fn get(&self, id: &str) -> Result<Option<PatternRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM patterns WHERE id = ?1", COLUMNS))?;

        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::read_record(row)?)),
            None => Ok(None),
        }
    }

    /// List patterns, most recently used first
    pub fn list(&self, domain: Option<&str>, limit: usize) -> Result<Vec<PatternRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patterns
             WHERE (?1 IS NULL OR domain = ?1)
             ORDER BY last_used DESC
             LIMIT ?2",
            COLUMNS
        ))?;

        let rows = stmt.query_map(params![domain, limit as i64], Self::read_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Record one use of a pattern and whether it worked
    pub fn record_outcome(&self, id: &str, success: bool, now: i64) -> Result<PatternRecord> {
        let changed = self.conn.execute(
            "UPDATE patterns
             SET usage_count = usage_count + 1,
                 success_count = success_count + ?1,
                 last_used = ?2
             WHERE id = ?3",
            params![success as i64, now, id],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        tracing::info!(id, success, "recorded pattern outcome");
        self.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Delete a pattern
    pub fn delete(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM patterns WHERE id = ?1", params![id])?;
        if count > 0 {
            tracing::info!(id, "deleted pattern");
        }
        Ok(count > 0)
    }

    /// Get count of patterns
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Aggregate statistics over the whole store
    pub fn stats(&self) -> Result<StoreStats> {
        let (total, avg_confidence, total_usage, total_successes): (i64, Option<f64>, Option<i64>, Option<i64>) =
            self.conn.query_row(
                "SELECT COUNT(*), AVG(confidence), SUM(usage_count), SUM(success_count) FROM patterns",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        Ok(StoreStats {
            total_patterns: total as usize,
            by_domain: self.group_count("domain")?.into_iter().collect(),
            by_kind: self.group_count("kind")?.into_iter().collect(),
            avg_confidence: avg_confidence.unwrap_or(0.0),
            total_usage: total_usage.unwrap_or(0) as u64,
            total_successes: total_successes.unwrap_or(0) as u64,
        })
    }

    /// Counts per distinct value of `column`, largest first
    pub fn group_count(&self, column: &str) -> Result<Vec<(String, usize)>> {
        let column = match column {
            "domain" => "domain",
            "kind" => "kind",
            other => return Err(Error::Config(format!("cannot group by {}", other))),
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {0}, COUNT(*) as count FROM patterns GROUP BY {0} ORDER BY count DESC",
            column
        ))?;

        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as usize)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl PatternBackend for PatternStore {
    fn retrieve(&self, embedding: &[f32], query: &RetrieveQuery) -> Result<Vec<PatternRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patterns
             WHERE (?1 IS NULL OR domain = ?1) AND confidence >= ?2",
            COLUMNS
        ))?;

        let rows = stmt.query_map(
            params![query.domain, query.min_confidence],
            Self::read_record,
        )?;

        let mut results = Vec::new();
        for row in rows {
            let mut record = row?;
            record.similarity = record
                .embedding
                .as_deref()
                .map(|e| cosine_similarity(embedding, e))
                .unwrap_or(0.0);
            results.push(record);
        }

        results.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal));
        results.truncate(query.k);

        tracing::debug!(
            domain = ?query.domain,
            returned = results.len(),
            k = query.k,
            "retrieved candidates"
        );
        Ok(results)
    }
}
