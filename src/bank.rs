use crate::config::{find_bank_path, server_socket, BankConfig, BANK_DIR};
use crate::embeddings::{get_embedder, md5_hex, EmbedError};
use crate::error::{Error, Result};
use crate::index::PatternStore;
use crate::matcher::PatternMatcher;
use crate::scoring::now_millis;
use crate::types::{PatternKind, PatternPayload, PatternRecord, StoreStats};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A new pattern to learn
#[derive(Debug, Clone)]
pub struct NewPattern {
    pub domain: String,
    pub kind: PatternKind,
    pub payload: PatternPayload,
    pub confidence: f64,
}

/// Import files hold either one record or a list of them
#[derive(Deserialize)]
#[serde(untagged)]
enum ImportFile {
    Many(Vec<PatternRecord>),
    One(Box<PatternRecord>),
}

impl ImportFile {
    fn into_records(self) -> Vec<PatternRecord> {
        match self {
            ImportFile::Many(records) => records,
            ImportFile::One(record) => vec![*record],
        }
    }
}

/// Outcome of an import run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub files: usize,
    pub imported: usize,
    pub skipped: Vec<(PathBuf, String)>,
}

/// A pattern bank on disk: SQLite store plus the matcher configured for it
pub struct PatternBank {
    bank_path: PathBuf,
    matcher: PatternMatcher<PatternStore>,
}

impl PatternBank {
    /// Open the bank found from the current directory
    pub fn open() -> Result<Self> {
        let bank_path = find_bank_path().ok_or(Error::NoBank)?;
        Self::open_at(bank_path)
    }

    /// Open a bank at a specific path
    pub fn open_at(bank_path: PathBuf) -> Result<Self> {
        if !bank_path.exists() {
            return Err(Error::Config(format!(
                "path does not exist: {}",
                bank_path.display()
            )));
        }

        let store = PatternStore::open(&bank_path.join("patterns.db"))?;

        let config = BankConfig::new(bank_path.clone());
        let (_, model_type) = config.get_resolved_model();
        let embedder = get_embedder(&model_type, &server_socket());

        Ok(Self {
            bank_path,
            matcher: PatternMatcher::new(store, embedder, config.matcher_config()),
        })
    }

    /// Initialize a new bank under `path`
    pub fn init(path: &Path) -> Result<Self> {
        let bank_path = path.join(BANK_DIR);
        fs::create_dir_all(&bank_path)?;
        Self::open_at(bank_path)
    }

    pub fn bank_path(&self) -> &Path {
        &self.bank_path
    }

    pub fn matcher(&self) -> &PatternMatcher<PatternStore> {
        &self.matcher
    }

    pub fn store(&self) -> &PatternStore {
        self.matcher.backend()
    }

    /// Text embedded for a payload: the approach when present, else the JSON payload
    fn embedding_text(payload: &PatternPayload) -> Result<String> {
        match &payload.approach {
            Some(approach) => Ok(approach.clone()),
            None => Ok(serde_json::to_string(payload)?),
        }
    }

    /// Learn a new pattern, returns its id
    pub fn learn(&self, pattern: NewPattern) -> Result<String> {
        let text = Self::embedding_text(&pattern.payload)?;
        let embedding = self.matcher.embedder().embed(&text)?;
        let now = now_millis();

        let id = format!(
            "{}_{}_{}",
            pattern.kind.id_prefix(),
            now,
            &md5_hex(&format!("{}:{}", pattern.domain, text))[..8]
        );

        self.store().insert(&PatternRecord {
            id: id.clone(),
            domain: pattern.domain,
            kind: pattern.kind,
            pattern: pattern.payload,
            embedding: Some(embedding),
            similarity: 0.0,
            confidence: pattern.confidence.clamp(0.0, 1.0),
            usage_count: 0,
            success_count: 0,
            created_at: now,
            last_used: now,
        })?;

        Ok(id)
    }

    /// Import pattern records from every .json/.yaml/.yml file under `dir`.
    ///
    /// Records without an embedding are embedded on the way in. Files that fail
    /// to parse are reported and skipped.
    pub fn import(&self, dir: &Path) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        let now = now_millis();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !entry.file_type().is_file() || !matches!(ext, "json" | "yaml" | "yml") {
                continue;
            }

            report.files += 1;
            let content = fs::read_to_string(path)?;
            let parsed = if ext == "json" {
                serde_json::from_str::<ImportFile>(&content).map_err(|e| e.to_string())
            } else {
                serde_yaml::from_str::<ImportFile>(&content).map_err(|e| e.to_string())
            };

            let mut records = match parsed {
                Ok(file) => file.into_records(),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping unreadable import file");
                    report.skipped.push((path.to_path_buf(), e));
                    continue;
                }
            };

            self.embed_missing(&mut records)?;

            for mut record in records {
                if record.created_at == 0 {
                    record.created_at = now;
                }
                if record.last_used == 0 {
                    record.last_used = record.created_at;
                }
                record.similarity = 0.0;
                self.store().insert(&record)?;
                report.imported += 1;
            }
        }

        tracing::info!(files = report.files, imported = report.imported, "import finished");
        Ok(report)
    }

    /// Embed every record that arrived without a vector, in one batch
    fn embed_missing(&self, records: &mut [PatternRecord]) -> Result<()> {
        let missing: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let texts = missing
            .iter()
            .map(|&i| Self::embedding_text(&records[i].pattern))
            .collect::<Result<Vec<_>>>()?;
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();

        let embeddings = self.matcher.embedder().embed_batch(&texts)?;
        if embeddings.len() != missing.len() {
            return Err(EmbedError::Server(format!(
                "expected {} embeddings, got {}",
                missing.len(),
                embeddings.len()
            ))
            .into());
        }

        for (i, embedding) in missing.into_iter().zip(embeddings) {
            records[i].embedding = Some(embedding);
        }
        Ok(())
    }

    /// Stored patterns, most recently used first
    pub fn list(&self, domain: Option<&str>, limit: usize) -> Result<Vec<PatternRecord>> {
        self.store().list(domain, limit)
    }

    /// Record whether applying a pattern worked
    pub fn record_outcome(&self, id: &str, success: bool) -> Result<PatternRecord> {
        self.store().record_outcome(id, success, now_millis())
    }

    pub fn get(&self, id: &str) -> Result<Option<PatternRecord>> {
        self.store().get(id)
    }

    pub fn forget(&self, id: &str) -> Result<bool> {
        self.store().delete(id)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store().stats()
    }
}
