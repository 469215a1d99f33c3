use crate::embeddings::DEFAULT_SOCKET_PATH;
use crate::error::Result;
use crate::matcher::SearchOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the bank directory searched for from the working directory upward
pub const BANK_DIR: &str = ".patternbank";

pub const DEFAULT_K: usize = 10;
pub const DEFAULT_MAX_PATTERNS: usize = 100;
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.5;
/// MMR λ. Weighs relevance against redundancy; lower favours diversity.
pub const DEFAULT_DIVERSITY_WEIGHT: f64 = 0.3;

/// Matcher tuning. Set once per bank, overridable per call.
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    pub k: usize,
    pub use_mmr: bool,
    pub diversity_weight: f64,
    pub min_similarity: f64,
    pub max_patterns: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            use_mmr: true,
            diversity_weight: DEFAULT_DIVERSITY_WEIGHT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            max_patterns: DEFAULT_MAX_PATTERNS,
        }
    }
}

impl MatcherConfig {
    /// Layer per-call options over this configuration
    pub fn overlay(&self, options: &SearchOptions) -> MatcherConfig {
        MatcherConfig {
            k: options.k.unwrap_or(self.k),
            use_mmr: options.use_mmr.unwrap_or(self.use_mmr),
            diversity_weight: options.diversity_weight.unwrap_or(self.diversity_weight),
            min_similarity: options.min_similarity.unwrap_or(self.min_similarity),
            max_patterns: options.max_patterns.unwrap_or(self.max_patterns),
        }
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub alias: &'static str,
    pub name: &'static str,
    pub model_type: &'static str,
    pub size: &'static str,
    pub description: &'static str,
}

/// Suggested embedding models
pub static SUGGESTED_MODELS: &[ModelInfo] = &[
    ModelInfo {
        alias: "lite",
        name: "lite",
        model_type: "lite",
        size: "0MB",
        description: "Default. N-gram hashing, no server needed",
    },
    ModelInfo {
        alias: "minilm",
        name: "sentence-transformers/all-MiniLM-L6-v2",
        model_type: "sentence-transformers",
        size: "~90MB",
        description: "Fast general-purpose embeddings (384 dims)",
    },
    ModelInfo {
        alias: "bge-small",
        name: "BAAI/bge-small-en-v1.5",
        model_type: "sentence-transformers",
        size: "~130MB",
        description: "Small BGE model, good quality",
    },
    ModelInfo {
        alias: "bge-base",
        name: "BAAI/bge-base-en-v1.5",
        model_type: "sentence-transformers",
        size: "~400MB",
        description: "Good balance of quality and speed",
    },
];

pub const DEFAULT_MODEL: &str = "lite";

/// Resolve a model alias or name to (model_name, model_type)
pub fn resolve_model(model_input: &str) -> (String, String) {
    if let Some(info) = SUGGESTED_MODELS
        .iter()
        .find(|m| m.alias == model_input || m.name == model_input)
    {
        return (info.name.to_string(), info.model_type.to_string());
    }

    // Anything else is assumed to be served by the embedding server
    (model_input.to_string(), "sentence-transformers".to_string())
}

// -----------------------------------------------------------------------------
// Global config (for the embedding server)
// -----------------------------------------------------------------------------

fn global_config_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("patternbank")
        .join("config.yaml")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GlobalConfig {
    #[serde(default)]
    server_socket: Option<PathBuf>,
}

/// Socket the embedding server listens on
pub fn server_socket() -> PathBuf {
    fs::read_to_string(global_config_file())
        .ok()
        .and_then(|content| serde_yaml::from_str::<GlobalConfig>(&content).ok())
        .and_then(|config| config.server_socket)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

// -----------------------------------------------------------------------------
// Per-bank config
// -----------------------------------------------------------------------------

/// Keys understood in `_config.yaml`
pub const CONFIG_KEYS: &[&str] = &[
    "k",
    "use_mmr",
    "diversity_weight",
    "min_similarity",
    "max_patterns",
    "embedding_model",
];

/// Configuration manager for a .patternbank directory
pub struct BankConfig {
    bank_path: PathBuf,
    config_file: PathBuf,
    config: BTreeMap<String, serde_yaml::Value>,
}

impl BankConfig {
    pub fn new(bank_path: PathBuf) -> Self {
        let config_file = bank_path.join("_config.yaml");
        let mut instance = Self {
            bank_path,
            config_file,
            config: BTreeMap::new(),
        };
        instance.load();
        instance
    }

    fn load(&mut self) {
        let parsed = fs::read_to_string(&self.config_file)
            .ok()
            .map(|content| serde_yaml::from_str::<BTreeMap<String, serde_yaml::Value>>(&content));

        match parsed {
            Some(Ok(config)) => self.config = config,
            Some(Err(e)) => tracing::warn!(
                file = %self.config_file.display(),
                error = %e,
                "ignoring unreadable config"
            ),
            None => {}
        }
    }

    fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.bank_path)?;
        let content = serde_yaml::to_string(&self.config)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).and_then(|v| match v {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    /// Set a key, storing numbers and booleans as typed YAML scalars
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = serde_yaml::from_str::<serde_yaml::Value>(value)
            .ok()
            .filter(|v| v.is_number() || v.is_bool())
            .unwrap_or_else(|| serde_yaml::Value::String(value.to_string()));
        self.config.insert(key.to_string(), value);
        self.save()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, String)> {
        self.config
            .keys()
            .filter_map(move |k| self.get(k).map(|v| (k.as_str(), v)))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring invalid config value");
                None
            }
        }
    }

    pub fn matcher_config(&self) -> MatcherConfig {
        let defaults = MatcherConfig::default();
        MatcherConfig {
            k: self.parsed("k").unwrap_or(defaults.k),
            use_mmr: self.parsed("use_mmr").unwrap_or(defaults.use_mmr),
            diversity_weight: self
                .parsed("diversity_weight")
                .unwrap_or(defaults.diversity_weight),
            min_similarity: self
                .parsed("min_similarity")
                .unwrap_or(defaults.min_similarity),
            max_patterns: self.parsed("max_patterns").unwrap_or(defaults.max_patterns),
        }
    }

    pub fn embedding_model(&self) -> String {
        self.get("embedding_model")
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn get_resolved_model(&self) -> (String, String) {
        resolve_model(&self.embedding_model())
    }
}

/// Find the .patternbank directory, searching upward from `start`, then
/// falling back to the `PATTERNBANK_PATH` environment variable
pub fn find_bank_path_from(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        let bank = dir.join(BANK_DIR);
        if bank.is_dir() {
            return Some(bank);
        }
    }

    std::env::var_os("PATTERNBANK_PATH")
        .map(PathBuf::from)
        .filter(|p| p.is_dir())
}

pub fn find_bank_path() -> Option<PathBuf> {
    let current = std::env::current_dir().ok()?;
    find_bank_path_from(&current)
}
