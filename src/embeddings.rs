use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Embedding dimension for lite embedder
pub const LITE_DIM: usize = 384;

/// Default socket path for the embedding server
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/patternbank-embedder.sock";

/// Errors from an embedding provider
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("failed to reach embedding server: {0}")]
    Connection(#[from] std::io::Error),

    #[error("malformed embedding server message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("embedding server error: {0}")]
    Server(String),
}

/// Trait for embedding implementations
pub trait Embedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn name(&self) -> &str;
}

// =============================================================================
// LiteEmbedder - N-gram hashing (pure Rust, zero deps)
// =============================================================================

/// Lightweight embedder using character n-gram hashing
pub struct LiteEmbedder {
    dim: usize,
}

impl Default for LiteEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiteEmbedder {
    pub fn new() -> Self {
        Self { dim: LITE_DIM }
    }

    pub fn with_dim(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn bucket(&self, token: &str) -> usize {
        (md5_hash(token) % self.dim as u128) as usize
    }
}

impl Embedder for LiteEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let text = text.to_lowercase();
        let text = text.trim();
        let mut vector = vec![0.0f32; self.dim];

        let chars: Vec<char> = text.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            vector[self.bucket(&trigram)] += 1.0;
        }

        // Whole words weigh more than trigrams
        for word in text.split_whitespace() {
            vector[self.bucket(word)] += 2.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn name(&self) -> &str {
        "lite"
    }
}

fn md5_hash(text: &str) -> u128 {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    u128::from_be_bytes(result.into())
}

/// Hex digest used for minting short record ids
pub fn md5_hex(text: &str) -> String {
    format!("{:032x}", md5_hash(text))
}

// =============================================================================
// ServerEmbedder - Unix socket client for an external embedding daemon
// =============================================================================

#[derive(Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum ServerRequest<'a> {
    Embed { text: &'a str },
    EmbedBatch { texts: &'a [&'a str] },
    Ping,
}

#[derive(Deserialize)]
struct ServerResponse {
    ok: bool,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ServerResponse {
    fn into_ok(self) -> Result<Self, EmbedError> {
        if self.ok {
            Ok(self)
        } else {
            Err(EmbedError::Server(
                self.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}

/// Embedder that delegates to an embedding daemon listening on a Unix socket
pub struct ServerEmbedder {
    socket: PathBuf,
}

impl ServerEmbedder {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Check if the server is reachable
    pub fn is_running(&self) -> bool {
        self.socket.exists() && self.ping().is_ok()
    }

    /// Ping the server and get the model name
    pub fn ping(&self) -> Result<String, EmbedError> {
        let response = self.send(&ServerRequest::Ping)?;
        Ok(response.model.unwrap_or_default())
    }

    fn send(&self, request: &ServerRequest<'_>) -> Result<ServerResponse, EmbedError> {
        let mut stream = UnixStream::connect(&self.socket)?;
        stream.set_read_timeout(Some(Duration::from_secs(60)))?;

        let json = serde_json::to_vec(request)?;
        stream.write_all(&json)?;
        // Closing the write half marks the end of the request
        stream.shutdown(std::net::Shutdown::Write)?;

        let mut buffer = Vec::new();
        stream.take(1024 * 1024).read_to_end(&mut buffer)?;

        let response: ServerResponse = serde_json::from_slice(&buffer)?;
        response.into_ok()
    }
}

impl Embedder for ServerEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.send(&ServerRequest::Embed { text })?
            .embedding
            .ok_or_else(|| EmbedError::Server("No embedding in response".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.send(&ServerRequest::EmbedBatch { texts })?
            .embeddings
            .ok_or_else(|| EmbedError::Server("No embeddings in response".to_string()))
    }

    fn name(&self) -> &str {
        "server"
    }
}

// =============================================================================
// Cosine similarity
// =============================================================================

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(vec_a: &[f32], vec_b: &[f32]) -> f64 {
    if vec_a.len() != vec_b.len() {
        return 0.0;
    }

    let dot: f32 = vec_a.iter().zip(vec_b.iter()).map(|(a, b)| a * b).sum();
    let norm_a: f32 = vec_a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = vec_b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

// =============================================================================
// Embedder factory
// =============================================================================

/// Pick an embedder for the configured model, falling back to lite when the
/// server is unavailable.
pub fn get_embedder(model_type: &str, socket: &Path) -> Box<dyn Embedder> {
    if model_type == "lite" {
        return Box::new(LiteEmbedder::new());
    }

    let server = ServerEmbedder::new(socket);
    if server.is_running() {
        tracing::debug!(socket = %socket.display(), "using embedding server");
        return Box::new(server);
    }

    tracing::warn!(
        socket = %socket.display(),
        "embedding server not running, falling back to lite embedder"
    );
    Box::new(LiteEmbedder::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lite_embedder() {
        let embedder = LiteEmbedder::new();
        let embedding = embedder.embed("hello world").unwrap();

        assert_eq!(embedding.len(), LITE_DIM);

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_lite_embedder_is_deterministic() {
        let embedder = LiteEmbedder::with_dim(64);
        let a = embedder.embed("Profile memory, add cleanup").unwrap();
        let b = embedder.embed("profile memory, add cleanup  ").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_text_embeds_to_zero_vector() {
        let embedder = LiteEmbedder::with_dim(16);
        let embedding = embedder.embed("").unwrap();
        assert!(embedding.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_similar_texts_have_higher_similarity() {
        let embedder = LiteEmbedder::new();

        let a = embedder.embed("memory leak in event listeners").unwrap();
        let b = embedder.embed("memory leak in subscriptions").unwrap();
        let c = embedder.embed("jwt refresh token rotation").unwrap();

        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn test_missing_server_falls_back_to_lite() {
        let embedder = get_embedder("sentence-transformers", Path::new("/nonexistent/pb.sock"));
        assert_eq!(embedder.name(), "lite");
    }

    #[test]
    fn test_server_request_shape() {
        let json = serde_json::to_value(ServerRequest::Embed { text: "hi" }).unwrap();
        assert_eq!(json, serde_json::json!({"cmd": "embed", "text": "hi"}));

        let json = serde_json::to_value(ServerRequest::Ping).unwrap();
        assert_eq!(json, serde_json::json!({"cmd": "ping"}));
    }
}
