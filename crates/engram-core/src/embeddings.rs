//! Semantic embeddings
//!
//! Unit-norm vectors of a fixed dimension, stored as opaque little-endian
//! bytes. Generation is best-effort: when no backend is available (or the
//! model fails) the memory simply has no embedding and ranking degrades to
//! keyword + graph + activation signals.
//!
//! The `embeddings` cargo feature wires in fastembed for local ONNX
//! inference; tests install a deterministic backend via
//! [`EmbeddingService::with_backend`].

use serde::{Deserialize, Serialize};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// No backend configured or the model failed to initialize
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),
    /// Generation failed for this input
    #[error("Embedding generation failed: {0}")]
    Failed(String),
    /// Empty or otherwise unusable input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// ============================================================================
// EMBEDDING TYPE
// ============================================================================

/// A semantic embedding vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// The vector, unit-normalized
    pub vector: Vec<f32>,
}

impl Embedding {
    /// Wrap a raw vector without normalizing
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }

    /// Number of dimensions
    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }

    /// Normalize to unit length in place; zero vectors are left unchanged
    pub fn normalize(&mut self) {
        let norm = self.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut self.vector {
                *x /= norm;
            }
        }
    }

    /// Whether the vector is unit length within tolerance
    pub fn is_normalized(&self) -> bool {
        let norm = self.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        (norm - 1.0).abs() < 0.001
    }

    /// Cosine similarity with another embedding
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.vector, &other.vector)
    }

    /// Serialize to little-endian bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize from storage bytes; `None` when the length is not a
    /// multiple of four
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Some(Self::new(vector))
    }
}

/// Cosine similarity between two vectors in [-1, 1].
///
/// Unequal lengths and zero-norm inputs yield 0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot / denominator
    } else {
        0.0
    }
}

/// Truncate to `dim` dimensions and re-normalize.
///
/// Matryoshka-style models make the leading dimensions a valid smaller
/// representation; backends with larger native output pass through here.
pub fn truncate_normalized(mut vector: Vec<f32>, dim: usize) -> Vec<f32> {
    if vector.len() > dim {
        vector.truncate(dim);
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

// ============================================================================
// BACKEND
// ============================================================================

/// A source of raw embedding vectors
pub trait EmbeddingBackend: Send + Sync {
    /// Produce a raw (not yet truncated/normalized) vector for the text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    /// Model identifier recorded next to stored vectors
    fn model_name(&self) -> &str;
}

// ============================================================================
// SERVICE
// ============================================================================

/// Maximum text length fed to a backend; longer input is truncated at a
/// character boundary
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Best-effort embedding generation
pub struct EmbeddingService {
    backend: Option<Box<dyn EmbeddingBackend>>,
    dim: usize,
}

impl EmbeddingService {
    /// Create a service with the default backend for the build:
    /// fastembed when the `embeddings` feature is on, otherwise none.
    pub fn new(dim: usize) -> Self {
        #[cfg(feature = "embeddings")]
        {
            Self {
                backend: Some(Box::new(fastembed_backend::FastembedBackend)),
                dim,
            }
        }
        #[cfg(not(feature = "embeddings"))]
        {
            Self { backend: None, dim }
        }
    }

    /// Create a service with an explicit backend (tests, custom models)
    pub fn with_backend(backend: Box<dyn EmbeddingBackend>, dim: usize) -> Self {
        Self {
            backend: Some(backend),
            dim,
        }
    }

    /// Create a service that never produces embeddings
    pub fn disabled(dim: usize) -> Self {
        Self { backend: None, dim }
    }

    /// Whether a backend is configured
    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    /// Configured output dimension
    pub fn dimensions(&self) -> usize {
        self.dim
    }

    /// Model identifier, when a backend is configured
    pub fn model_name(&self) -> Option<&str> {
        self.backend.as_deref().map(|b| b.model_name())
    }

    /// Generate a unit-norm embedding for the text
    pub fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }
        let backend = self
            .backend
            .as_deref()
            .ok_or_else(|| EmbeddingError::Unavailable("no backend configured".into()))?;

        let bounded = if text.len() > MAX_TEXT_LENGTH {
            let mut end = MAX_TEXT_LENGTH;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let raw = backend.embed(bounded)?;
        Ok(Embedding::new(truncate_normalized(raw, self.dim)))
    }
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("ready", &self.is_ready())
            .field("dim", &self.dim)
            .finish()
    }
}

// ============================================================================
// FASTEMBED BACKEND (feature = "embeddings")
// ============================================================================

#[cfg(feature = "embeddings")]
mod fastembed_backend {
    use super::{EmbeddingBackend, EmbeddingError};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::{Mutex, OnceLock};

    static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

    fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
        let result = MODEL.get_or_init(|| {
            let cache_dir = crate::storage::default_data_dir().join("fastembed");
            if let Err(e) = std::fs::create_dir_all(&cache_dir) {
                tracing::warn!("Failed to create embedding cache dir {:?}: {}", cache_dir, e);
            }
            let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
                .with_show_download_progress(false)
                .with_cache_dir(cache_dir);
            TextEmbedding::try_new(options)
                .map(Mutex::new)
                .map_err(|e| format!("failed to initialize embedding model: {e}"))
        });

        match result {
            Ok(model) => model
                .lock()
                .map_err(|e| EmbeddingError::Unavailable(format!("lock poisoned: {e}"))),
            Err(err) => Err(EmbeddingError::Unavailable(err.clone())),
        }
    }

    pub struct FastembedBackend;

    impl EmbeddingBackend for FastembedBackend {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut model = get_model()?;
            let mut vectors = model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
            vectors
                .pop()
                .ok_or_else(|| EmbeddingError::Failed("no embedding generated".into()))
        }

        fn model_name(&self) -> &str {
            "nomic-ai/nomic-embed-text-v1.5"
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod test_backend {
    use super::{EmbeddingBackend, EmbeddingError};

    /// Deterministic hashing backend: token counts bucketed into a small
    /// vector. Similar texts share buckets; disjoint texts do not.
    pub struct HashingBackend {
        pub dim: usize,
    }

    impl EmbeddingBackend for HashingBackend {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut vector = vec![0.0_f32; self.dim];
            for token in text.to_lowercase().split_whitespace() {
                let mut hash = 0_usize;
                for byte in token.bytes() {
                    hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
                }
                vector[hash % self.dim] += 1.0;
            }
            Ok(vector)
        }

        fn model_name(&self) -> &str {
            "test-hashing"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_unit_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let original = Embedding::new(vec![1.5, -2.5, 3.5, 0.0]);
        let restored = Embedding::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_from_bytes_rejects_ragged_input() {
        assert!(Embedding::from_bytes(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_truncate_normalized() {
        let vector = truncate_normalized(vec![3.0, 4.0, 100.0], 2);
        assert_eq!(vector.len(), 2);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_disabled_service_reports_unavailable() {
        let service = EmbeddingService::disabled(8);
        assert!(!service.is_ready());
        assert!(matches!(
            service.embed("hello"),
            Err(EmbeddingError::Unavailable(_))
        ));
    }

    #[test]
    fn test_hashing_backend_produces_unit_vectors() {
        let service =
            EmbeddingService::with_backend(Box::new(test_backend::HashingBackend { dim: 8 }), 8);
        let embedding = service.embed("redis cache layer").unwrap();
        assert!(embedding.is_normalized());

        let same = service.embed("redis cache layer").unwrap();
        assert!((embedding.cosine_similarity(&same) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_input_rejected() {
        let service =
            EmbeddingService::with_backend(Box::new(test_backend::HashingBackend { dim: 8 }), 8);
        assert!(matches!(
            service.embed(""),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }
}
