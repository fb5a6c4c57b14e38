use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{
    domain::{
        entities::index_entry::Embeddings,
        services::helpers::{normalize_vector, tokenize},
    },
    ports::embedding_provider::{EmbeddingError, EmbeddingProvider},
};

pub const MOCK_PROVIDER_IDENTIFIER: &str = "deterministic-mock-v1";

/// Local embeddings for running the pipeline without credentials.
///
/// Hashed bag of words: every token adds ±1 to one bucket chosen from its SHA-256
/// digest, then the vector is scaled to unit length. Texts sharing words get a positive
/// cosine similarity, which is enough for tests and demos but carries no real semantics.
/// Scores computed from these vectors must not be presented as recommendations.
#[derive(Debug, Clone)]
pub struct DeterministicMockProvider {
    dimension: usize,
}

impl DeterministicMockProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// The vector of a single text. Pure function of `text` and the dimension.
    pub fn embed_text(&self, text: &str) -> Embeddings {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_be_bytes(head) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        normalize_vector(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicMockProvider {
    fn identifier(&self) -> &str {
        MOCK_PROVIDER_IDENTIFIER
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    #[tracing::instrument(name = "Generate mock embeddings", skip(self, texts), fields(count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embeddings>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}
