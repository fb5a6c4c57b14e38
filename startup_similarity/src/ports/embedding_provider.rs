use async_trait::async_trait;
use common::helper::error_chain_fmt;

use crate::domain::entities::index_entry::Embeddings;

/// Turns texts into fixed-dimension vectors.
///
/// `embed_batch` must return exactly one vector per input text, in the input order,
/// or fail as a whole.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifies the model behind the vectors, stored next to each indexed entry
    fn identifier(&self) -> &str;

    /// Dimension of every produced vector
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embeddings>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Embeddings, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                received: vectors.len(),
            });
        }
        vectors
            .pop()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                received: 0,
            })
    }
}

/// Failure of a single call to the embedding service
#[derive(thiserror::Error)]
pub enum EmbeddingCallError {
    #[error("Request to the embedding service failed")]
    Http(#[from] reqwest::Error),
    #[error("Embedding service answered with status {status}: {body}")]
    Status { status: u16, body: String },
}

impl EmbeddingCallError {
    /// Timeouts, connection failures, throttling and server errors are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingCallError::Http(error) => {
                error.is_timeout() || error.is_connect() || error.is_request()
            }
            EmbeddingCallError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

impl std::fmt::Debug for EmbeddingCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding service still failing after {attempts} attempt(s)")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: EmbeddingCallError,
    },
    #[error("Embedding service rejected the request")]
    Rejected(#[source] EmbeddingCallError),
    #[error("Embedding service returned an unreadable body: {0}")]
    InvalidResponse(String),
    #[error("Expected {expected} embeddings, received {received}")]
    CountMismatch { expected: usize, received: usize },
    #[error("Expected embeddings of dimension {expected}, received {received}")]
    DimensionMismatch { expected: usize, received: usize },
}

impl EmbeddingError {
    /// The service kept answering 429 Too Many Requests
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            EmbeddingError::RetriesExhausted {
                source: EmbeddingCallError::Status { status: 429, .. },
                ..
            }
        )
    }
}

impl std::fmt::Debug for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
