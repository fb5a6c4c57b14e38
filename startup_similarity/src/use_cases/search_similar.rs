use std::sync::Arc;
use std::time::Duration;

use common::helper::error_chain_fmt;
use tracing::{debug, info};

use crate::{
    domain::entities::{
        dataset_record::{PayloadValue, EMBEDDING_PROVIDER_FIELD},
        index_entry::{ScoredEntry, SimilarityResult},
    },
    ports::{
        embedding_provider::{EmbeddingError, EmbeddingProvider},
        vector_index_store::{VectorIndexStore, VectorIndexStoreError},
    },
};

/// Payload keys starting with this prefix are bookkeeping of the sync, never returned
const RESERVED_PREFIX: char = '_';

/// Finds the dataset entries closest to a free-text startup idea
pub struct SimilaritySearch {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_index_store: Arc<dyn VectorIndexStore>,
    collection: String,
    timeout: Duration,
}

impl SimilaritySearch {
    /// `timeout` bounds a whole search: embedding the query and querying the index.
    ///
    /// The provider should not retry. A query is interactive and is better answered
    /// with `Unavailable` than late.
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        vector_index_store: Arc<dyn VectorIndexStore>,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            embedding_provider,
            vector_index_store,
            collection: collection.into(),
            timeout,
        }
    }

    /// Returns at most `top_k` entries ranked by cosine similarity, highest first. Equal
    /// scores are ordered by ascending key.
    #[tracing::instrument(
        name = "Searching similar startups",
        skip(self, query),
        fields(collection = %self.collection)
    )]
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        tokio::time::timeout(self.timeout, self.ranked(query, top_k))
            .await
            .map_err(|_| {
                SearchError::Unavailable(format!(
                    "no answer within {} ms",
                    self.timeout.as_millis()
                ))
            })?
    }

    async fn ranked(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        let dimension = self.embedding_provider.dimension();
        let info = self
            .vector_index_store
            .collection_info(&self.collection)
            .await?
            .ok_or_else(|| {
                SearchError::Unavailable(format!("collection {} does not exist", self.collection))
            })?;
        if info.dimension != dimension {
            return Err(SearchError::DimensionMismatch {
                expected: dimension,
                found: info.dimension,
            });
        }

        let vector = self.embedding_provider.embed(query).await?;
        let hits = self
            .vector_index_store
            .query(&self.collection, &vector, top_k)
            .await?;
        debug!(hits = hits.len(), "Vector index answered");

        let identifier = self.embedding_provider.identifier();
        let mut results = hits
            .into_iter()
            .map(|hit| into_result(hit, identifier))
            .collect::<Result<Vec<_>, _>>()?;

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(top_k);

        info!(results = results.len(), "Found similar startups");
        Ok(results)
    }
}

/// Checks the hit was embedded by the active provider, then clamps its score and drops
/// the reserved payload keys
fn into_result(hit: ScoredEntry, identifier: &str) -> Result<SimilarityResult, SearchError> {
    let stored_identifier = hit
        .payload
        .get(EMBEDDING_PROVIDER_FIELD)
        .and_then(PayloadValue::as_text)
        .unwrap_or_default();
    if stored_identifier != identifier {
        return Err(SearchError::ProviderMismatch {
            expected: identifier.to_string(),
            found: stored_identifier.to_string(),
        });
    }

    let payload = hit
        .payload
        .into_iter()
        .filter(|(key, _)| !key.starts_with(RESERVED_PREFIX))
        .collect();

    Ok(SimilarityResult {
        id: hit.id,
        score: if hit.score.is_nan() {
            -1.0
        } else {
            hit.score.clamp(-1.0, 1.0)
        },
        payload,
    })
}

#[derive(thiserror::Error)]
pub enum SearchError {
    #[error("Similarity search is unavailable: {0}")]
    Unavailable(String),

    #[error("Index stores vectors of dimension {found}, the embedding provider produces {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Index was built by embedding provider {found:?}, the active one is {expected:?}")]
    ProviderMismatch { expected: String, found: String },

    #[error("Failed to embed the query")]
    Embedding(#[from] EmbeddingError),
}

impl From<VectorIndexStoreError> for SearchError {
    fn from(error: VectorIndexStoreError) -> Self {
        match error {
            VectorIndexStoreError::DimensionMismatch {
                expected, received, ..
            } => SearchError::DimensionMismatch {
                expected: received,
                found: expected,
            },
            other => SearchError::Unavailable(other.to_string()),
        }
    }
}

impl std::fmt::Debug for SearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
