use std::collections::HashMap;

use async_trait::async_trait;
use common::helper::error_chain_fmt;

use crate::domain::entities::{
    dataset_record::{Payload, StableKey},
    index_entry::{CollectionInfo, IndexEntry, ScoredEntry},
};

/// Narrow view of the vector database used by the sync and the search.
///
/// Collections always use the cosine distance. Upserts are keyed by `IndexEntry::id`:
/// writing an existing id replaces its vector and payload.
#[async_trait]
pub trait VectorIndexStore: Send + Sync {
    async fn collection_exists(&self, collection: &str) -> Result<bool, VectorIndexStoreError>;

    /// `None` if the collection does not exist
    async fn collection_info(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionInfo>, VectorIndexStoreError>;

    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), VectorIndexStoreError>;

    async fn delete_collection(&self, collection: &str) -> Result<(), VectorIndexStoreError>;

    async fn upsert(
        &self,
        collection: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<(), VectorIndexStoreError>;

    /// Payloads of the given ids. Unknown ids are absent from the returned map.
    async fn retrieve_payloads(
        &self,
        collection: &str,
        ids: &[StableKey],
    ) -> Result<HashMap<StableKey, Payload>, VectorIndexStoreError>;

    /// The `_embedding_provider` of any one entry that was not embedded by
    /// `provider_identifier`, `None` if every entry was.
    ///
    /// Entries without the field count as written by another provider.
    async fn other_embedding_provider(
        &self,
        collection: &str,
        provider_identifier: &str,
    ) -> Result<Option<String>, VectorIndexStoreError>;

    /// The `top_k` entries closest to `vector`
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredEntry>, VectorIndexStoreError>;
}

#[derive(thiserror::Error)]
pub enum VectorIndexStoreError {
    #[error("Vector index is unreachable: {0}")]
    Unreachable(String),

    #[error("Collection {0} does not exist")]
    CollectionNotFound(String),

    #[error("Collection {collection} expects vectors of dimension {expected}, got {received}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        received: usize,
    },

    #[error("Error from Qdrant: {0}")]
    QdrantError(String),

    #[error("Invalid entry read from the vector index: {0}")]
    InvalidEntry(String),
}

impl std::fmt::Debug for VectorIndexStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
