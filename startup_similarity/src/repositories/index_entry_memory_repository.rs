use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    domain::{
        entities::{
            dataset_record::{Payload, PayloadValue, StableKey, EMBEDDING_PROVIDER_FIELD},
            index_entry::{CollectionInfo, IndexEntry, ScoredEntry},
        },
        services::helpers::{cosine_similarity, rank_scored_entries},
    },
    ports::vector_index_store::{VectorIndexStore, VectorIndexStoreError},
};

const UNKNOWN_PROVIDER: &str = "unknown";

struct MemoryCollection {
    dimension: usize,
    entries: BTreeMap<StableKey, IndexEntry>,
}

/// Vector index kept in process memory, with exact cosine scoring.
///
/// Used by tests and local runs. `set_reachable(false)` makes every call fail as if the
/// server was down.
#[derive(Default)]
pub struct InMemoryVectorIndexStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    unreachable: AtomicBool,
}

impl InMemoryVectorIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unreachable, every call fails with `VectorIndexStoreError::Unreachable`
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Every entry of a collection, ordered by id
    pub async fn entries(&self, collection: &str) -> Vec<IndexEntry> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.entries.values().cloned().collect())
            .unwrap_or_default()
    }

    fn check_reachable(&self) -> Result<(), VectorIndexStoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(VectorIndexStoreError::Unreachable(
                "in-memory store switched off".into(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VectorIndexStore for InMemoryVectorIndexStore {
    async fn collection_exists(&self, collection: &str) -> Result<bool, VectorIndexStoreError> {
        self.check_reachable()?;
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn collection_info(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionInfo>, VectorIndexStoreError> {
        self.check_reachable()?;
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|c| CollectionInfo {
                dimension: c.dimension,
            }))
    }

    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), VectorIndexStoreError> {
        self.check_reachable()?;
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_insert_with(|| MemoryCollection {
                dimension,
                entries: BTreeMap::new(),
            });
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), VectorIndexStoreError> {
        self.check_reachable()?;
        self.collections.write().await.remove(collection);
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<(), VectorIndexStoreError> {
        self.check_reachable()?;
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorIndexStoreError::CollectionNotFound(collection.to_string()))?;

        if let Some(entry) = entries.iter().find(|e| e.vector.len() != target.dimension) {
            return Err(VectorIndexStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: target.dimension,
                received: entry.vector.len(),
            });
        }

        debug!(count = entries.len(), "Upserting entries in memory");
        for entry in entries {
            target.entries.insert(entry.id, entry);
        }
        Ok(())
    }

    async fn retrieve_payloads(
        &self,
        collection: &str,
        ids: &[StableKey],
    ) -> Result<HashMap<StableKey, Payload>, VectorIndexStoreError> {
        self.check_reachable()?;
        let collections = self.collections.read().await;
        let source = collections
            .get(collection)
            .ok_or_else(|| VectorIndexStoreError::CollectionNotFound(collection.to_string()))?;

        Ok(ids
            .iter()
            .filter_map(|id| {
                source
                    .entries
                    .get(id)
                    .map(|entry| (*id, entry.payload.clone()))
            })
            .collect())
    }

    async fn other_embedding_provider(
        &self,
        collection: &str,
        provider_identifier: &str,
    ) -> Result<Option<String>, VectorIndexStoreError> {
        self.check_reachable()?;
        let collections = self.collections.read().await;
        let source = collections
            .get(collection)
            .ok_or_else(|| VectorIndexStoreError::CollectionNotFound(collection.to_string()))?;

        Ok(source.entries.values().find_map(|entry| {
            match entry
                .payload
                .get(EMBEDDING_PROVIDER_FIELD)
                .and_then(PayloadValue::as_text)
            {
                Some(identifier) if identifier == provider_identifier => None,
                Some(identifier) => Some(identifier.to_string()),
                None => Some(UNKNOWN_PROVIDER.to_string()),
            }
        }))
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredEntry>, VectorIndexStoreError> {
        self.check_reachable()?;
        let collections = self.collections.read().await;
        let source = collections
            .get(collection)
            .ok_or_else(|| VectorIndexStoreError::CollectionNotFound(collection.to_string()))?;

        if vector.len() != source.dimension {
            return Err(VectorIndexStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: source.dimension,
                received: vector.len(),
            });
        }

        let scored: Vec<ScoredEntry> = source
            .entries
            .values()
            .filter_map(|entry| {
                cosine_similarity(vector, &entry.vector).map(|score| ScoredEntry {
                    id: entry.id,
                    score,
                    payload: entry.payload.clone(),
                })
            })
            .collect();

        Ok(rank_scored_entries(scored, top_k))
    }
}
