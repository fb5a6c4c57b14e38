use std::collections::HashMap;
use std::sync::Arc;

use common::helper::error_chain_fmt;
use futures::{stream, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::{
    domain::entities::{
        dataset_record::{DatasetRecord, Payload, PayloadValue, StableKey, FINGERPRINT_FIELD},
        index_entry::IndexEntry,
    },
    ports::{
        embedding_provider::EmbeddingProvider,
        vector_index_store::{VectorIndexStore, VectorIndexStoreError},
    },
};

/// Ids looked up in the vector index per request
const RETRIEVE_CHUNK_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub collection: String,
    /// Records per embedding call and per upsert
    pub batch_size: usize,
    /// Embedding batches in flight at the same time
    pub max_concurrency: usize,
}

/// Counts of a sync run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub upserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Pushes dataset records into the vector index.
///
/// Idempotent: a record whose stored fingerprint is unchanged is neither embedded nor
/// written again. Keys are stable and writes are upserts, so an interrupted run can be
/// started again safely. Entries of records removed from the dataset are left as is.
///
/// A collection written by another embedding provider is only rebuilt by a forced sync.
pub struct SyncOrchestrator {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_index_store: Arc<dyn VectorIndexStore>,
    config: SyncConfig,
    /// Only one run at a time may write to the collection
    run_lock: Mutex<()>,
}

/// Outcome of one embedded-and-upserted batch
enum BatchOutcome {
    Upserted(usize),
    EmbeddingFailed(usize),
}

impl SyncOrchestrator {
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        vector_index_store: Arc<dyn VectorIndexStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            embedding_provider,
            vector_index_store,
            config,
            run_lock: Mutex::new(()),
        }
    }

    /// Syncs `records` into the collection.
    ///
    /// With `force`, the collection is dropped and rebuilt from scratch: every record is
    /// embedded again.
    #[tracing::instrument(
        name = "Syncing dataset into the vector index",
        skip(self, records),
        fields(collection = %self.config.collection, records = records.len())
    )]
    pub async fn sync(
        &self,
        records: &[DatasetRecord],
        force: bool,
    ) -> Result<SyncReport, SyncError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| SyncError::AlreadyRunning)?;

        if records.is_empty() {
            info!("Nothing to sync");
            return Ok(SyncReport::default());
        }

        self.prepare_collection(force).await?;

        let provider_identifier = self.embedding_provider.identifier().to_string();
        let stored_payloads = if force {
            HashMap::new()
        } else {
            self.stored_payloads(records).await?
        };

        let (pending, unchanged): (Vec<&DatasetRecord>, Vec<&DatasetRecord>) =
            records.iter().partition(|record| {
                !is_unchanged(
                    record,
                    stored_payloads.get(&record.key()),
                    &provider_identifier,
                )
            });

        let mut report = SyncReport {
            skipped: unchanged.len(),
            ..SyncReport::default()
        };
        info!(
            pending = pending.len(),
            unchanged = unchanged.len(),
            "Computed records to sync"
        );

        let batch_size = self.config.batch_size.max(1);
        let mut outcomes = stream::iter(pending.chunks(batch_size))
            .map(|batch| self.sync_batch(batch, &provider_identifier))
            .buffer_unordered(self.config.max_concurrency.max(1));

        while let Some(outcome) = outcomes.next().await {
            match outcome? {
                BatchOutcome::Upserted(count) => report.upserted += count,
                BatchOutcome::EmbeddingFailed(count) => report.failed += count,
            }
        }

        info!(?report, "Sync finished");
        Ok(report)
    }

    /// Creates the collection if needed and checks it stores vectors of our dimension,
    /// all embedded by our provider.
    ///
    /// Entries of another provider are not comparable with ours, and an unforced sync
    /// only rewrites the records still in the dataset: the collection must be rebuilt.
    async fn prepare_collection(&self, force: bool) -> Result<(), SyncError> {
        let collection = &self.config.collection;
        let dimension = self.embedding_provider.dimension();
        let provider_identifier = self.embedding_provider.identifier();

        let existing = self.vector_index_store.collection_info(collection).await?;
        match existing {
            Some(_) if force => {
                info!("Full rebuild requested, recreating the collection");
                self.vector_index_store.delete_collection(collection).await?;
                self.vector_index_store
                    .create_collection(collection, dimension)
                    .await?;
            }
            Some(info) if info.dimension != dimension => {
                return Err(SyncError::DimensionMismatch {
                    collection: collection.clone(),
                    expected: dimension,
                    found: info.dimension,
                });
            }
            Some(_) => {
                if let Some(found) = self
                    .vector_index_store
                    .other_embedding_provider(collection, provider_identifier)
                    .await?
                {
                    return Err(SyncError::ProviderMismatch {
                        collection: collection.clone(),
                        expected: provider_identifier.to_string(),
                        found,
                    });
                }
            }
            None => {
                self.vector_index_store
                    .create_collection(collection, dimension)
                    .await?;
            }
        }
        Ok(())
    }

    async fn stored_payloads(
        &self,
        records: &[DatasetRecord],
    ) -> Result<HashMap<StableKey, Payload>, SyncError> {
        let keys: Vec<StableKey> = records.iter().map(DatasetRecord::key).collect();
        let mut payloads = HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(RETRIEVE_CHUNK_SIZE) {
            payloads.extend(
                self.vector_index_store
                    .retrieve_payloads(&self.config.collection, chunk)
                    .await?,
            );
        }
        Ok(payloads)
    }

    /// Embeds the descriptions of a batch and upserts the resulting entries.
    ///
    /// An embedding failure only fails the records of this batch, a store failure
    /// aborts the whole run.
    async fn sync_batch(
        &self,
        batch: &[&DatasetRecord],
        provider_identifier: &str,
    ) -> Result<BatchOutcome, SyncError> {
        let descriptions: Vec<String> = batch
            .iter()
            .map(|record| record.description().to_string())
            .collect();

        let vectors = match self.embedding_provider.embed_batch(&descriptions).await {
            Ok(vectors) => vectors,
            Err(error) => {
                let names: Vec<&str> = batch.iter().map(|record| record.name()).collect();
                error!(?error, ?names, "Failed to embed a batch of records");
                return Ok(BatchOutcome::EmbeddingFailed(batch.len()));
            }
        };

        if vectors.len() != batch.len() {
            error!(
                expected = batch.len(),
                received = vectors.len(),
                "Embedding provider returned a wrong number of vectors"
            );
            return Ok(BatchOutcome::EmbeddingFailed(batch.len()));
        }

        let entries: Vec<IndexEntry> = batch
            .iter()
            .zip(vectors)
            .map(|(record, vector)| IndexEntry {
                id: record.key(),
                vector,
                payload: record.to_index_payload(provider_identifier),
            })
            .collect();

        let count = entries.len();
        self.vector_index_store
            .upsert(&self.config.collection, entries)
            .await?;
        Ok(BatchOutcome::Upserted(count))
    }
}

fn is_unchanged(
    record: &DatasetRecord,
    stored_payload: Option<&Payload>,
    provider_identifier: &str,
) -> bool {
    let stored_fingerprint = stored_payload
        .and_then(|payload| payload.get(FINGERPRINT_FIELD))
        .and_then(PayloadValue::as_text);
    stored_fingerprint == Some(record.fingerprint(provider_identifier).as_str())
}

#[derive(thiserror::Error)]
pub enum SyncError {
    #[error("Another sync is already running")]
    AlreadyRunning,

    #[error("Collection {collection} stores vectors of dimension {found}, the embedding provider produces {expected}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        found: usize,
    },

    #[error("Collection {collection} holds entries embedded by {found:?}, the active provider is {expected:?}: sync again with --force to rebuild it")]
    ProviderMismatch {
        collection: String,
        expected: String,
        found: String,
    },

    #[error("Vector index store failed during sync")]
    Store(#[from] VectorIndexStoreError),
}

impl std::fmt::Debug for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
