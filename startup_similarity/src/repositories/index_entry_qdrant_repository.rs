use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::{
    prelude::QdrantClient,
    qdrant::{
        self, point_id::PointIdOptions, value::Kind, vectors_config::Config, Condition,
        CreateCollection, Distance, Filter, PointId, PointStruct, ScrollPoints, SearchPoints,
        VectorParams, VectorsConfig,
    },
};
use tracing::info;

use crate::{
    domain::{
        entities::{
            dataset_record::{Payload, PayloadValue, StableKey, EMBEDDING_PROVIDER_FIELD},
            index_entry::{CollectionInfo, IndexEntry, ScoredEntry},
        },
        services::helpers::rank_scored_entries,
    },
    ports::vector_index_store::{VectorIndexStore, VectorIndexStoreError},
};

/// Extra hits fetched beyond `top_k`, so that equal scores at the cut are ordered by id here
const QUERY_OVERFETCH: usize = 8;

const UNKNOWN_PROVIDER: &str = "unknown";

/// Repository for index entries (startup vectors and payloads) persisted in Qdrant
pub struct IndexEntryQdrantRepository {
    client: QdrantClient,
}

impl IndexEntryQdrantRepository {
    pub fn new(client: QdrantClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VectorIndexStore for IndexEntryQdrantRepository {
    #[tracing::instrument(name = "Checking Qdrant collection", skip(self))]
    async fn collection_exists(&self, collection: &str) -> Result<bool, VectorIndexStoreError> {
        self.client
            .has_collection(collection)
            .await
            .map_err(qdrant_error)
    }

    #[tracing::instrument(name = "Reading Qdrant collection info", skip(self))]
    async fn collection_info(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionInfo>, VectorIndexStoreError> {
        if !self.collection_exists(collection).await? {
            return Ok(None);
        }

        let response = self
            .client
            .collection_info(collection)
            .await
            .map_err(qdrant_error)?;

        let vectors_config = response
            .result
            .and_then(|info| info.config)
            .and_then(|config| config.params)
            .and_then(|params| params.vectors_config)
            .and_then(|vectors| vectors.config);

        match vectors_config {
            Some(Config::Params(params)) => Ok(Some(CollectionInfo {
                dimension: params.size as usize,
            })),
            // Named vectors are never created by this service
            _ => Err(VectorIndexStoreError::InvalidEntry(format!(
                "collection {} has no single unnamed vector configuration",
                collection
            ))),
        }
    }

    #[tracing::instrument(name = "Creating Qdrant collection", skip(self))]
    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), VectorIndexStoreError> {
        self.client
            .create_collection(&CreateCollection {
                collection_name: collection.to_string(),
                vectors_config: Some(VectorsConfig {
                    config: Some(Config::Params(VectorParams {
                        size: dimension as u64,
                        distance: Distance::Cosine as i32,
                        ..Default::default()
                    })),
                }),
                ..Default::default()
            })
            .await
            .map_err(qdrant_error)?;

        info!("Created collection");
        Ok(())
    }

    #[tracing::instrument(name = "Deleting Qdrant collection", skip(self))]
    async fn delete_collection(&self, collection: &str) -> Result<(), VectorIndexStoreError> {
        self.client
            .delete_collection(collection)
            .await
            .map_err(qdrant_error)?;

        info!("Deleted collection");
        Ok(())
    }

    #[tracing::instrument(name = "Saving index entries to Qdrant", skip(self, entries), fields(count = entries.len()))]
    async fn upsert(
        &self,
        collection: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<(), VectorIndexStoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        // Waits for the write to be applied, a resumed sync must see it
        self.client
            .upsert_points_blocking(
                collection,
                entries.into_iter().map(PointStruct::from).collect(),
                None,
            )
            .await
            .map_err(qdrant_error)?;

        info!("Saved index entries");
        Ok(())
    }

    #[tracing::instrument(name = "Retrieving payloads from Qdrant", skip(self, ids), fields(count = ids.len()))]
    async fn retrieve_payloads(
        &self,
        collection: &str,
        ids: &[StableKey],
    ) -> Result<HashMap<StableKey, Payload>, VectorIndexStoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let point_ids: Vec<PointId> = ids.iter().map(|id| id.to_string().into()).collect();
        let response = self
            .client
            .get_points(collection, &point_ids, Some(false), Some(true), None)
            .await
            .map_err(qdrant_error)?;

        response
            .result
            .into_iter()
            .map(|point| Ok((stable_key(point.id)?, from_qdrant_payload(point.payload))))
            .collect()
    }

    #[tracing::instrument(name = "Looking for entries of another embedding provider", skip(self))]
    async fn other_embedding_provider(
        &self,
        collection: &str,
        provider_identifier: &str,
    ) -> Result<Option<String>, VectorIndexStoreError> {
        let response = self
            .client
            .scroll(&ScrollPoints {
                collection_name: collection.to_string(),
                filter: Some(Filter {
                    must_not: vec![Condition::matches(
                        EMBEDDING_PROVIDER_FIELD,
                        provider_identifier.to_string(),
                    )],
                    ..Default::default()
                }),
                limit: Some(1),
                with_payload: Some(true.into()),
                ..Default::default()
            })
            .await
            .map_err(qdrant_error)?;

        Ok(response.result.into_iter().next().map(|point| {
            from_qdrant_payload(point.payload)
                .get(EMBEDDING_PROVIDER_FIELD)
                .and_then(PayloadValue::as_text)
                .unwrap_or(UNKNOWN_PROVIDER)
                .to_string()
        }))
    }

    #[tracing::instrument(name = "Searching nearest entries in Qdrant", skip(self, vector))]
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredEntry>, VectorIndexStoreError> {
        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: collection.to_string(),
                vector: vector.to_vec(),
                limit: (top_k + QUERY_OVERFETCH) as u64,
                with_payload: Some(true.into()),
                ..Default::default()
            })
            .await
            .map_err(qdrant_error)?;

        let hits = response
            .result
            .into_iter()
            .map(|point| {
                Ok(ScoredEntry {
                    id: stable_key(point.id)?,
                    score: point.score,
                    payload: from_qdrant_payload(point.payload),
                })
            })
            .collect::<Result<Vec<_>, VectorIndexStoreError>>()?;

        Ok(rank_scored_entries(hits, top_k))
    }
}

/// Qdrant client only returns anyhow errors: transport failures are told apart by their message
fn qdrant_error(error: anyhow::Error) -> VectorIndexStoreError {
    let message = format!("{:#}", error);
    let lowercase = message.to_lowercase();
    if lowercase.contains("transport error")
        || lowercase.contains("unavailable")
        || lowercase.contains("deadline")
        || lowercase.contains("connection refused")
    {
        VectorIndexStoreError::Unreachable(message)
    } else if lowercase.contains("not found") || lowercase.contains("doesn't exist") {
        VectorIndexStoreError::CollectionNotFound(message)
    } else {
        VectorIndexStoreError::QdrantError(message)
    }
}

fn stable_key(point_id: Option<PointId>) -> Result<StableKey, VectorIndexStoreError> {
    match point_id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(raw)) => StableKey::parse(&raw).map_err(|e| {
            VectorIndexStoreError::InvalidEntry(format!("point id {} is not a uuid: {}", raw, e))
        }),
        other => Err(VectorIndexStoreError::InvalidEntry(format!(
            "unexpected point id {:?}",
            other
        ))),
    }
}

fn from_qdrant_payload(payload: HashMap<String, qdrant::Value>) -> Payload {
    payload
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value.kind? {
                Kind::StringValue(text) => PayloadValue::Text(text),
                Kind::DoubleValue(number) => PayloadValue::Number(number),
                Kind::IntegerValue(number) => PayloadValue::Number(number as f64),
                _ => return None,
            };
            Some((key, value))
        })
        .collect()
}

impl From<IndexEntry> for PointStruct {
    fn from(entry: IndexEntry) -> Self {
        Self {
            id: Some(entry.id.to_string().into()),
            vectors: Some(entry.vector.into()),
            payload: entry
                .payload
                .into_iter()
                .map(|(key, value)| (key, qdrant::Value::from(value)))
                .collect(),
        }
    }
}

impl From<PayloadValue> for qdrant::Value {
    fn from(value: PayloadValue) -> Self {
        match value {
            PayloadValue::Number(number) => qdrant::Value::from(number),
            PayloadValue::Text(text) => qdrant::Value::from(text),
        }
    }
}
