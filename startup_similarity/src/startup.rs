use std::sync::Arc;

use qdrant_client::prelude::{QdrantClient, QdrantClientConfig};
use secrecy::ExposeSecret;
use tracing::info;

use crate::{
    configuration::{EmbeddingSettings, QdrantSettings, Settings},
    domain::services::{
        mock_embedding::DeterministicMockProvider,
        remote_embedding::{RemoteEmbeddingProvider, RetryPolicy},
    },
    ports::{
        embedding_provider::{EmbeddingError, EmbeddingProvider},
        vector_index_store::VectorIndexStore,
    },
    repositories::index_entry_qdrant_repository::IndexEntryQdrantRepository,
    use_cases::{
        analyze_idea::IdeaAnalyzer,
        search_similar::SimilaritySearch,
        sync_dataset::{SyncConfig, SyncOrchestrator},
    },
};

/// Holds the use cases wired to their embedding providers and vector index
pub struct Application {
    settings: Settings,
    sync_orchestrator: SyncOrchestrator,
    similarity_search: Arc<SimilaritySearch>,
    idea_analyzer: IdeaAnalyzer,
}

impl Application {
    /// Builds the application on a Qdrant vector index
    #[tracing::instrument(name = "Building application", skip(settings))]
    pub async fn build(settings: Settings) -> Result<Self, ApplicationError> {
        let qdrant_client = get_qdrant_client(&settings.qdrant)?;
        let store = Arc::new(IndexEntryQdrantRepository::new(qdrant_client));
        Self::build_with_store(settings, store)
    }

    /// Builds the application on any vector index, ex: an in-memory one for tests
    pub fn build_with_store(
        settings: Settings,
        store: Arc<dyn VectorIndexStore>,
    ) -> Result<Self, ApplicationError> {
        // Sync is offline and can wait for the embedding service, queries must fail fast
        let sync_provider =
            get_embedding_provider(&settings.embedding, settings.embedding.retry_policy())?;
        let search_provider = get_embedding_provider(&settings.embedding, RetryPolicy::no_retry())?;
        info!(
            provider = sync_provider.identifier(),
            dimension = sync_provider.dimension(),
            "Embedding provider ready"
        );

        let sync_orchestrator = SyncOrchestrator::new(
            sync_provider,
            store.clone(),
            SyncConfig {
                collection: settings.qdrant.collection.clone(),
                batch_size: settings.embedding.batch_size,
                max_concurrency: settings.sync.max_concurrency,
            },
        );

        let similarity_search = Arc::new(SimilaritySearch::new(
            search_provider,
            store,
            settings.qdrant.collection.clone(),
            settings.search.timeout(),
        ));

        let idea_analyzer =
            IdeaAnalyzer::new(similarity_search.clone(), settings.search.default_top_k);

        Ok(Self {
            settings,
            sync_orchestrator,
            similarity_search,
            idea_analyzer,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sync_orchestrator(&self) -> &SyncOrchestrator {
        &self.sync_orchestrator
    }

    pub fn similarity_search(&self) -> &SimilaritySearch {
        &self.similarity_search
    }

    pub fn idea_analyzer(&self) -> &IdeaAnalyzer {
        &self.idea_analyzer
    }
}

/// Set up a client to Qdrant
pub fn get_qdrant_client(config: &QdrantSettings) -> Result<QdrantClient, ApplicationError> {
    let mut qdrant_config = QdrantClientConfig::from_url(&config.url);
    qdrant_config.timeout = config.timeout();
    qdrant_config.connect_timeout = config.timeout();
    qdrant_config.api_key = config
        .api_key
        .as_ref()
        .map(|api_key| api_key.expose_secret().clone());

    QdrantClient::new(Some(qdrant_config)).map_err(|e| ApplicationError::QdrantError(e.to_string()))
}

/// The deterministic mock when `use_mock` is set, the remote embeddings API otherwise
pub fn get_embedding_provider(
    config: &EmbeddingSettings,
    retry_policy: RetryPolicy,
) -> Result<Arc<dyn EmbeddingProvider>, ApplicationError> {
    if config.use_mock {
        return Ok(Arc::new(DeterministicMockProvider::new(config.dimension)));
    }
    Ok(Arc::new(RemoteEmbeddingProvider::try_new(
        config,
        retry_policy,
    )?))
}

#[derive(thiserror::Error)]
pub enum ApplicationError {
    #[error("Error from Qdrant: {0}")]
    QdrantError(String),
    #[error(transparent)]
    EmbeddingError(#[from] EmbeddingError),
}

impl std::fmt::Debug for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        common::helper::error_chain_fmt(self, f)
    }
}
