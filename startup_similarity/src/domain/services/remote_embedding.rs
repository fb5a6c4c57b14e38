use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, warn};

use crate::{
    configuration::EmbeddingSettings,
    domain::entities::index_entry::Embeddings,
    ports::embedding_provider::{EmbeddingCallError, EmbeddingError, EmbeddingProvider},
};

/// Exponential backoff applied to transient failures of the embedding service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts the first call, and is at least 1
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// A single attempt: used on the query path which must fail fast
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the failed attempt number `attempt` (starting at 1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Embeddings,
}

/// Client of an OpenAI-compatible `/embeddings` endpoint (Mistral, OpenAI, ...)
pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<Secret<String>>,
    model: String,
    identifier: String,
    dimension: usize,
    batch_size: usize,
    retry_policy: RetryPolicy,
    min_interval: Option<Duration>,
    /// Time of the last request, only locked while waiting for the throttle
    last_request: Mutex<Option<Instant>>,
}

impl RemoteEmbeddingProvider {
    /// Builds the HTTP client of the provider.
    ///
    /// The identifier is `remote:<model>`. Vectors of two models are not comparable, so a
    /// collection built with another model has to be rebuilt by a forced sync.
    /// A `requests_per_second` of 0 disables the throttle.
    pub fn try_new(
        settings: &EmbeddingSettings,
        retry_policy: RetryPolicy,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(EmbeddingCallError::from)
            .map_err(EmbeddingError::Rejected)?;

        let min_interval = (settings.requests_per_second > 0.0)
            .then(|| Duration::from_secs_f64(1.0 / settings.requests_per_second));

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", settings.api_url.trim_end_matches('/')),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            identifier: format!("remote:{}", settings.model),
            dimension: settings.dimension,
            batch_size: settings.batch_size.max(1),
            retry_policy,
            min_interval,
            last_request: Mutex::new(None),
        })
    }

    /// Waits until the configured request rate allows a new call
    async fn throttle(&self) {
        let Some(min_interval) = self.min_interval else {
            return;
        };

        let mut last_request = self.last_request.lock().await;
        if let Some(last) = *last_request {
            tokio::time::sleep_until(last + min_interval).await;
        }
        *last_request = Some(Instant::now());
    }

    async fn send(&self, texts: &[String]) -> Result<EmbeddingsResponse, EmbeddingCallError> {
        self.throttle().await;

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingsRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingCallError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<EmbeddingsResponse>().await?)
    }

    /// One request for a chunk, retried on transient failures
    #[tracing::instrument(name = "Requesting remote embeddings", skip(self, texts), fields(count = texts.len()))]
    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Embeddings>, EmbeddingError> {
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.send(texts).await {
                Ok(response) => break response,
                Err(error)
                    if error.is_transient() && attempt < self.retry_policy.max_attempts() =>
                {
                    let delay = self.retry_policy.backoff(attempt);
                    warn!(?error, attempt, ?delay, "Transient embedding failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(error) if error.is_transient() => {
                    return Err(EmbeddingError::RetriesExhausted {
                        attempts: attempt,
                        source: error,
                    })
                }
                Err(EmbeddingCallError::Http(error)) if error.is_decode() => {
                    return Err(EmbeddingError::InvalidResponse(error.to_string()))
                }
                Err(error) => return Err(EmbeddingError::Rejected(error)),
            }
        };

        self.into_vectors(texts.len(), response)
    }

    /// Orders the returned vectors as the inputs and checks their count and dimension
    fn into_vectors(
        &self,
        expected: usize,
        response: EmbeddingsResponse,
    ) -> Result<Vec<Embeddings>, EmbeddingError> {
        let data = response.data;
        if data.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                received: data.len(),
            });
        }

        order_by_index(data)?
            .into_iter()
            .map(|item| {
                if item.embedding.len() == self.dimension {
                    Ok(item.embedding)
                } else {
                    Err(EmbeddingError::DimensionMismatch {
                        expected: self.dimension,
                        received: item.embedding.len(),
                    })
                }
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    /// Sends the texts in chunks of `batch_size`. Any failing chunk fails the whole call.
    ///
    /// A chunk still rate limited once its retries are spent is halved, and the rest of
    /// the call goes on with the smaller chunks. Only a single-text chunk fails on 429.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embeddings>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut chunk_size = self.batch_size.max(1);
        let mut start = 0;

        while start < texts.len() {
            let chunk = &texts[start..texts.len().min(start + chunk_size)];
            match self.embed_chunk(chunk).await {
                Ok(chunk_vectors) => {
                    vectors.extend(chunk_vectors);
                    start += chunk.len();
                }
                Err(error) if error.is_rate_limited() && chunk.len() > 1 => {
                    chunk_size = (chunk.len() / 2).max(1);
                    warn!(
                        chunk_size,
                        "Embedding service is rate limiting, sending smaller chunks"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        debug!(count = vectors.len(), "Generated remote embeddings");
        Ok(vectors)
    }
}

/// Orders the items by their `index`, which must then name every input position once.
/// Items without any index are kept in the order received.
fn order_by_index(mut data: Vec<EmbeddingData>) -> Result<Vec<EmbeddingData>, EmbeddingError> {
    if data.iter().all(|item| item.index.is_none()) {
        return Ok(data);
    }

    data.sort_by_key(|item| item.index);
    let is_permutation = data
        .iter()
        .enumerate()
        .all(|(position, item)| item.index == Some(position));
    if !is_permutation {
        let indices: Vec<Option<usize>> = data.iter().map(|item| item.index).collect();
        return Err(EmbeddingError::InvalidResponse(format!(
            "indices {:?} do not match the {} inputs",
            indices,
            data.len()
        )));
    }
    Ok(data)
}
