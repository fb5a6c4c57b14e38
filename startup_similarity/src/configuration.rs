use std::path::PathBuf;
use std::time::Duration;

use common::telemetry::LogFormat;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::{deserialize_bool_from_anything, deserialize_number_from_string};

use crate::domain::services::remote_embedding::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub dataset: DatasetSettings,
    pub qdrant: QdrantSettings,
    pub embedding: EmbeddingSettings,
    pub sync: SyncSettings,
    pub search: SearchSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub name: String,
    /// Used when RUST_LOG is not set
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetSettings {
    /// CSV file with at least a `name` and a `description` column
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QdrantSettings {
    /// gRPC endpoint, ex: http://localhost:6334
    pub url: String,
    pub api_key: Option<Secret<String>>,
    pub collection: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_secs: u64,
}

impl QdrantSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingSettings {
    /// Selects the deterministic mock provider: no network, scores are not meaningful
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub use_mock: bool,
    /// Base URL of an OpenAI-compatible embeddings API, ex: https://api.mistral.ai/v1
    pub api_url: String,
    pub api_key: Option<Secret<String>>,
    pub model: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub dimension: usize,
    /// Maximum number of texts per request
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub batch_size: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_attempts: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub initial_backoff_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_backoff_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_secs: u64,
    /// Client-side throttling of the embeddings API. 0 disables it.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub requests_per_second: f64,
}

impl EmbeddingSettings {
    /// Retries used on the sync path
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    /// Embedding batches in flight at the same time
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_concurrency: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub default_top_k: usize,
    /// Upper bound of a whole similarity search, embedding included
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_ms: u64,
}

impl SearchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Extracts app settings from configuration files and env variables
///
/// `base.yaml` should contain shared settings for all environments.
/// A specific env file exists for each environment: `local.yaml` and `production.yaml`
/// The environment is set with the env var `APP_ENVIRONMENT`.
/// If `APP_ENVIRONMENT` is not set, `local.yaml` is the default.
///
/// Settings are also taken from environment variables: with a prefix of APP and '__' as separator
/// For ex: `APP_QDRANT__URL=http://qdrant:6334` would set `Settings.qdrant.url`
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("No current directory: {}", e)))?;
    get_configuration_from(&base_path.join("configuration"))
}

/// Same as `get_configuration`, reading the yaml files from `configuration_directory`
pub fn get_configuration_from(
    configuration_directory: &std::path::Path,
) -> Result<Settings, config::ConfigError> {
    // Detects the running environment.
    // Default to `local` if unspecified.
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        // Adds in settings from environment variables (with a prefix of APP and '__' as separator)
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

/// The possible runtime environment for our application.
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}
