use serde::Deserialize;
use tracing::subscriber::{set_global_default, SetGlobalDefaultError};
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::{log::SetLoggerError, LogTracer};
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry};

use crate::helper::error_chain_fmt;

/// How log records are rendered
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Bunyan-compatible JSON lines, one per event, spans flattened into each record
    #[default]
    Bunyan,
    /// Single-line human readable output, for local runs
    Compact,
}

/// Composes the layers of our `tracing` Subscriber.
///
/// The Subscriber trait covers every stage of the lifecycle of a span: creation,
/// enter/exit, closure, and the events recorded inside it.
///
/// `tracing-subscriber` lets us stack Layers into the processing pipeline we need.
/// Its `Registry` sits at the bottom: it stores span metadata, records the parent/child
/// relationships between spans and tracks which of them are still open. Every layer
/// wrapping it reads span data from there.
///
/// # Arguments
/// - `name`: name of the app, reported in every bunyan record
/// - `fallback_env_filter`: filter used if the RUST_LOG env variable has not been set
/// - `format`: bunyan JSON or compact text
/// - `sink`: to what the traces will be outputted
///
/// The concrete subscriber type differs by format, hence the boxed return type.
pub fn get_tracing_subscriber<Sink>(
    name: String,
    fallback_env_filter: String,
    format: LogFormat,
    sink: Sink,
) -> Box<dyn Subscriber + Send + Sync>
where
    // The sink implements `MakeWriter` for every lifetime `'a` (higher-ranked trait bound)
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    // Falls back to `fallback_env_filter` if the RUST_LOG env variable has not been set
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_env_filter));

    // Discards spans and events based on their level and their origin
    let registry = Registry::default().with(env_filter);

    match format {
        LogFormat::Bunyan => Box::new(
            registry
                // Stores the fields of each span as JSON and propagates them to child spans
                .with(JsonStorageLayer)
                // Reads from `JsonStorageLayer` and writes one bunyan record per event
                .with(BunyanFormattingLayer::new(name, sink)),
        ),
        // Plain `fmt` layer, the span fields are printed before each event
        LogFormat::Compact => Box::new(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(sink),
            ),
        ),
    }
}

/// Registers a Subscriber as the global default and redirects `log` records to it.
///
/// It should only be called once per process.
pub fn init_tracing_subscriber(
    subscriber: Box<dyn Subscriber + Send + Sync>,
) -> Result<(), TelemetryError> {
    // Redirects the events of crates logging through `log` (reqwest, hyper, ...)
    LogTracer::init()?;
    set_global_default(subscriber)?;
    Ok(())
}

#[derive(thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to redirect log records to tracing")]
    Logger(#[from] SetLoggerError),
    #[error("A global tracing subscriber was already set")]
    Subscriber(#[from] SetGlobalDefaultError),
}

impl std::fmt::Debug for TelemetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
