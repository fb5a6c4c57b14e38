use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use secrecy::Secret;
use serde_json::{json, Value};
use startup_similarity::{
    configuration::EmbeddingSettings,
    domain::services::remote_embedding::{RemoteEmbeddingProvider, RetryPolicy},
    ports::embedding_provider::{EmbeddingCallError, EmbeddingError, EmbeddingProvider},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

const DIMENSION: usize = 3;

/// Minimal HTTP server answering each request with the next scripted status.
///
/// Successful answers embed every input text as `[index, 0, 1]`, listed in reverse order
/// to check the client reorders them.
struct EmbeddingServer {
    base_url: String,
    requests: Arc<AtomicUsize>,
    max_batch: Arc<AtomicUsize>,
}

impl EmbeddingServer {
    async fn start(statuses: Vec<u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(AtomicUsize::new(0));
        let max_batch = Arc::new(AtomicUsize::new(0));

        let counter = requests.clone();
        let batch_sizes = max_batch.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(index).copied().unwrap_or(200);
                respond(stream, status, batch_sizes.clone()).await;
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{}/v1", port),
            requests,
            max_batch,
        }
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn settings(&self) -> EmbeddingSettings {
        EmbeddingSettings {
            use_mock: false,
            api_url: self.base_url.clone(),
            api_key: Some(Secret::new("test-key".into())),
            model: "test-embed".into(),
            dimension: DIMENSION,
            batch_size: 2,
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            timeout_secs: 5,
            requests_per_second: 0.0,
        }
    }

    fn provider(&self) -> RemoteEmbeddingProvider {
        let settings = self.settings();
        RemoteEmbeddingProvider::try_new(&settings, settings.retry_policy())
            .expect("Failed to build provider")
    }
}

async fn respond(mut stream: TcpStream, status: u16, max_batch: Arc<AtomicUsize>) {
    let Some(body) = read_request_body(&mut stream).await else {
        return;
    };

    let (reason, payload) = if status == 200 {
        let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let count = request["input"].as_array().map(Vec::len).unwrap_or(0);
        max_batch.fetch_max(count, Ordering::SeqCst);
        let data: Vec<Value> = (0..count)
            .rev()
            .map(|index| json!({"index": index, "embedding": [index as f32, 0.0, 1.0]}))
            .collect();
        ("OK", json!({ "data": data }).to_string())
    } else {
        ("Error", json!({ "message": "scripted failure" }).to_string())
    };

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        payload.len(),
        payload
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Reads the headers, then as many body bytes as `Content-Length` announces
async fn read_request_body(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let headers_end = loop {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(position) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buffer[..headers_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < headers_end + content_length {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
    Some(buffer[headers_end..].to_vec())
}

fn texts(count: usize) -> Vec<String> {
    (0..count).map(|index| format!("startup pitch {}", index)).collect()
}

#[tokio::test]
async fn vectors_are_returned_in_input_order() {
    let server = EmbeddingServer::start(vec![]).await;

    let vectors = server.provider().embed_batch(&texts(2)).await.unwrap();

    assert_eq!(vectors, vec![vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 1.0]]);
}

#[tokio::test]
async fn large_batches_are_sent_in_chunks() {
    let server = EmbeddingServer::start(vec![]).await;

    let vectors = server.provider().embed_batch(&texts(5)).await.unwrap();

    assert_eq!(vectors.len(), 5);
    assert_eq!(server.requests(), 3);
    assert_eq!(server.max_batch.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let server = EmbeddingServer::start(vec![503, 429]).await;

    let vectors = server.provider().embed_batch(&texts(1)).await.unwrap();

    assert_eq!(vectors.len(), 1);
    assert_eq!(server.requests(), 3);
}

#[tokio::test]
async fn retries_stop_after_the_maximum_attempts() {
    let server = EmbeddingServer::start(vec![500, 502, 503, 200]).await;

    let result = server.provider().embed_batch(&texts(1)).await;

    assert!(matches!(
        result,
        Err(EmbeddingError::RetriesExhausted {
            attempts: 3,
            source: EmbeddingCallError::Status { status: 503, .. }
        })
    ));
    assert_eq!(server.requests(), 3);
}

#[tokio::test]
async fn a_rate_limited_chunk_is_split_in_halves() {
    // Every attempt at the chunk of 4 is throttled, then the halves go through
    let server = EmbeddingServer::start(vec![429, 429, 429]).await;
    let mut settings = server.settings();
    settings.batch_size = 4;
    let provider = RemoteEmbeddingProvider::try_new(&settings, settings.retry_policy()).unwrap();

    let vectors = provider.embed_batch(&texts(4)).await.unwrap();

    assert_eq!(
        vectors,
        vec![
            vec![0.0, 0.0, 1.0],
            vec![1.0, 0.0, 1.0],
            vec![0.0, 0.0, 1.0],
            vec![1.0, 0.0, 1.0],
        ]
    );
    assert_eq!(server.requests(), 5);
    assert_eq!(server.max_batch.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn a_rate_limited_single_text_fails() {
    let server = EmbeddingServer::start(vec![429, 429, 429]).await;

    let result = server.provider().embed_batch(&texts(1)).await;

    assert!(matches!(
        result,
        Err(EmbeddingError::RetriesExhausted {
            source: EmbeddingCallError::Status { status: 429, .. },
            ..
        })
    ));
    assert_eq!(server.requests(), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = EmbeddingServer::start(vec![400]).await;

    let result = server.provider().embed_batch(&texts(1)).await;

    assert!(matches!(
        result,
        Err(EmbeddingError::Rejected(EmbeddingCallError::Status {
            status: 400,
            ..
        }))
    ));
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn a_provider_without_retries_fails_on_the_first_transient_error() {
    let server = EmbeddingServer::start(vec![503]).await;
    let provider = RemoteEmbeddingProvider::try_new(&server.settings(), RetryPolicy::no_retry())
        .expect("Failed to build provider");

    let result = provider.embed("an idea").await;

    assert!(matches!(
        result,
        Err(EmbeddingError::RetriesExhausted { attempts: 1, .. })
    ));
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn an_unreachable_service_is_a_transient_failure() {
    // Nothing listens on this port once the listener is dropped
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let server = EmbeddingServer::start(vec![]).await;
    let mut settings = server.settings();
    settings.api_url = format!("http://127.0.0.1:{}/v1", port);
    let provider = RemoteEmbeddingProvider::try_new(
        &settings,
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
    )
    .unwrap();

    let result = provider.embed("an idea").await;

    assert!(matches!(
        result,
        Err(EmbeddingError::RetriesExhausted { attempts: 2, .. })
    ));
}

#[tokio::test]
async fn requests_are_spaced_by_the_rate_limit() {
    let server = EmbeddingServer::start(vec![]).await;
    let mut settings = server.settings();
    settings.requests_per_second = 20.0;
    let provider = RemoteEmbeddingProvider::try_new(&settings, RetryPolicy::no_retry()).unwrap();

    let started = tokio::time::Instant::now();
    provider.embed_batch(&texts(6)).await.unwrap();

    // Three requests, two waits of 50 ms
    assert!(started.elapsed() >= Duration::from_millis(100));
}
