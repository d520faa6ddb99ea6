use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::CompletionError;
use super::stream::NdjsonStream;
use super::{Completion, CompletionOptions, CompletionService};
use crate::config::LlmConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    total_duration: Option<u64>,
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    response: Option<String>,
    #[serde(default)]
    done: bool,
    total_duration: Option<u64>,
    eval_count: Option<u32>,
}

/// HTTP client for an Ollama-compatible generate endpoint.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
    health_timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
}

impl OllamaClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, CompletionError> {
        // Per-attempt deadlines are applied around each request instead.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CompletionError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            health_timeout: Duration::from_millis(config.health_timeout_ms),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Delay slept before the given attempt (attempt 0 runs at once).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.backoff_base
                .saturating_mul(2u32.saturating_pow(attempt))
        }
    }

    async fn attempt(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, CompletionError> {
        let streaming = options.on_token.is_some();
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: streaming,
            options: GenerateOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        match &options.on_token {
            Some(sender) => Self::read_stream(response, sender).await,
            None => {
                let parsed: GenerateResponse = response
                    .json()
                    .await
                    .map_err(|e| CompletionError::Parse(e.to_string()))?;
                Ok(Completion {
                    text: parsed.response,
                    total_duration: parsed.total_duration,
                    token_count: parsed.eval_count,
                })
            }
        }
    }

    async fn read_stream(
        response: reqwest::Response,
        sender: &super::TokenSender,
    ) -> Result<Completion, CompletionError> {
        let mut chunks = NdjsonStream::<GenerateChunk>::new(response.bytes_stream());
        let mut completion = Completion::default();
        let mut tokens: u32 = 0;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if let Some(text) = chunk.response.filter(|t| !t.is_empty()) {
                completion.text.push_str(&text);
                tokens += 1;
                // A closed receiver only means nobody is watching progress.
                let _ = sender.send(tokens).await;
            }
            if chunk.done {
                completion.total_duration = chunk.total_duration;
                if let Some(count) = chunk.eval_count {
                    tokens = count;
                }
            }
        }

        completion.token_count = Some(tokens);
        Ok(completion)
    }
}

#[async_trait]
impl CompletionService for OllamaClient {
    async fn complete(
        &self,
        prompt: &str,
        options: CompletionOptions,
    ) -> Result<Completion, CompletionError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_for(attempt);
                debug!(
                    attempt,
                    max_retries = self.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying completion request"
                );
                tokio::time::sleep(delay).await;
            }

            let result = match tokio::time::timeout(self.timeout, self.attempt(prompt, &options)).await
            {
                Ok(result) => result,
                Err(_) => Err(CompletionError::Timeout(self.timeout)),
            };

            match result {
                Ok(completion) => return Ok(completion),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Completion request failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| CompletionError::Config("no completion attempts were made".to_string())))
    }

    async fn health_check(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send();
        match tokio::time::timeout(self.health_timeout, request).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(e)) => {
                debug!(error = %e, "Completion service health check failed");
                false
            }
            Err(_) => {
                debug!("Completion service health check timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    struct FakeServer {
        base_url: String,
        hits: Arc<AtomicUsize>,
        bodies: Arc<Mutex<Vec<String>>>,
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if data.len() >= head_end + 4 + length {
                    return text[head_end + 4..].to_string();
                }
            }
        }
        String::new()
    }

    /// Serves the canned responses in order, one per connection.
    async fn serve(responses: Vec<String>) -> FakeServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));

        let counter = hits.clone();
        let seen = bodies.clone();
        tokio::spawn(async move {
            let mut responses = responses.into_iter();
            while let Ok((mut socket, _)) = listener.accept().await {
                let body = read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(body);
                let reply = responses
                    .next()
                    .unwrap_or_else(|| http_response("500 Internal Server Error", "exhausted"));
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        FakeServer {
            base_url: format!("http://{}", addr),
            hits,
            bodies,
        }
    }

    fn client_for(server: &FakeServer) -> OllamaClient {
        OllamaClient::from_config(&LlmConfig {
            service_url: server.base_url.clone(),
            model: "llama3:8b".to_string(),
            timeout_ms: 2_000,
            health_timeout_ms: 500,
            max_retries: 2,
            retry_backoff_ms: 1,
            temperature: 0.1,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_single_request() {
        let server = serve(vec![http_response(
            "200 OK",
            r#"{"response":"hello","total_duration":1234,"eval_count":7}"#,
        )])
        .await;
        let client = client_for(&server);

        let completion = client
            .complete("prompt", CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(completion.text, "hello");
        assert_eq!(completion.total_duration, Some(1234));
        assert_eq!(completion.token_count, Some(7));
        assert_eq!(server.hits.load(Ordering::SeqCst), 1);

        let body = server.bodies.lock().unwrap()[0].clone();
        assert!(body.contains(r#""model":"llama3:8b""#));
        assert!(body.contains(r#""stream":false"#));
        assert!(!body.contains("num_predict"));
    }

    #[tokio::test]
    async fn test_retry_then_succeed_uses_three_requests() {
        let server = serve(vec![
            http_response("500 Internal Server Error", "busy"),
            http_response("503 Service Unavailable", "loading"),
            http_response("200 OK", r#"{"response":"Success after retries"}"#),
        ])
        .await;
        let client = client_for(&server);

        let completion = client
            .complete("prompt", CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(completion.text, "Success after retries");
        assert_eq!(server.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fails_after_max_retries_with_last_error() {
        let server = serve(vec![
            http_response("500 Internal Server Error", "first"),
            http_response("500 Internal Server Error", "second"),
            http_response("502 Bad Gateway", "third"),
        ])
        .await;
        let client = client_for(&server);

        let err = client
            .complete("prompt", CompletionOptions::default())
            .await
            .unwrap_err();

        assert_eq!(server.hits.load(Ordering::SeqCst), 3);
        match err {
            CompletionError::Api { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "third");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_streaming_accumulates_and_reports_tokens() {
        let ndjson = concat!(
            "{\"response\":\"{\\\"store\",\"done\":false}\n",
            "garbage line\n",
            "{\"response\":\"Name\\\"\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":false}\n",
            "{\"response\":\"}\",\"done\":true,\"total_duration\":99,\"eval_count\":42}\n"
        );
        let server = serve(vec![http_response("200 OK", ndjson)]).await;
        let client = client_for(&server);

        let (tx, mut rx) = mpsc::channel(16);
        let options = CompletionOptions {
            temperature: 0.1,
            max_tokens: Some(600),
            on_token: Some(tx),
        };
        let completion = client.complete("prompt", options).await.unwrap();

        assert_eq!(completion.text, "{\"storeName\"}");
        assert_eq!(completion.total_duration, Some(99));
        assert_eq!(completion.token_count, Some(42));

        let mut counts = Vec::new();
        while let Ok(count) = rx.try_recv() {
            counts.push(count);
        }
        assert_eq!(counts, vec![1, 2, 3]);

        let body = server.bodies.lock().unwrap()[0].clone();
        assert!(body.contains(r#""stream":true"#));
        assert!(body.contains(r#""num_predict":600"#));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = serve(vec![http_response("200 OK", r#"{"models":[]}"#)]).await;
        assert!(client_for(&server).health_check().await);

        let down = client_for(&FakeServer {
            base_url: "http://127.0.0.1:9".to_string(),
            hits: Arc::new(AtomicUsize::new(0)),
            bodies: Arc::new(Mutex::new(Vec::new())),
        });
        assert!(!down.health_check().await);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                // Never answer.
                held.push(socket);
            }
        });

        let client = OllamaClient::from_config(&LlmConfig {
            service_url: format!("http://{}", addr),
            timeout_ms: 100,
            max_retries: 1,
            retry_backoff_ms: 1,
            ..Default::default()
        })
        .unwrap();

        let err = client
            .complete("prompt", CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Timeout(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_doubles() {
        let client = OllamaClient::from_config(&LlmConfig::default()).unwrap();
        assert_eq!(client.backoff_for(0), Duration::ZERO);
        assert_eq!(client.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(client.backoff_for(2), Duration::from_millis(2000));
        assert_eq!(client.model(), "qwen2.5:3b");
    }
}
