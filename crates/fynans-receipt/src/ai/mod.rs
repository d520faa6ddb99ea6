//! Access to the generative text model.

use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod error;
pub mod ollama;
pub mod stream;

pub use error::CompletionError;
pub use ollama::OllamaClient;
pub use stream::NdjsonStream;

/// Receives the running token count of a streamed completion.
pub type TokenSender = mpsc::Sender<u32>;

#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// When set, the request is streamed and each chunk with new text sends
    /// the token count so far.
    pub on_token: Option<TokenSender>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: None,
            on_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Completion {
    pub text: String,
    /// Generation time in nanoseconds, as reported by the model server.
    pub total_duration: Option<u64>,
    pub token_count: Option<u32>,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        options: CompletionOptions,
    ) -> Result<Completion, CompletionError>;

    /// Never errors; an unreachable service is simply unhealthy.
    async fn health_check(&self) -> bool;
}
