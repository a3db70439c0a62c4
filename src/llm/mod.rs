use async_trait::async_trait;

use crate::models::Interaction;

pub mod client;

pub use client::LlmClient;

/// Everything the model sees for one question.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub facts: Vec<String>,
    /// Prior conversation, oldest first.
    pub history: Vec<Interaction>,
    pub question: String,
}

/// The external model. The router only depends on this seam.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<String>;
}
