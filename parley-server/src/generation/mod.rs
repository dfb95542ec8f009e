//! Text-generation runtime seam.
//!
//! The turn coordinator only knows [`Generator`]: give it a model id and the
//! prompt messages, get back a lazy, finite, non-restartable stream of text
//! fragments that may fail part-way. [`OllamaClient`] is the production
//! implementation.

pub mod ollama;

pub use ollama::OllamaClient;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::Role;

/// One role/content pair of the prompt context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Incremental generator output.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

#[derive(Debug, Error)]
pub enum GenerationError {
    /// The HTTP exchange with the runtime failed (connect, read, …).
    #[error("generation request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The runtime refused the request.
    #[error("generation runtime returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// A streamed chunk could not be decoded.
    #[error("malformed generation chunk: {0}")]
    Decode(#[from] serde_json::Error),

    /// The runtime reported an error in-band.
    #[error("{0}")]
    Runtime(String),

    #[error("generation task panicked")]
    Panicked,
}

#[async_trait]
pub trait Generator: Send + Sync + 'static {
    /// Start generating a reply to `messages` with `model`.
    ///
    /// Errors returned here mean generation never started; errors yielded by
    /// the stream mean it stopped part-way.
    async fn generate(
        &self,
        model: &str,
        messages: &[PromptMessage],
    ) -> Result<FragmentStream, GenerationError>;
}
