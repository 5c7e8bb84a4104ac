//! Contracts for the engine's remote collaborators.

use async_trait::async_trait;
use thiserror::Error;

use alembic_protocol::types::{Block, BlockContent};

/// Errors surfaced by the embedding and distill providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(String),
    /// Authentication or authorization rejected by the endpoint.
    #[error("Auth error: {0}")]
    Auth(String),
    /// The request was malformed or unsupported.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// The endpoint answered with a non-success status.
    #[error("Provider error: {0}")]
    Provider(String),
    /// The endpoint answered 2xx but the payload was unusable.
    #[error("Response format error: {message}")]
    ResponseFormat { message: String, raw_response: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether a retry can plausibly succeed. Auth and request-shape errors
    /// are permanent; everything else is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Auth(_) | ProviderError::InvalidRequest(_))
    }
}

/// Remote service turning texts into unit-norm embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Return one vector per input text, in input order, all of the same
    /// dimension and unit L2 norm. An empty input yields an empty output.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Remote LLM synthesizing an ordered cluster of blocks into one or more
/// merged knowledge triples.
#[async_trait]
pub trait MergeProvider: Send + Sync {
    /// Merge the cluster. A successful result is never empty; multiple
    /// entries mean the model judged the cluster to hold distinct ideas.
    async fn merge(&self, blocks: &[Block]) -> Result<Vec<BlockContent>, ProviderError>;
}
