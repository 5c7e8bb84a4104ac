//! HTTP embedding client (OpenAI-compatible endpoint).

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use alembic_engine::{EmbeddingProvider, ProviderError};
use alembic_protocol::settings::Settings;

use crate::retry::with_retries;

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub url: String,
    pub model: String,
    /// Max texts per request.
    pub batch_size: usize,
    /// Max requests in flight.
    pub parallel: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl EmbeddingConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_key: settings.embedding_api_key.clone(),
            url: settings.embedding_url.clone(),
            model: settings.embedding_model.clone(),
            batch_size: settings.embedding_batch_size,
            parallel: settings.embedding_parallel,
            max_retries: settings.llm_max_retries,
            retry_delay: Duration::from_secs_f64(settings.llm_retry_delay_seconds),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

pub struct HttpEmbeddingClient {
    config: EmbeddingConfig,
    http: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        let permits = Arc::new(Semaphore::new(config.parallel.max(1)));
        Ok(Self {
            config,
            http,
            permits,
        })
    }

    async fn embed_batch(
        &self,
        batch_index: usize,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        with_retries(self.config.max_retries, self.config.retry_delay, |_| {
            let client = &self.http;
            let config = &self.config;
            async move {
                debug!(batch = batch_index, count = texts.len(), "requesting embeddings batch");
                let response = client
                    .post(&config.url)
                    .bearer_auth(&config.api_key)
                    .json(&json!({"input": texts, "model": config.model}))
                    .send()
                    .await
                    .map_err(|e| ProviderError::Http(e.to_string()))?;

                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| ProviderError::Http(e.to_string()))?;
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    return Err(ProviderError::Auth(format!(
                        "embedding endpoint rejected credentials ({status})"
                    )));
                }
                if !status.is_success() {
                    return Err(ProviderError::Provider(format!(
                        "embedding endpoint returned {status}: {}",
                        snippet(&body)
                    )));
                }

                let parsed: EmbeddingResponse =
                    serde_json::from_str(&body).map_err(|e| ProviderError::ResponseFormat {
                        message: format!("invalid embedding response: {e}"),
                        raw_response: snippet(&body),
                    })?;
                if parsed.data.len() != texts.len() {
                    return Err(ProviderError::ResponseFormat {
                        message: format!(
                            "embedding count mismatch: sent {}, received {}",
                            texts.len(),
                            parsed.data.len()
                        ),
                        raw_response: snippet(&body),
                    });
                }
                Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
            }
        })
        .await
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<&[String]> = texts.chunks(self.config.batch_size.max(1)).collect();
        info!(
            count = texts.len(),
            num_batches = batches.len(),
            model = %self.config.model,
            "generating embeddings"
        );

        // join_all preserves batch order, so the concatenation below
        // reassembles the input order even though requests overlap.
        let results = join_all(batches.iter().enumerate().map(|(index, batch)| async move {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| ProviderError::Provider("embedding pool closed".to_string()))?;
            self.embed_batch(index, batch).await
        }))
        .await;

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for result in results {
            vectors.extend(result?);
        }

        let dim = vectors.first().map(Vec::len).unwrap_or(0);
        for vector in &mut vectors {
            if vector.len() != dim {
                return Err(ProviderError::ResponseFormat {
                    message: format!(
                        "embedding dimension mismatch: expected {dim}, got {}",
                        vector.len()
                    ),
                    raw_response: String::new(),
                });
            }
            let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for value in vector.iter_mut() {
                    *value /= norm;
                }
            }
        }
        Ok(vectors)
    }
}

fn snippet(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
