//! HTTP client for the Blockify-style distill endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use alembic_engine::{MergeProvider, ProviderError};
use alembic_protocol::settings::Settings;
use alembic_protocol::types::{Block, BlockContent};

use crate::parse::parse_ideablocks;
use crate::retry::with_retries;

#[derive(Debug, Clone)]
pub struct DistillConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_completion_tokens: u32,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl DistillConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_key: settings.llm_api_key.clone(),
            base_url: settings.llm_base_url.clone(),
            model: settings.llm_model.clone(),
            max_completion_tokens: settings.llm_max_completion_tokens,
            request_timeout: Duration::from_secs(settings.llm_request_timeout_seconds),
            max_retries: settings.llm_max_retries,
            retry_delay: Duration::from_secs_f64(settings.llm_retry_delay_seconds),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Serialize a cluster as concatenated `<ideablock>` fragments: this is the
/// whole prompt, the distill model needs no further instructions.
pub fn merge_prompt(blocks: &[Block]) -> String {
    let mut prompt = String::new();
    for block in blocks {
        prompt.push_str("<ideablock>");
        prompt.push_str("<name>");
        prompt.push_str(&block.content.name);
        prompt.push_str("</name>");
        prompt.push_str("<critical_question>");
        prompt.push_str(&block.content.critical_question);
        prompt.push_str("</critical_question>");
        prompt.push_str("<trusted_answer>");
        prompt.push_str(&block.content.trusted_answer);
        prompt.push_str("</trusted_answer>");
        prompt.push_str("</ideablock>");
    }
    prompt
}

pub struct HttpMergeClient {
    config: DistillConfig,
    http: reqwest::Client,
}

impl HttpMergeClient {
    pub fn new(config: DistillConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn call_distill(&self, prompt: &str) -> Result<String, ProviderError> {
        let payload = json!({
            "model": self.config.model,
            "messages": [{"role": "system", "content": prompt}],
            "response_format": {"type": "text"},
            "temperature": 0.5,
            "max_completion_tokens": self.config.max_completion_tokens,
            "top_p": 1,
            "frequency_penalty": 0,
            "presence_penalty": 0,
        });

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&payload)
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
                "distill endpoint rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::Provider(format!(
                "distill endpoint returned {status}: {}",
                snippet(&body)
            )));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::ResponseFormat {
                message: format!("invalid chat completion response: {e}"),
                raw_response: snippet(&body),
            })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(ProviderError::ResponseFormat {
                message: "chat completion contained no content".to_string(),
                raw_response: snippet(&body),
            });
        }
        Ok(content)
    }
}

#[async_trait]
impl MergeProvider for HttpMergeClient {
    async fn merge(&self, blocks: &[Block]) -> Result<Vec<BlockContent>, ProviderError> {
        let prompt = merge_prompt(blocks);
        debug!(
            cluster_size = blocks.len(),
            prompt_len = prompt.len(),
            "sending merge request"
        );

        let merged = with_retries(self.config.max_retries, self.config.retry_delay, |_| {
            let prompt = &prompt;
            async move {
                let content = self.call_distill(prompt).await?;
                let parsed = parse_ideablocks(&content);
                if parsed.is_empty() {
                    return Err(ProviderError::ResponseFormat {
                        message: "no valid ideablock in distill response".to_string(),
                        raw_response: snippet(&content),
                    });
                }
                Ok(parsed)
            }
        })
        .await?;

        info!(
            cluster_size = blocks.len(),
            result_blocks = merged.len(),
            "merged cluster"
        );
        Ok(merged)
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

#[cfg(test)]
mod tests {
    use super::*;
    use alembic_protocol::types::BlockType;

    #[test]
    fn prompt_concatenates_fragments_without_separators() {
        let blocks = vec![
            Block {
                block_type: BlockType::Original,
                id: "1".to_string(),
                content: BlockContent {
                    name: "A".to_string(),
                    critical_question: "Q1".to_string(),
                    trusted_answer: "T1".to_string(),
                },
                hidden: false,
                exported: false,
                reviewed: false,
                document_id: None,
                sources_used: None,
            },
            Block {
                block_type: BlockType::Original,
                id: "2".to_string(),
                content: BlockContent {
                    name: "B".to_string(),
                    critical_question: "Q2".to_string(),
                    trusted_answer: "T2".to_string(),
                },
                hidden: false,
                exported: false,
                reviewed: false,
                document_id: None,
                sources_used: None,
            },
        ];
        let prompt = merge_prompt(&blocks);
        assert_eq!(
            prompt,
            "<ideablock><name>A</name><critical_question>Q1</critical_question>\
             <trusted_answer>T1</trusted_answer></ideablock>\
             <ideablock><name>B</name><critical_question>Q2</critical_question>\
             <trusted_answer>T2</trusted_answer></ideablock>"
        );
    }
}
