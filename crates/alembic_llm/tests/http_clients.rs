//! HTTP behavior of the embedding and distill clients against a mock server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use alembic_engine::{EmbeddingProvider, MergeProvider, ProviderError};
use alembic_llm::{DistillConfig, EmbeddingConfig, HttpEmbeddingClient, HttpMergeClient};
use alembic_protocol::types::{Block, BlockContent, BlockType};

fn embedding_config(base: &str, batch_size: usize, max_retries: u32) -> EmbeddingConfig {
    EmbeddingConfig {
        api_key: "test-key".to_string(),
        url: format!("{base}/v1/embeddings"),
        model: "test-embed".to_string(),
        batch_size,
        parallel: 4,
        max_retries,
        retry_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
    }
}

fn distill_config(base: &str, max_retries: u32) -> DistillConfig {
    DistillConfig {
        api_key: "test-key".to_string(),
        base_url: base.to_string(),
        model: "distill".to_string(),
        max_completion_tokens: 8192,
        request_timeout: Duration::from_secs(5),
        max_retries,
        retry_delay: Duration::ZERO,
    }
}

fn block(id: &str, name: &str) -> Block {
    Block {
        block_type: BlockType::Original,
        id: id.to_string(),
        content: BlockContent {
            name: name.to_string(),
            critical_question: format!("What is {name}?"),
            trusted_answer: format!("{name} explained."),
        },
        hidden: false,
        exported: false,
        reviewed: false,
        document_id: None,
        sources_used: None,
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[tokio::test]
async fn embeddings_preserve_order_across_batches() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({"input": ["alpha", "beta"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"embedding": [1.0, 0.0]},
                {"embedding": [0.0, 2.0]},
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({"input": ["gamma"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [3.0, 3.0]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(embedding_config(&server.uri(), 2, 1)).unwrap();
    let vectors = client
        .embed(vec![
            "alpha".to_string(),
            "beta".to_string(),
            "gamma".to_string(),
        ])
        .await
        .unwrap();

    assert_eq!(vectors.len(), 3);
    // Returned vectors are unit-normalized but keep input order.
    assert!((vectors[0][0] - 1.0).abs() < 1e-5);
    assert!((vectors[1][1] - 1.0).abs() < 1e-5);
    assert!((vectors[2][0] - vectors[2][1]).abs() < 1e-5);
    for vector in &vectors {
        assert!((norm(vector) - 1.0).abs() < 1e-4);
    }
}

#[tokio::test]
async fn embeddings_retry_transient_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [0.6, 0.8]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(embedding_config(&server.uri(), 10, 3)).unwrap();
    let vectors = client.embed(vec!["solo".to_string()]).await.unwrap();
    assert_eq!(vectors.len(), 1);
    assert!((vectors[0][0] - 0.6).abs() < 1e-5);
}

#[tokio::test]
async fn embedding_count_mismatch_is_a_format_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [1.0, 0.0]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(embedding_config(&server.uri(), 10, 1)).unwrap();
    let err = client
        .embed(vec!["one".to_string(), "two".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::ResponseFormat { .. }));
}

#[tokio::test]
async fn distill_retries_503_then_parses_two_blocks() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    let content = "<ideablock><name>First idea</name>\
                   <critical_question>Q1?</critical_question>\
                   <trusted_answer>A1.</trusted_answer></ideablock>\
                   <ideablock><name>Second idea</name>\
                   <critical_question>Q2?</critical_question>\
                   <trusted_answer>A2.</trusted_answer></ideablock>";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": content}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpMergeClient::new(distill_config(&server.uri(), 3)).unwrap();
    let merged = client
        .merge(&[block("1", "Python"), block("2", "Python 3")])
        .await
        .unwrap();

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].name, "First idea");
    assert_eq!(merged[1].trusted_answer, "A2.");
}

#[tokio::test]
async fn distill_sends_the_expected_chat_payload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "distill",
            "temperature": 0.5,
            "max_completion_tokens": 8192,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content":
                "<ideablock><name>N</name><critical_question>Q</critical_question><trusted_answer>A</trusted_answer></ideablock>"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpMergeClient::new(distill_config(&server.uri(), 1)).unwrap();
    let merged = client.merge(&[block("1", "Topic")]).await.unwrap();
    assert_eq!(merged.len(), 1);
}

#[tokio::test]
async fn distill_auth_failure_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpMergeClient::new(distill_config(&server.uri(), 5)).unwrap();
    let err = client.merge(&[block("1", "Topic")]).await.unwrap_err();
    assert!(matches!(err, ProviderError::Auth(_)));
}

#[tokio::test]
async fn unparseable_distill_content_exhausts_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "no structure at all"}}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = HttpMergeClient::new(distill_config(&server.uri(), 2)).unwrap();
    let err = client.merge(&[block("1", "Topic")]).await.unwrap_err();
    assert!(matches!(err, ProviderError::ResponseFormat { .. }));
}
