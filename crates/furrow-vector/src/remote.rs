//! Remote text embeddings via an OpenAI-compatible `/embeddings` endpoint.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use furrow_core::config::EmbeddingConfig;
use furrow_core::error::FurrowError;

use crate::embedding::EmbeddingService;

/// Dimensionality of `text-embedding-3-small`.
pub const REMOTE_DIMENSIONS: usize = 1536;

/// Configuration for the remote embedding client.
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingConfig {
    /// API base URL (e.g., "https://api.openai.com/v1")
    pub base_url: String,

    /// Embedding model identifier
    pub model: String,

    /// API key
    pub api_key: SecretString,

    /// Request timeout
    pub timeout: Duration,
}

impl RemoteEmbeddingConfig {
    pub fn from_config(config: &EmbeddingConfig, api_key: SecretString) -> Self {
        Self {
            base_url: config.remote_base_url.trim_end_matches('/').to_string(),
            model: config.remote_model.clone(),
            api_key,
            timeout: Duration::from_secs(config.remote_timeout_secs.max(1)),
        }
    }
}

/// Embedding service backed by a hosted API.
///
/// One request per call; failures are returned immediately.
pub struct OpenAiEmbeddingService {
    client: Client,
    config: RemoteEmbeddingConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingService {
    pub fn new(config: RemoteEmbeddingConfig) -> Result<Self, FurrowError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FurrowError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for OpenAiEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingService")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

impl EmbeddingService for OpenAiEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, FurrowError> {
        if text.trim().is_empty() {
            return Err(FurrowError::EmptyInput);
        }

        let url = format!("{}/embeddings", self.config.base_url);
        debug!(model = %self.config.model, chars = text.len(), "Calling remote embedding API");

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.expose_secret()),
            )
            .json(&EmbeddingRequest {
                model: &self.config.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| FurrowError::ProviderUnavailable(format!("remote request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FurrowError::ProviderUnavailable(format!(
                "remote HTTP {}: {}",
                status, body
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| FurrowError::ProviderUnavailable(format!("remote response: {}", e)))?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                FurrowError::ProviderUnavailable("remote response had no embedding".to_string())
            })
    }

    fn dimensions(&self) -> usize {
        REMOTE_DIMENSIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service_for(server: &MockServer) -> OpenAiEmbeddingService {
        OpenAiEmbeddingService::new(RemoteEmbeddingConfig {
            base_url: server.uri(),
            model: "text-embedding-3-small".to_string(),
            api_key: SecretString::from("sk-test-key-1234".to_string()),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_embed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer sk-test-key-1234"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": "Crop: corn"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "object": "list",
                "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2, 0.3]}],
                "model": "text-embedding-3-small"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let v = service_for(&server).embed("Crop: corn").await.unwrap();
        assert_eq!(v, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_http_error_is_provider_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = service_for(&server).embed("hello").await.unwrap_err();
        match err {
            FurrowError::ProviderUnavailable(msg) => assert!(msg.contains("401")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_provider_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        assert!(matches!(
            service_for(&server).embed("hello").await,
            Err(FurrowError::ProviderUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_text_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        assert!(matches!(
            service_for(&server).embed("   ").await,
            Err(FurrowError::EmptyInput)
        ));
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let mut cfg = EmbeddingConfig::default();
        cfg.remote_base_url = "http://localhost:9000/v1/".to_string();
        let remote = RemoteEmbeddingConfig::from_config(&cfg, SecretString::from("k".to_string()));
        assert_eq!(remote.base_url, "http://localhost:9000/v1");
        assert_eq!(remote.timeout, Duration::from_secs(30));
    }
}
