use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Data { data: Vec<EmbeddingData> },
    Embeddings { embeddings: Vec<Vec<f32>> },
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Data { mut data } => {
                if data.iter().all(|d| d.index.is_some()) {
                    data.sort_by_key(|d| d.index);
                }
                data.into_iter().map(|d| d.embedding).collect()
            }
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
        }
    }
}

/// Client for an OpenAI-compatible `POST /embeddings` endpoint
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    retries: usize,
    dimension: OnceLock<usize>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let base = url::Url::parse(&config.base_url)?;
        let endpoint = format!("{}/embeddings", base.as_str().trim_end_matches('/'));
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: config.model.clone(),
            retries: 2,
            dimension: OnceLock::new(),
        })
    }

    /// Number of retries after a failed request
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    async fn send_with_retry(&self, input: Vec<String>) -> Result<EmbeddingResponse> {
        let body = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let mut last_err: Option<Error> = None;
        for attempt in 0..=self.retries {
            let request = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body);

            match request.send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(ok) => return Ok(ok.json::<EmbeddingResponse>().await?),
                    Err(e) => last_err = Some(Error::Embedding(e.to_string())),
                },
                Err(e) if e.is_timeout() => {
                    last_err = Some(Error::Embedding(format!("request timed out: {}", e)))
                }
                Err(e) => last_err = Some(Error::Embedding(e.to_string())),
            }

            if attempt < self.retries {
                debug!("Embedding request failed, retrying (attempt {})", attempt + 1);
                tokio::time::sleep(Duration::from_millis(200 * (attempt + 1) as u64)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Embedding("Embedding request failed".to_string())))
    }

    fn validate(&self, expected: usize, embeddings: &[Vec<f32>]) -> Result<()> {
        if embeddings.len() != expected {
            return Err(Error::Embedding(format!(
                "Expected {} embeddings from model '{}', got {}",
                expected,
                self.model,
                embeddings.len()
            )));
        }

        for vector in embeddings {
            let dimension = *self.dimension.get_or_init(|| vector.len());
            if vector.is_empty() || vector.len() != dimension {
                return Err(Error::Embedding(format!(
                    "Embedding dimension mismatch for model '{}': expected {}, got {}",
                    self.model,
                    dimension,
                    vector.len()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = texts.len();
        let embeddings = self.send_with_retry(texts).await?.into_embeddings();
        self.validate(expected, &embeddings)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
