//! Ollama client and the embedding/generation providers built on it

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RagConfig;
use crate::error::{Error, Result};

use super::embedding::EmbeddingProvider;
use super::llm::{GenerationConstraints, GenerationProvider};
use super::retry::RetryPolicy;

const PROVIDER: &str = "ollama";

/// Ollama HTTP client; every call runs under its [`RetryPolicy`]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Serialize)]
struct GenerateOptions<'a> {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    /// Create a client for `base_url`
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is available; a server that does not answer within the
    /// policy timeout counts as unhealthy
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(self.retry.timeout()).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Embed texts in one request
    pub async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let (client, url) = (&self.client, url.as_str());

        self.retry
            .run("ollama.embed", move || async move {
                let response = client
                    .post(url)
                    .json(&EmbedRequest { model, input: texts })
                    .send()
                    .await
                    .map_err(request_error)?;

                let response = check_status(response, "Embedding").await?;
                let body: EmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::permanent(PROVIDER, format!("Invalid embedding response: {}", e)))?;

                if body.embeddings.len() != texts.len() {
                    return Err(Error::permanent(
                        PROVIDER,
                        format!(
                            "Expected {} embeddings, received {}",
                            texts.len(),
                            body.embeddings.len()
                        ),
                    ));
                }
                Ok(body.embeddings)
            })
            .await
    }

    /// Complete a prompt
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        tracing::debug!(model, prompt_chars = prompt.len(), "Generating with Ollama");

        let (client, url) = (&self.client, url.as_str());

        self.retry
            .run("ollama.generate", move || async move {
                let request = GenerateRequest {
                    model,
                    prompt,
                    stream: false,
                    options: GenerateOptions {
                        temperature: constraints.temperature,
                        num_predict: constraints.max_tokens,
                        stop: &constraints.stop,
                    },
                };

                let response = client
                    .post(url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(request_error)?;

                let response = check_status(response, "Generation").await?;
                let body: GenerateResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::permanent(PROVIDER, format!("Invalid generation response: {}", e)))?;

                Ok(body.response)
            })
            .await
    }
}

fn request_error(err: reqwest::Error) -> Error {
    let retriable = err.is_timeout() || err.is_connect() || err.is_request();
    Error::Provider {
        provider: PROVIDER.to_string(),
        message: format!("Request failed: {}", err),
        retriable,
    }
}

/// Whether an HTTP status is worth retrying
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("{} failed: HTTP {} - {}", what, status, body);
    Err(Error::Provider {
        provider: PROVIDER.to_string(),
        message,
        retriable: is_transient_status(status),
    })
}

/// Embedding provider backed by Ollama
pub struct OllamaEmbedder {
    client: Arc<OllamaClient>,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl OllamaEmbedder {
    pub fn new(client: Arc<OllamaClient>, model: impl Into<String>, dimensions: usize, batch_size: usize) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
            batch_size: batch_size.max(1),
        }
    }

    /// Build from configuration
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let client = OllamaClient::new(&config.llm.base_url, config.embedding_retry())?;
        Ok(Self::new(
            Arc::new(client),
            &config.embeddings.model,
            config.embeddings.dimensions,
            config.embeddings.batch_size,
        ))
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::permanent(
                PROVIDER,
                format!(
                    "Model {} returned {} dimensions, expected {}",
                    self.model,
                    vector.len(),
                    self.dimensions
                ),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.client.embed(&self.model, &[text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| Error::permanent(PROVIDER, "Empty embedding response"))?;
        self.check_dimensions(&vector)?;
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.client.embed(&self.model, batch).await?;
            for vector in &vectors {
                self.check_dimensions(vector)?;
            }
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Generation provider backed by Ollama
pub struct OllamaGenerator {
    client: Arc<OllamaClient>,
    model: String,
}

impl OllamaGenerator {
    pub fn new(client: Arc<OllamaClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Generator for answers
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let client = OllamaClient::new(&config.llm.base_url, config.generation_retry())?;
        Ok(Self::new(Arc::new(client), &config.llm.generate_model))
    }

    /// Generator used by the LLM judge, with the judge timeout
    pub fn judge_from_config(config: &RagConfig) -> Result<Self> {
        let client = OllamaClient::new(&config.llm.base_url, config.judge_retry())?;
        let model = config
            .evaluation
            .judge_model
            .clone()
            .unwrap_or_else(|| config.llm.generate_model.clone());
        Ok(Self::new(Arc::new(client), model))
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerator {
    async fn complete(&self, prompt: &str, constraints: &GenerationConstraints) -> Result<String> {
        self.client.generate(&self.model, prompt, constraints).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }
}
