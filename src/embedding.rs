//! Embedding backend abstraction and implementations.
//!
//! Defines the [`EmbeddingBackend`] trait and concrete implementations:
//! - **OpenAI** — `POST /v1/embeddings` with batching, retry, and backoff.
//! - **Ollama** — a local instance's `/api/embed` endpoint.
//! - **Vertex** — Google Vertex AI text-embedding `:predict` endpoint.
//! - **Disabled** — always errors; used when embeddings are not configured.
//!
//! Every backend validates the dimensionality of every returned vector
//! against the configured `dims`. A mismatch is a hard error — vectors are
//! never padded or truncated.
//!
//! # Retry Strategy
//!
//! Transient failures use exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// A backend that turns text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-004"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Instantiate the backend named by the configuration.
pub fn create_backend(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledBackend)),
        "openai" => Ok(Box::new(OpenAiBackend::new(config)?)),
        "ollama" => Ok(Box::new(OllamaBackend::new(config)?)),
        "vertex" => Ok(Box::new(VertexBackend::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Map a model name to a valid named-vector slot (non-alphanumerics that
/// stores reject become underscores).
pub fn vector_slot_name(model: &str) -> String {
    model.replace(['-', '@', '.'], "_")
}

/// Enforce uniform, expected dimensionality across a batch of vectors.
fn check_dims(vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    for vec in vectors {
        if vec.len() != expected {
            bail!(
                "Embedding dimension mismatch: got {}, expected {}. \
                 Update embedding.dims or choose a model with that output size.",
                vec.len(),
                expected
            );
        }
    }
    Ok(())
}

/// POST a JSON body with exponential backoff on 429/5xx/network errors.
async fn post_json_with_backoff(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, String)],
    body: &Value,
    max_retries: u32,
    label: &str,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).header("Content-Type", "application/json");
        for (name, value) in headers {
            req = req.header(*name, value);
        }

        match req.json(body).send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("{} error {}: {}", label, status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} request failed: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", label)))
}

// ============ Disabled ============

/// No-op backend used when `embedding.provider = "disabled"`.
pub struct DisabledBackend;

#[async_trait]
impl EmbeddingBackend for DisabledBackend {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.")
    }
}

// ============ OpenAI ============

pub struct OpenAiBackend {
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = post_json_with_backoff(
            &self.client,
            "https://api.openai.com/v1/embeddings",
            &[("Authorization", format!("Bearer {}", api_key))],
            &body,
            self.max_retries,
            "OpenAI API",
        )
        .await?;

        let vectors = parse_openai_response(&json)?;
        check_dims(&vectors, self.dims)?;
        Ok(vectors)
    }
}

fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        vectors.push(values_to_f32(embedding));
    }
    Ok(vectors)
}

// ============ Ollama ============

pub struct OllamaBackend {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = post_json_with_backoff(
            &self.client,
            &format!("{}/api/embed", self.url),
            &[],
            &body,
            self.max_retries,
            "Ollama API",
        )
        .await?;

        let vectors = parse_ollama_response(&json)?;
        check_dims(&vectors, self.dims)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut vectors = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let arr = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?;
        vectors.push(values_to_f32(arr));
    }
    Ok(vectors)
}

// ============ Vertex ============

/// Google Vertex AI text embeddings via the REST `:predict` endpoint.
///
/// Authentication uses a bearer token from `VERTEX_ACCESS_TOKEN`
/// (e.g. `gcloud auth print-access-token`).
pub struct VertexBackend {
    model: String,
    dims: usize,
    project: String,
    location: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl VertexBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Vertex provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Vertex provider"))?;
        let project = config
            .project
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.project required for Vertex provider"))?;

        if std::env::var("VERTEX_ACCESS_TOKEN").is_err() {
            bail!("VERTEX_ACCESS_TOKEN environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            project,
            location: config.location.clone(),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for VertexBackend {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let token = std::env::var("VERTEX_ACCESS_TOKEN")
            .map_err(|_| anyhow::anyhow!("VERTEX_ACCESS_TOKEN not set"))?;

        let instances: Vec<Value> = texts
            .iter()
            .map(|t| serde_json::json!({ "content": t }))
            .collect();
        let body = serde_json::json!({ "instances": instances });

        let url = format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{proj}/locations/{loc}/publishers/google/models/{model}:predict",
            loc = self.location,
            proj = self.project,
            model = self.model,
        );

        let json = post_json_with_backoff(
            &self.client,
            &url,
            &[("Authorization", format!("Bearer {}", token))],
            &body,
            self.max_retries,
            "Vertex API",
        )
        .await?;

        let vectors = parse_vertex_response(&json)?;
        check_dims(&vectors, self.dims)?;
        Ok(vectors)
    }
}

fn parse_vertex_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let predictions = json
        .get("predictions")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Vertex response: missing predictions array"))?;

    let mut vectors = Vec::with_capacity(predictions.len());
    for prediction in predictions {
        let values = prediction
            .get("embeddings")
            .and_then(|e| e.get("values"))
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid Vertex response: missing embedding values"))?;
        vectors.push(values_to_f32(values));
    }
    Ok(vectors)
}

fn values_to_f32(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}
