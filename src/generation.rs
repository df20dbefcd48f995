//! Text-generation backend dispatch for the note processor.
//!
//! One variant per provider behind a single entry point; callers depend
//! only on `generate_text`. Uses the same backoff policy as the embedding
//! backends: 429/5xx/network errors retry with exponential delay, other
//! client errors fail immediately.

use anyhow::{bail, Result};
use serde_json::Value;
use std::time::Duration;

use crate::config::GenerationConfig;

/// Generate text from a prompt with the configured provider.
pub async fn generate_text(config: &GenerationConfig, prompt: &str) -> Result<String> {
    match config.provider.as_str() {
        "openai" => generate_openai(config, prompt).await,
        "anthropic" => generate_anthropic(config, prompt).await,
        "ollama" => generate_ollama(config, prompt).await,
        "vertex" => generate_vertex(config, prompt).await,
        "disabled" => bail!("Generation provider is disabled. Set [generation] provider in config."),
        other => bail!("Unknown generation provider: {}", other),
    }
}

fn http_client(config: &GenerationConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn require_model(config: &GenerationConfig) -> Result<&str> {
    config
        .model
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("generation.model required"))
}

async fn post_with_backoff(
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

async fn generate_openai(config: &GenerationConfig, prompt: &str) -> Result<String> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = require_model(config)?;
    let client = http_client(config)?;

    let body = serde_json::json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
    });
    let json = post_with_backoff(
        &client,
        "https://api.openai.com/v1/chat/completions",
        &[("Authorization", format!("Bearer {}", api_key))],
        &body,
        config.max_retries,
        "OpenAI API",
    )
    .await?;

    json["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
}

async fn generate_anthropic(config: &GenerationConfig, prompt: &str) -> Result<String> {
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY not set"))?;
    let model = require_model(config)?;
    let client = http_client(config)?;

    let body = serde_json::json!({
        "model": model,
        "max_tokens": config.max_tokens,
        "messages": [{ "role": "user", "content": prompt }],
    });
    let json = post_with_backoff(
        &client,
        "https://api.anthropic.com/v1/messages",
        &[
            ("x-api-key", api_key),
            ("anthropic-version", "2023-06-01".to_string()),
        ],
        &body,
        config.max_retries,
        "Anthropic API",
    )
    .await?;

    json["content"][0]["text"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Anthropic response: missing content text"))
}

async fn generate_ollama(config: &GenerationConfig, prompt: &str) -> Result<String> {
    let model = require_model(config)?;
    let url = config.url.as_deref().unwrap_or("http://localhost:11434");
    let client = http_client(config)?;

    let body = serde_json::json!({
        "model": model,
        "prompt": prompt,
        "stream": false,
    });
    let json = post_with_backoff(
        &client,
        &format!("{}/api/generate", url),
        &[],
        &body,
        config.max_retries,
        "Ollama API",
    )
    .await?;

    json["response"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
}

async fn generate_vertex(config: &GenerationConfig, prompt: &str) -> Result<String> {
    let token = std::env::var("VERTEX_ACCESS_TOKEN")
        .map_err(|_| anyhow::anyhow!("VERTEX_ACCESS_TOKEN not set"))?;
    let model = require_model(config)?;
    let project = config
        .project
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("generation.project required for Vertex provider"))?;
    let client = http_client(config)?;

    let url = format!(
        "https://{loc}-aiplatform.googleapis.com/v1/projects/{proj}/locations/{loc}/publishers/google/models/{model}:generateContent",
        loc = config.location,
        proj = project,
        model = model,
    );
    let body = serde_json::json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
    });
    let json = post_with_backoff(
        &client,
        &url,
        &[("Authorization", format!("Bearer {}", token))],
        &body,
        config.max_retries,
        "Vertex API",
    )
    .await?;

    json["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Vertex response: missing candidate text"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let config = GenerationConfig::default();
        let err = generate_text(&config, "hi").await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn test_unknown_provider_errors() {
        let config = GenerationConfig {
            provider: "mystery".to_string(),
            ..Default::default()
        };
        assert!(generate_text(&config, "hi").await.is_err());
    }
}
