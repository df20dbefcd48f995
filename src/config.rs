use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            api_key: None,
            collection: default_collection(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "personal_assistant".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_chars() -> usize {
    1200
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    /// Google Cloud project for the Vertex provider.
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            project: None,
            location: default_location(),
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_gen_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_gen_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            project: None,
            location: default_location(),
            max_tokens: default_gen_max_tokens(),
            max_retries: 5,
            timeout_secs: default_gen_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_location() -> String {
    "us-central1".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_gen_timeout_secs() -> u64 {
    120
}
fn default_gen_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestConfig {
    /// Front-matter key whose value, when present, pins the logical doc id
    /// (e.g. `uid`).
    #[serde(default)]
    pub doc_id_key: Option<String>,
    /// Root folder for relative-path doc ids. Documents outside it fall
    /// back to their absolute path.
    #[serde(default)]
    pub vault_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProcessingConfig {
    /// Name/acronym normalizations applied before meeting-note processing.
    #[serde(default)]
    pub name_replacements: BTreeMap<String, String>,
}

/// Load configuration from a TOML file, falling back to local defaults when
/// the file does not exist. Environment variables override the Qdrant
/// endpoint settings so one config file works across machines.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    if let Ok(url) = std::env::var("QDRANT_URL") {
        if !url.is_empty() {
            config.qdrant.url = url;
        }
    }
    if let Ok(key) = std::env::var("QDRANT_API_KEY") {
        if !key.is_empty() {
            config.qdrant.api_key = Some(key);
        }
    }
    if let Ok(collection) = std::env::var("QDRANT_COLLECTION") {
        if !collection.is_empty() {
            config.qdrant.collection = collection;
        }
    }
    if let Ok(root) = std::env::var("VAULT_ROOT") {
        if !root.is_empty() {
            config.ingest.vault_root = Some(PathBuf::from(root));
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.qdrant.collection.trim().is_empty() {
        anyhow::bail!("qdrant.collection must not be empty");
    }

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_chars {
        anyhow::bail!(
            "chunking.overlap ({}) must be smaller than chunking.max_chars ({})",
            config.chunking.overlap,
            config.chunking.max_chars
        );
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "vertex" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or vertex.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" | "anthropic" | "ollama" | "vertex" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, anthropic, ollama, or vertex.",
            other
        ),
    }

    if config.generation.is_enabled() && config.generation.model.is_none() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.qdrant.collection, "personal_assistant");
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_max_chars() {
        let mut config = Config::default();
        config.chunking.max_chars = 100;
        config.chunking.overlap = 100;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let mut config = Config::default();
        config.embedding.provider = "openai".to_string();
        assert!(validate(&config).is_err());

        config.embedding.model = Some("text-embedding-3-small".to_string());
        config.embedding.dims = Some(1536);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = Config::default();
        config.embedding.provider = "cohere".to_string();
        config.embedding.model = Some("x".to_string());
        config.embedding.dims = Some(1);
        assert!(validate(&config).is_err());
    }
}
