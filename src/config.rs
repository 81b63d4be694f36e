//! Service configuration
//!
//! Loaded from a TOML file. Secrets never live in the file: each section
//! names the environment variable holding its key, resolved at runtime.

use crate::imaging::ImageClientConfig;
use crate::orchestrator::IngestionSettings;
use crate::retrieval::{EmbeddingBatching, SweepConfig};
use crate::session::{HistorySettings, Persona};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Locations searched when no config path is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["tutor.toml", "config/tutor.toml"];

/// Supported chat/embedding providers
const SUPPORTED_PROVIDERS: &[&str] = &["openai"];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TutorConfig {
    pub service: ServiceSection,
    pub llm: LlmSection,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub vector_store: VectorStoreSection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub sweep: SweepSection,
    #[serde(default)]
    pub web_search: WebSearchSection,
    /// Image handler is disabled when absent
    pub image: Option<ImageSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// Service identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    #[serde(default)]
    pub persona: Persona,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_health_port() -> u16 {
    8080
}

/// Chat model used by the handlers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    pub provider: String,
    pub model: String,
    /// Environment variable containing the API key
    pub api_key_env: String,
    pub base_url: Option<String>,
    /// Optional temperature (0.0 to 2.0)
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Planner model; falls back to the handler model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterSection {
    pub model: Option<String>,
    #[serde(default = "default_router_temperature")]
    pub temperature: f32,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_router_temperature(),
        }
    }
}

fn default_router_temperature() -> f32 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSection {
    pub model: String,
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub dimensions: usize,
    pub batch_size: usize,
    pub max_concurrency: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            dimensions: 1536,
            batch_size: 64,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorStoreSection {
    pub url: String,
    pub api_key_env: Option<String>,
}

impl Default for VectorStoreSection {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalSection {
    pub top_k: usize,
    /// Overrides the persona threshold when set
    pub score_threshold: Option<f32>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: None,
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSection {
    pub retain_messages: usize,
    pub recent_for_planner: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = HistorySettings::default();
        Self {
            retain_messages: defaults.retain_messages,
            recent_for_planner: defaults.recent_for_planner,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweepSection {
    pub interval_secs: u64,
    pub ttl_hours: i64,
    pub scroll_limit: usize,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            ttl_hours: 24,
            scroll_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebSearchSection {
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub max_results: usize,
}

impl Default for WebSearchSection {
    fn default() -> Self {
        Self {
            api_key_env: "SERPER_API_KEY".to_string(),
            base_url: None,
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSection {
    pub url: String,
    pub api_key_env: String,
    #[serde(default = "default_true")]
    pub enhance_prompts: bool,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
}

fn default_true() -> bool {
    true
}

fn default_backoff_ms() -> Vec<u64> {
    vec![1000, 2000, 4000]
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("No config file found (searched {0})")]
    NotFound(String),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid service ID format: {0}")]
    InvalidServiceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TutorConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: TutorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// First existing file among [`DEFAULT_CONFIG_PATHS`]
    pub fn find_default() -> Result<PathBuf, ConfigError> {
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
            .ok_or_else(|| ConfigError::NotFound(DEFAULT_CONFIG_PATHS.join(", ")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service_id(&self.service.id)?;

        if !SUPPORTED_PROVIDERS.contains(&self.llm.provider.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Unsupported LLM provider '{}' (supported: {})",
                self.llm.provider,
                SUPPORTED_PROVIDERS.join(", ")
            )));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("llm.model must not be empty".to_string()));
        }

        let retrieval = &self.retrieval;
        if retrieval.chunk_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "retrieval.chunk_size must be positive".to_string(),
            ));
        }
        if retrieval.chunk_overlap >= retrieval.chunk_size {
            return Err(ConfigError::InvalidConfig(format!(
                "retrieval.chunk_overlap ({}) must be smaller than chunk_size ({})",
                retrieval.chunk_overlap, retrieval.chunk_size
            )));
        }
        if let Some(threshold) = retrieval.score_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::InvalidConfig(format!(
                    "retrieval.score_threshold must be within [0, 1], got {threshold}"
                )));
            }
        }
        if retrieval.top_k == 0 {
            return Err(ConfigError::InvalidConfig(
                "retrieval.top_k must be positive".to_string(),
            ));
        }

        if self.embedding.dimensions == 0 || self.embedding.batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "embedding.dimensions and embedding.batch_size must be positive".to_string(),
            ));
        }
        if self.session.retain_messages == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.retain_messages must be positive".to_string(),
            ));
        }
        if self.sweep.interval_secs == 0 || self.sweep.ttl_hours <= 0 {
            return Err(ConfigError::InvalidConfig(
                "sweep.interval_secs and sweep.ttl_hours must be positive".to_string(),
            ));
        }
        if let Some(image) = &self.image {
            if image.url.trim().is_empty() {
                return Err(ConfigError::InvalidConfig("image.url must not be empty".to_string()));
            }
        }

        Ok(())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name
            .and_then(|name| std::env::var(name).ok())
            .filter(|v| !v.is_empty())
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.llm.api_key_env)
    }

    pub fn get_embedding_api_key(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.embedding.api_key_env)
    }

    pub fn get_vector_store_api_key(&self) -> Option<String> {
        Self::get_env_var_optional(self.vector_store.api_key_env.as_ref())
    }

    /// Web search is disabled when its key is absent
    pub fn get_web_search_api_key(&self) -> Option<String> {
        Self::get_env_var_optional(Some(&self.web_search.api_key_env))
    }

    pub fn get_image_api_key(&self) -> Option<String> {
        self.image
            .as_ref()
            .and_then(|image| Self::get_env_var_optional(Some(&image.api_key_env)))
    }

    /// Model used by the planner
    pub fn router_model(&self) -> &str {
        self.router.model.as_deref().unwrap_or(&self.llm.model)
    }

    pub fn history_settings(&self) -> HistorySettings {
        HistorySettings {
            retain_messages: self.session.retain_messages,
            recent_for_planner: self.session.recent_for_planner,
        }
    }

    pub fn ingestion_settings(&self) -> IngestionSettings {
        IngestionSettings {
            chunk_size: self.retrieval.chunk_size,
            chunk_overlap: self.retrieval.chunk_overlap,
        }
    }

    pub fn embedding_batching(&self) -> EmbeddingBatching {
        EmbeddingBatching {
            batch_size: self.embedding.batch_size,
            max_concurrency: self.embedding.max_concurrency.max(1),
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: Duration::from_secs(self.sweep.interval_secs),
            ttl: chrono::Duration::hours(self.sweep.ttl_hours),
            scroll_limit: self.sweep.scroll_limit,
        }
    }

    /// Image client settings, if the image section is present
    pub fn image_client_config(&self, api_key: String) -> Option<ImageClientConfig> {
        self.image.as_ref().map(|image| ImageClientConfig {
            url: image.url.clone(),
            api_key,
            backoff: image.backoff_ms.iter().copied().map(Duration::from_millis).collect(),
            ..Default::default()
        })
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[service]
id = "test-tutor"

[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
temperature = 0.3
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate service ID format
fn validate_service_id(service_id: &str) -> Result<(), ConfigError> {
    let valid_chars = service_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if service_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidServiceId(format!(
            "Service ID '{service_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
