//! Web search client
//!
//! The WebSearch handler talks to a [`WebSearch`] implementation; the
//! production one is the Serper Google search API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// One organic search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Web search not configured: {0}")]
    NotConfigured(String),
    #[error("Web search request failed: {0}")]
    RequestFailed(String),
    #[error("Web search API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Invalid web search response: {0}")]
    InvalidResponse(String),
}

/// Web search provider
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// Serper client configuration
#[derive(Debug, Clone)]
pub struct SerperConfig {
    pub api_key: String,
    pub base_url: String,
    pub max_results: usize,
    pub country: String,
    pub language: String,
    pub timeout: Duration,
}

impl Default for SerperConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://google.serper.dev".to_string(),
            max_results: 5,
            country: "us".to_string(),
            language: "en".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Serper web search client
pub struct SerperSearch {
    config: SerperConfig,
    client: reqwest::Client,
}

impl SerperSearch {
    pub fn new(config: SerperConfig) -> Result<Self, SearchError> {
        if config.api_key.is_empty() {
            return Err(SearchError::NotConfigured(
                "SERPER_API_KEY is required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SearchError::RequestFailed(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Build search payload (pure function)
    fn build_search_payload(&self, query: &str, num_results: usize) -> Value {
        json!({
            "q": query,
            "num": num_results.min(self.config.max_results).max(1),
            "gl": self.config.country,
            "hl": self.config.language
        })
    }

    /// Parse organic results (pure function)
    pub fn parse_search_response(search_result: &Value, num_results: usize) -> Vec<SearchHit> {
        let Some(organic) = search_result.get("organic").and_then(|o| o.as_array()) else {
            return Vec::new();
        };

        organic
            .iter()
            .filter_map(|result| {
                let title = result.get("title").and_then(|t| t.as_str())?;
                let link = result.get("link").and_then(|l| l.as_str())?;
                let snippet = result.get("snippet").and_then(|s| s.as_str()).unwrap_or("");
                Some(SearchHit {
                    title: title.to_string(),
                    url: link.to_string(),
                    snippet: snippet.to_string(),
                })
            })
            .take(num_results)
            .collect()
    }
}

#[async_trait]
impl WebSearch for SerperSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let payload = self.build_search_payload(query, max_results);

        let response = self
            .client
            .post(format!("{}/search", self.config.base_url))
            .header("X-API-KEY", &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| SearchError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SearchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;
        let hits = Self::parse_search_response(&body, max_results);
        debug!(query, hits = hits.len(), "Web search complete");
        Ok(hits)
    }
}
