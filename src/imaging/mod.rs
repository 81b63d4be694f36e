//! Image-generation client
//!
//! One HTTP call per request. A 429 response is retried on a short fixed
//! backoff schedule (honoring `Retry-After` when present); every other
//! failure is returned to the caller.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// What to ask the image API for
#[derive(Debug, Clone, PartialEq)]
pub enum ImageRequest {
    Generate { prompt: String },
    Edit { prompt: String, image_url: String },
}

impl ImageRequest {
    pub fn prompt(&self) -> &str {
        match self {
            ImageRequest::Generate { prompt } | ImageRequest::Edit { prompt, .. } => prompt,
        }
    }

    /// Request body (pure function)
    pub fn to_body(&self) -> Value {
        match self {
            ImageRequest::Generate { prompt } => json!({ "input": { "prompt": prompt } }),
            ImageRequest::Edit { prompt, image_url } => json!({
                "input": { "image_input": [image_url], "prompt": prompt }
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image API not configured: {0}")]
    NotConfigured(String),
    #[error("Image request failed: {0}")]
    RequestFailed(String),
    #[error("Image API rate limited after {attempts} attempts")]
    RateLimited { attempts: usize },
    #[error("Image API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("No image URL in response: {0}")]
    NoImageUrl(String),
}

/// Image generation provider
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Produce one image and return its URL
    async fn generate(&self, request: &ImageRequest) -> Result<String, ImageError>;
}

/// HTTP image API configuration
#[derive(Debug, Clone)]
pub struct ImageClientConfig {
    pub url: String,
    pub api_key: String,
    /// Delays between attempts after a 429
    pub backoff: Vec<Duration>,
    pub timeout: Duration,
}

impl Default for ImageClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            timeout: Duration::from_secs(120),
        }
    }
}

/// Bearer-authenticated image API client
pub struct HttpImageGenerator {
    config: ImageClientConfig,
    client: reqwest::Client,
}

impl HttpImageGenerator {
    pub fn new(config: ImageClientConfig) -> Result<Self, ImageError> {
        if config.url.is_empty() {
            return Err(ImageError::NotConfigured("image API url is required".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ImageError::RequestFailed(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn retry_after(response: &reqwest::Response) -> Option<Duration> {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn generate(&self, request: &ImageRequest) -> Result<String, ImageError> {
        let body = request.to_body();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut builder = self.client.post(&self.config.url).json(&body);
            if !self.config.api_key.is_empty() {
                builder = builder.bearer_auth(&self.config.api_key);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| ImageError::RequestFailed(e.to_string()))?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let Some(scheduled) = self.config.backoff.get(attempt - 1) else {
                    return Err(ImageError::RateLimited { attempts: attempt });
                };
                let delay = Self::retry_after(&response).unwrap_or(*scheduled);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "Image API rate limited");
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(ImageError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let value: Value = response
                .json()
                .await
                .map_err(|e| ImageError::RequestFailed(e.to_string()))?;
            debug!(attempt, "Image API responded");
            return extract_image_url(&value).ok_or_else(|| {
                ImageError::NoImageUrl(value.to_string().chars().take(200).collect())
            });
        }
    }
}

/// Fields that may carry the image URL, in lookup order
const URL_FIELDS: &[&str] = &["url", "image", "output"];

/// Pull an image URL out of a polymorphic response: a list of results, a
/// single result object, or a bare string.
pub fn extract_image_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => valid_url(s),
        Value::Array(items) => items.iter().find_map(extract_image_url),
        Value::Object(map) => URL_FIELDS
            .iter()
            .filter_map(|field| map.get(*field))
            .find_map(extract_image_url),
        _ => None,
    }
}

fn valid_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    matches!(parsed.scheme(), "http" | "https").then(|| raw.trim().to_string())
}
