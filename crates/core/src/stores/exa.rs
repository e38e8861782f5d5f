use crate::error::ExtractionError;
use crate::retry::RetryPolicy;
use crate::traits::{ContentExtractionService, ExtractedContent};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Exa.ai `/contents` client. Transient failures are retried with the same
/// policy the refiner uses.
pub struct ExaContentClient {
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    client: Client,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    results: Vec<ContentsResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentsResult {
    url: Option<String>,
    title: Option<String>,
    text: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    highlights: Vec<String>,
}

impl ExaContentClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            retry,
            client: Client::new(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<ExtractedContent, ExtractionError> {
        let response = self
            .client
            .post(format!("{}/contents", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&json!({
                "urls": [url],
                "text": true,
                "summary": true,
                "highlights": true,
            }))
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ExtractionError::Blocked(url.to_string()))
            }
            StatusCode::NOT_FOUND => return Err(ExtractionError::NotFound(url.to_string())),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                return Err(ExtractionError::Timeout(url.to_string()))
            }
            status if !status.is_success() => {
                return Err(ExtractionError::Backend {
                    backend: "exa".to_string(),
                    details: status.to_string(),
                })
            }
            _ => {}
        }

        let payload: ContentsResponse = response.json().await?;
        payload_to_content(payload, url)
    }
}

#[async_trait]
impl ContentExtractionService for ExaContentClient {
    async fn extract(&self, url: &str) -> Result<ExtractedContent, ExtractionError> {
        self.retry
            .run("content-extraction", is_transient, || self.fetch(url))
            .await
    }
}

fn is_transient(error: &ExtractionError) -> bool {
    match error {
        ExtractionError::Timeout(_) => true,
        ExtractionError::Http(inner) => inner.is_timeout() || inner.is_connect(),
        ExtractionError::Backend { details, .. } => {
            details.starts_with("429") || details.starts_with('5')
        }
        _ => false,
    }
}

fn payload_to_content(
    payload: ContentsResponse,
    url: &str,
) -> Result<ExtractedContent, ExtractionError> {
    let result = payload
        .results
        .into_iter()
        .next()
        .ok_or_else(|| ExtractionError::NotFound(url.to_string()))?;

    let text = result.text.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ExtractionError::Empty(url.to_string()));
    }

    Ok(ExtractedContent {
        url: result.url.unwrap_or_else(|| url.to_string()),
        title: result.title.unwrap_or_default(),
        text,
        summary: result.summary.unwrap_or_default(),
        highlights: result.highlights,
    })
}
