use crate::error::{ExtractionError, ModelError, SearchError};
use crate::models::ExperienceHit;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Raw page content returned by the content-extraction service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub url: String,
    pub title: String,
    pub text: String,
    pub summary: String,
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
}

#[async_trait]
pub trait ContentExtractionService {
    async fn extract(&self, url: &str) -> Result<ExtractedContent, ExtractionError>;
}

#[async_trait]
pub trait VectorSearchStore {
    async fn search(
        &self,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<ExperienceHit>, SearchError>;
}

#[async_trait]
pub trait TextGenerationModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError>;
}
