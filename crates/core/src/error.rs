use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid job url: {0}")]
    InvalidUrl(String),

    #[error("content blocked by source site: {0}")]
    Blocked(String),

    #[error("no content found at url: {0}")]
    NotFound(String),

    #[error("extracted content was empty: {0}")]
    Empty(String),

    #[error("content extraction timed out: {0}")]
    Timeout(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("all {query_count} search queries failed")]
    Exhausted { query_count: usize },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model rate limited")]
    RateLimited,

    #[error("model call timed out")]
    Timeout,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("model returned an unparseable response: {0}")]
    InvalidResponse(String),

    #[error("model returned empty content")]
    EmptyContent,
}

impl ModelError {
    /// Rate limits and timeouts are worth another attempt; a response the
    /// model already produced but we cannot parse is not.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::RateLimited | ModelError::Timeout => true,
            ModelError::Http(error) => error.is_timeout() || error.is_connect(),
            ModelError::Api { status, .. } => *status == 429 || *status >= 500,
            ModelError::InvalidResponse(_) | ModelError::EmptyContent => false,
        }
    }
}

/// The only error `match_job` surfaces. Refinement failures never appear
/// here; they degrade into per-record fallbacks.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("extraction failed for {url}: {source}")]
    Extraction {
        url: String,
        #[source]
        source: ExtractionError,
    },

    #[error("all {query_count} search queries failed")]
    SearchExhausted { query_count: usize },

    #[error("search failed: {0}")]
    Search(#[from] SearchError),

    #[error("validation failed at {stage}: {details}")]
    Validation { stage: String, details: String },

    #[error("timed out during {stage}")]
    Timeout { stage: String },
}

pub type Result<T, E = MatchError> = std::result::Result<T, E>;
