use crate::error::SearchError;
use crate::models::ExperienceHit;
use crate::traits::VectorSearchStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Which Weaviate deployment to talk to. Selected by explicit
/// configuration at construction time; the two variants are otherwise
/// interchangeable.
#[derive(Debug, Clone)]
pub enum WeaviateEndpoint {
    Local { base_url: String },
    Hosted { base_url: String, api_key: String },
}

pub struct WeaviateStore {
    base_url: String,
    api_key: Option<String>,
    class_name: String,
    client: Client,
}

impl WeaviateStore {
    pub fn new(endpoint: WeaviateEndpoint, class_name: impl Into<String>) -> Self {
        let (base_url, api_key) = match endpoint {
            WeaviateEndpoint::Local { base_url } => (base_url, None),
            WeaviateEndpoint::Hosted { base_url, api_key } => (base_url, Some(api_key)),
        };

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            class_name: class_name.into(),
            client: Client::new(),
        }
    }

    fn graphql_query(&self, query_text: &str, limit: usize) -> Result<String, SearchError> {
        // serde_json handles the quoting so arbitrary query text cannot
        // break out of the GraphQL string literal.
        let concepts = serde_json::to_string(query_text)?;
        Ok(format!(
            "{{ Get {{ {class}(nearText: {{concepts: [{concepts}]}}, limit: {limit}) \
{{ text _additional {{ id certainty }} }} }} }}",
            class = self.class_name
        ))
    }
}

#[async_trait]
impl VectorSearchStore for WeaviateStore {
    async fn search(
        &self,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<ExperienceHit>, SearchError> {
        if query_text.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }

        let graphql = self.graphql_query(query_text, limit)?;
        let mut request = self
            .client
            .post(format!("{}/v1/graphql", self.base_url))
            .json(&json!({ "query": graphql }));

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SearchError::Backend {
                backend: "weaviate".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: Value = response.json().await?;
        parse_search_response(&payload, &self.class_name)
    }
}

fn parse_search_response(payload: &Value, class_name: &str) -> Result<Vec<ExperienceHit>, SearchError> {
    if let Some(errors) = payload.pointer("/errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            return Err(SearchError::Backend {
                backend: "weaviate".to_string(),
                details: errors[0]
                    .pointer("/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown graphql error")
                    .to_string(),
            });
        }
    }

    let hits = payload
        .pointer(&format!("/data/Get/{class_name}"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::new();
    for hit in hits {
        let experience_id = hit
            .pointer("/_additional/id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if experience_id.is_empty() {
            continue;
        }

        let raw_text = hit
            .pointer("/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let similarity_score = hit
            .pointer("/_additional/certainty")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        result.push(ExperienceHit {
            experience_id,
            raw_text,
            similarity_score,
        });
    }

    Ok(result)
}
