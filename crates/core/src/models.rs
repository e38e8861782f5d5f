use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// A structured job posting. Built once by the extractor, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescription {
    pub url: String,
    pub title: String,
    pub company: String,
    pub full_text: String,
    pub requirements: Vec<String>,
    pub skills_mentioned: Vec<String>,
    pub responsibilities: Vec<String>,
    pub extracted_keywords: Vec<String>,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl JobDescription {
    pub fn has_search_signal(&self) -> bool {
        !self.skills_mentioned.is_empty()
            || !self.requirements.is_empty()
            || !self.responsibilities.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueryStrategy {
    Skills,
    Technology,
    Responsibility,
    Seniority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub strategy: QueryStrategy,
    /// Ordering weight only; never part of any score formula.
    pub priority: f64,
}

/// One raw hit from the vector store: `(experience_id, raw_text, similarity_score)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceHit {
    pub experience_id: String,
    pub raw_text: String,
    pub similarity_score: f64,
}

/// A deduplicated candidate built from all queries that returned the record.
/// Lives between retrieval and refinement, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub experience_id: String,
    pub raw_text: String,
    pub per_query_scores: BTreeMap<String, f64>,
    pub matched_query_count: usize,
    pub aggregated_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedExperience {
    pub original_experience_id: String,
    pub refined_accomplishment: String,
    pub extracted_skills: Vec<String>,
    pub extracted_tools: Vec<String>,
    pub relevance_score: f64,
    pub refinement_notes: String,
    pub cache_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub stage_timings_ms: BTreeMap<String, u64>,
    pub query_count: usize,
    pub candidate_count: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub refinement_fallbacks: usize,
    pub failed_queries: usize,
    pub partial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMatchResult {
    pub job_url: String,
    pub matched_experiences: Vec<RefinedExperience>,
    pub aggregated_skills: Vec<String>,
    pub aggregated_tools: Vec<String>,
    pub match_score: f64,
    pub processing_metadata: ProcessingMetadata,
    pub created_at: DateTime<Utc>,
}

impl JobMatchResult {
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[derive(Debug, Clone)]
pub struct MatchOptions {
    pub min_relevance_score: f64,
    pub max_experiences_to_match: usize,
    /// Flat per-extra-query bonus in the aggregated-score formula.
    pub diversity_bonus: f64,
    pub per_query_limit: usize,
    pub max_search_concurrency: usize,
    pub refine_concurrency: usize,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            min_relevance_score: 0.3,
            max_experiences_to_match: 10,
            diversity_bonus: 0.05,
            per_query_limit: 10,
            max_search_concurrency: 8,
            refine_concurrency: 4,
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}
