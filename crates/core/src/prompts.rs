use crate::error::ModelError;
use crate::models::{CandidateMatch, JobDescription};
use serde::Deserialize;

pub const REFINEMENT_SYSTEM_PROMPT: &str = "You rewrite raw professional experience \
records into polished, job-tailored accomplishment statements. Respond with a single \
JSON object and nothing else, using exactly these keys: refined_accomplishment (string), \
extracted_skills (array of strings), extracted_tools (array of strings), relevance_score \
(number between 0 and 1), refinement_notes (string).";

/// Structured refinement payload the model is asked to return.
#[derive(Debug, Clone, Deserialize)]
pub struct RefinementResponse {
    pub refined_accomplishment: String,
    #[serde(default)]
    pub extracted_skills: Vec<String>,
    #[serde(default)]
    pub extracted_tools: Vec<String>,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub refinement_notes: String,
}

pub fn build_refinement_prompt(job: &JobDescription, candidate: &CandidateMatch) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "Target role: {} at {}\n\n",
        job.title, job.company
    ));

    if !job.requirements.is_empty() {
        prompt.push_str("Job requirements:\n");
        for requirement in job.requirements.iter().take(8) {
            prompt.push_str(&format!("- {requirement}\n"));
        }
        prompt.push('\n');
    }

    if !job.skills_mentioned.is_empty() {
        prompt.push_str(&format!(
            "Skills the posting mentions: {}\n\n",
            job.skills_mentioned.join(", ")
        ));
    }

    if !job.summary.is_empty() {
        prompt.push_str(&format!("Posting summary: {}\n\n", job.summary));
    }

    prompt.push_str(&format!(
        "Candidate experience record (id {}):\n{}\n\n",
        candidate.experience_id, candidate.raw_text
    ));

    prompt.push_str(
        "Rewrite this record as one accomplishment statement tailored to the role, \
extract the skills and tools it demonstrates, and rate its relevance to the role.",
    );

    prompt
}

/// Parses the model's reply, tolerating markdown code fences around the JSON.
pub fn parse_refinement_response(raw: &str) -> Result<RefinementResponse, ModelError> {
    let text = strip_json_fences(raw);
    if text.is_empty() {
        return Err(ModelError::EmptyContent);
    }

    let mut response: RefinementResponse = serde_json::from_str(text)
        .map_err(|error| ModelError::InvalidResponse(error.to_string()))?;

    if response.refined_accomplishment.trim().is_empty() {
        return Err(ModelError::InvalidResponse(
            "refined_accomplishment was empty".to_string(),
        ));
    }

    response.relevance_score = response.relevance_score.clamp(0.0, 1.0);
    Ok(response)
}

fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(str::trim)
            .unwrap_or_else(|| stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(str::trim)
            .unwrap_or_else(|| stripped.trim_start())
    } else {
        text
    }
}
