use crate::cache::RefinementCache;
use crate::coordinator::MultiQuerySearchCoordinator;
use crate::error::{MatchError, SearchError};
use crate::extractor::JobContentExtractor;
use crate::models::{
    CandidateMatch, JobDescription, JobMatchResult, MatchOptions, ProcessingMetadata,
    RefinedExperience,
};
use crate::optimizer::SearchQueryOptimizer;
use crate::refiner::ExperienceRefiner;
use crate::traits::{ContentExtractionService, TextGenerationModel, VectorSearchStore};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant as WallInstant;
use tokio::time::Instant;
use tracing::{info, warn};

/// What the caller hands to `match_job`: either a posting URL or a job
/// description they already hold.
#[derive(Debug, Clone)]
pub enum JobSource {
    Url(String),
    Description(JobDescription),
}

/// Sequences extraction, query planning, retrieval, filtering, refinement,
/// and aggregation into one `match_job` operation. Fatal failures abort;
/// everything else degrades into a partial result that says so.
pub struct JobMatchOrchestrator<C, V, M> {
    extractor: JobContentExtractor<C>,
    optimizer: SearchQueryOptimizer,
    coordinator: MultiQuerySearchCoordinator<V>,
    refiner: ExperienceRefiner<M>,
    options: MatchOptions,
}

impl<C, V, M> JobMatchOrchestrator<C, V, M>
where
    C: ContentExtractionService + Send + Sync,
    V: VectorSearchStore + Send + Sync + 'static,
    M: TextGenerationModel + Send + Sync + 'static,
{
    pub fn new(
        content: C,
        store: Arc<V>,
        model: Arc<M>,
        cache: Arc<dyn RefinementCache>,
        options: MatchOptions,
    ) -> Result<Self, crate::error::ExtractionError> {
        Ok(Self {
            extractor: JobContentExtractor::new(content)?,
            optimizer: SearchQueryOptimizer::default(),
            coordinator: MultiQuerySearchCoordinator::new(
                Arc::clone(&store),
                options.per_query_limit,
                options.max_search_concurrency,
                options.diversity_bonus,
            ),
            refiner: ExperienceRefiner::new(
                model,
                cache,
                options.retry.clone(),
                options.refine_concurrency,
            ),
            options,
        })
    }

    pub async fn match_job(&self, source: JobSource) -> Result<JobMatchResult, MatchError> {
        let deadline = self.options.timeout.map(|timeout| Instant::now() + timeout);
        let mut metadata = ProcessingMetadata::default();

        // EXTRACT
        let stage_started = WallInstant::now();
        let job = match source {
            JobSource::Url(url) => {
                let extracted = with_deadline("extract", deadline, async {
                    self.extractor.extract_from_url(&url).await
                })
                .await?;
                extracted.map_err(|source| MatchError::Extraction {
                    url: url.clone(),
                    source,
                })?
            }
            JobSource::Description(job) => {
                validate_description(&job)?;
                job
            }
        };
        record_stage(&mut metadata, "extract", stage_started);
        info!(title = %job.title, company = %job.company, "job description ready");

        // PLAN
        let stage_started = WallInstant::now();
        let queries = self.optimizer.generate(&job);
        metadata.query_count = queries.len();
        record_stage(&mut metadata, "plan", stage_started);

        if queries.is_empty() {
            info!(url = %job.url, "no retrievable signal in job description");
            return Ok(assemble(&job, Vec::new(), metadata));
        }

        // RETRIEVE
        let stage_started = WallInstant::now();
        let outcome = with_deadline("retrieve", deadline, self.coordinator.search_all(&queries))
            .await?
            .map_err(|error| match error {
                SearchError::Exhausted { query_count } => {
                    MatchError::SearchExhausted { query_count }
                }
                other => MatchError::Search(other),
            })?;
        metadata.candidate_count = outcome.candidates.len();
        metadata.failed_queries = outcome.failed_queries;
        record_stage(&mut metadata, "retrieve", stage_started);

        // FILTER
        let stage_started = WallInstant::now();
        let mut candidates = outcome.candidates;
        candidates.retain(|candidate| candidate.aggregated_score >= self.options.min_relevance_score);
        candidates.truncate(self.options.max_experiences_to_match);
        record_stage(&mut metadata, "filter", stage_started);

        if candidates.is_empty() {
            info!(url = %job.url, "no candidate cleared the relevance threshold");
            metadata.partial = metadata.failed_queries > 0;
            return Ok(assemble(&job, Vec::new(), metadata));
        }

        // REFINE
        let stage_started = WallInstant::now();
        let refine = self.refiner.refine_batch(&candidates, &job, deadline).await;
        metadata.cache_hits = refine.cache_hits;
        metadata.cache_misses = refine.cache_misses;
        metadata.refinement_fallbacks = refine.fallbacks;
        record_stage(&mut metadata, "refine", stage_started);

        if refine.timed_out {
            warn!(url = %job.url, "refinement truncated by overall timeout");
        }
        metadata.partial =
            metadata.failed_queries > 0 || refine.fallbacks > 0 || refine.timed_out;

        // AGGREGATE + ASSEMBLE
        let stage_started = WallInstant::now();
        let ordered = order_experiences(refine.refined, &candidates);
        let mut result = assemble(&job, ordered, metadata.clone());
        record_stage(&mut metadata, "aggregate", stage_started);
        result.processing_metadata = metadata;
        Ok(result)
    }
}

async fn with_deadline<T, F>(
    stage: &str,
    deadline: Option<Instant>,
    future: F,
) -> Result<T, MatchError>
where
    F: Future<Output = T>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| MatchError::Timeout {
                stage: stage.to_string(),
            }),
        None => Ok(future.await),
    }
}

fn validate_description(job: &JobDescription) -> Result<(), MatchError> {
    if job.url.trim().is_empty() {
        return Err(MatchError::Validation {
            stage: "extract".to_string(),
            details: "job description has no url".to_string(),
        });
    }
    if job.title.trim().is_empty() {
        return Err(MatchError::Validation {
            stage: "extract".to_string(),
            details: "job description has no title".to_string(),
        });
    }
    if job.full_text.trim().is_empty() && job.summary.trim().is_empty() {
        return Err(MatchError::Validation {
            stage: "extract".to_string(),
            details: "job description has no content".to_string(),
        });
    }
    Ok(())
}

fn record_stage(metadata: &mut ProcessingMetadata, stage: &str, started: WallInstant) {
    metadata
        .stage_timings_ms
        .insert(stage.to_string(), started.elapsed().as_millis() as u64);
}

/// Sorts refined experiences by descending relevance, ties broken by the
/// candidate's aggregated score, then original retrieval order.
fn order_experiences(
    refined: Vec<RefinedExperience>,
    candidates: &[CandidateMatch],
) -> Vec<RefinedExperience> {
    let mut ordered: Vec<(usize, f64, RefinedExperience)> = refined
        .into_iter()
        .enumerate()
        .map(|(index, experience)| {
            let aggregated = candidates
                .get(index)
                .map(|candidate| candidate.aggregated_score)
                .unwrap_or(0.0);
            (index, aggregated, experience)
        })
        .collect();

    ordered.sort_by(|(left_index, left_aggregated, left), (right_index, right_aggregated, right)| {
        right
            .relevance_score
            .total_cmp(&left.relevance_score)
            .then_with(|| right_aggregated.total_cmp(left_aggregated))
            .then_with(|| left_index.cmp(right_index))
    });

    ordered
        .into_iter()
        .map(|(_, _, experience)| experience)
        .collect()
}

fn assemble(
    job: &JobDescription,
    matched: Vec<RefinedExperience>,
    metadata: ProcessingMetadata,
) -> JobMatchResult {
    let aggregated_skills =
        aggregate_terms(matched.iter().map(|experience| &experience.extracted_skills));
    let aggregated_tools =
        aggregate_terms(matched.iter().map(|experience| &experience.extracted_tools));

    let match_score = if matched.is_empty() {
        0.0
    } else {
        matched
            .iter()
            .map(|experience| experience.relevance_score)
            .sum::<f64>()
            / matched.len() as f64
    };

    JobMatchResult {
        job_url: job.url.clone(),
        matched_experiences: matched,
        aggregated_skills,
        aggregated_tools,
        match_score,
        processing_metadata: metadata,
        created_at: Utc::now(),
    }
}

/// Case-insensitive frequency count, ordered by descending count and then
/// first appearance. The first-seen spelling wins.
fn aggregate_terms<'a>(lists: impl Iterator<Item = &'a Vec<String>>) -> Vec<String> {
    let mut counts: Vec<(String, String, usize)> = Vec::new();

    for list in lists {
        for term in list {
            let trimmed = term.trim();
            if trimmed.is_empty() {
                continue;
            }
            let lowered = trimmed.to_lowercase();
            match counts.iter_mut().find(|(key, _, _)| *key == lowered) {
                Some(entry) => entry.2 += 1,
                None => counts.push((lowered, trimmed.to_string(), 1)),
            }
        }
    }

    counts.sort_by(|left, right| right.2.cmp(&left.2));
    counts.into_iter().map(|(_, original, _)| original).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryRefinementCache;
    use crate::error::{ExtractionError, ModelError};
    use crate::models::ExperienceHit;
    use crate::retry::RetryPolicy;
    use crate::traits::{CompletionRequest, ExtractedContent};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct FakeContent {
        text: String,
        hang: bool,
    }

    #[async_trait]
    impl ContentExtractionService for FakeContent {
        async fn extract(&self, url: &str) -> Result<ExtractedContent, ExtractionError> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(ExtractedContent {
                url: url.to_string(),
                title: "Platform Engineer".to_string(),
                text: self.text.clone(),
                summary: String::new(),
                highlights: Vec::new(),
            })
        }
    }

    struct FakeStore {
        by_query: HashMap<String, Vec<ExperienceHit>>,
        fail_all: bool,
        failing: Vec<String>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                by_query: HashMap::new(),
                fail_all: false,
                failing: Vec::new(),
            }
        }

        fn with_hits(mut self, query: &str, hits: Vec<(&str, f64)>) -> Self {
            self.by_query.insert(
                query.to_string(),
                hits.into_iter()
                    .map(|(id, score)| ExperienceHit {
                        experience_id: id.to_string(),
                        raw_text: format!("raw text of {id}"),
                        similarity_score: score,
                    })
                    .collect(),
            );
            self
        }
    }

    #[async_trait]
    impl VectorSearchStore for FakeStore {
        async fn search(
            &self,
            query_text: &str,
            _limit: usize,
        ) -> Result<Vec<ExperienceHit>, SearchError> {
            if self.fail_all || self.failing.iter().any(|q| q == query_text) {
                return Err(SearchError::Request(format!("backend down: {query_text}")));
            }
            Ok(self.by_query.get(query_text).cloned().unwrap_or_default())
        }
    }

    /// Always fails without retry, so refinement passes aggregated scores
    /// through and ordering is fully determined by retrieval.
    struct FailingModel;

    #[async_trait]
    impl TextGenerationModel for FailingModel {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ModelError> {
            Err(ModelError::InvalidResponse("nope".to_string()))
        }
    }

    struct EchoModel;

    #[async_trait]
    impl TextGenerationModel for EchoModel {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ModelError> {
            Ok("{\"refined_accomplishment\": \"Shipped the platform\", \
\"extracted_skills\": [\"Python\", \"kubernetes\"], \
\"extracted_tools\": [\"Docker\"], \"relevance_score\": 0.9, \
\"refinement_notes\": \"\"}"
                .to_string())
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
        }
    }

    fn options() -> MatchOptions {
        MatchOptions {
            min_relevance_score: 0.3,
            max_experiences_to_match: 2,
            retry: quick_retry(),
            ..Default::default()
        }
    }

    fn description(skills: &[&str], full_text: &str) -> JobDescription {
        JobDescription {
            url: "https://jobs.example.com/platform".to_string(),
            title: "Platform Engineer".to_string(),
            company: "Acme".to_string(),
            full_text: full_text.to_string(),
            requirements: Vec::new(),
            skills_mentioned: skills.iter().map(|s| s.to_string()).collect(),
            responsibilities: Vec::new(),
            extracted_keywords: Vec::new(),
            summary: String::new(),
            created_at: Utc::now(),
        }
    }

    fn orchestrator<S, T>(
        content: FakeContent,
        store: S,
        model: T,
        options: MatchOptions,
    ) -> JobMatchOrchestrator<FakeContent, S, T>
    where
        S: VectorSearchStore + Send + Sync + 'static,
        T: TextGenerationModel + Send + Sync + 'static,
    {
        JobMatchOrchestrator::new(
            content,
            Arc::new(store),
            Arc::new(model),
            Arc::new(InMemoryRefinementCache::new()),
            options,
        )
        .expect("orchestrator should build")
    }

    fn no_content() -> FakeContent {
        FakeContent {
            text: String::new(),
            hang: false,
        }
    }

    // The job mentions Python and Kubernetes; a seniority indicator in the
    // full text adds a second query. Three stored experiences score
    // {0.8}, {0.5, 0.6} and {0.2} across those queries.
    #[tokio::test]
    async fn end_to_end_scenario_filters_scores_and_orders() {
        let job = description(&["Python", "Kubernetes"], "senior role");
        let store = FakeStore::new()
            .with_hits(
                "Python Kubernetes",
                vec![("exp-1", 0.8), ("exp-2", 0.5), ("exp-3", 0.2)],
            )
            .with_hits("senior Python Kubernetes", vec![("exp-2", 0.6)]);

        let result = orchestrator(no_content(), store, FailingModel, options())
            .match_job(JobSource::Description(job))
            .await
            .expect("match should succeed");

        assert_eq!(result.matched_experiences.len(), 2);
        assert_eq!(
            result.matched_experiences[0].original_experience_id,
            "exp-1"
        );
        assert_eq!(result.matched_experiences[0].relevance_score, 0.8);
        assert_eq!(
            result.matched_experiences[1].original_experience_id,
            "exp-2"
        );
        assert!((result.matched_experiences[1].relevance_score - 0.65).abs() < 1e-9);
        assert!((result.match_score - 0.725).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_signal_yields_empty_result_without_error() {
        let mut job = description(&[], "plain prose describing nothing technical");
        job.summary = "a lovely team".to_string();

        let result = orchestrator(no_content(), FakeStore::new(), FailingModel, options())
            .match_job(JobSource::Description(job))
            .await
            .expect("empty signal should not error");

        assert!(result.matched_experiences.is_empty());
        assert_eq!(result.match_score, 0.0);
        assert_eq!(result.processing_metadata.query_count, 0);
        assert!(!result.processing_metadata.partial);
    }

    #[tokio::test]
    async fn all_queries_failing_aborts_with_search_exhausted() {
        let job = description(&["Python", "Kubernetes"], "");
        let store = FakeStore {
            fail_all: true,
            ..FakeStore::new()
        };

        let result = orchestrator(no_content(), store, FailingModel, options())
            .match_job(JobSource::Description(job))
            .await;

        assert!(matches!(result, Err(MatchError::SearchExhausted { .. })));
    }

    #[tokio::test]
    async fn one_failed_query_sets_partial() {
        let job = description(&["Python", "Kubernetes"], "senior role");
        let store = FakeStore {
            failing: vec!["senior Python Kubernetes".to_string()],
            ..FakeStore::new()
        }
        .with_hits("Python Kubernetes", vec![("exp-1", 0.8)]);

        let result = orchestrator(no_content(), store, EchoModel, options())
            .match_job(JobSource::Description(job))
            .await
            .expect("partial success should complete");

        assert!(result.processing_metadata.partial);
        assert_eq!(result.processing_metadata.failed_queries, 1);
        assert_eq!(result.matched_experiences.len(), 1);
    }

    #[tokio::test]
    async fn ties_preserve_retrieval_order() {
        let job = description(&["Python", "Kubernetes"], "");
        let store = FakeStore::new().with_hits(
            "Python Kubernetes",
            vec![("exp-first", 0.5), ("exp-second", 0.5)],
        );

        let result = orchestrator(no_content(), store, FailingModel, options())
            .match_job(JobSource::Description(job))
            .await
            .expect("match should succeed");

        let ids: Vec<&str> = result
            .matched_experiences
            .iter()
            .map(|e| e.original_experience_id.as_str())
            .collect();
        assert_eq!(ids, vec!["exp-first", "exp-second"]);
    }

    #[tokio::test]
    async fn refinement_success_aggregates_skills_case_insensitively() {
        let job = description(&["Python", "Kubernetes"], "");
        let store = FakeStore::new().with_hits(
            "Python Kubernetes",
            vec![("exp-1", 0.8), ("exp-2", 0.7)],
        );

        let result = orchestrator(no_content(), store, EchoModel, options())
            .match_job(JobSource::Description(job))
            .await
            .expect("match should succeed");

        // Both experiences contribute "Python" and "kubernetes"; each term
        // appears once, first-seen spelling preserved.
        assert_eq!(
            result.aggregated_skills,
            vec!["Python".to_string(), "kubernetes".to_string()]
        );
        assert_eq!(result.aggregated_tools, vec!["Docker".to_string()]);
        assert!(!result.processing_metadata.partial);
    }

    #[tokio::test]
    async fn candidates_below_threshold_leave_an_empty_result() {
        let job = description(&["Python", "Kubernetes"], "");
        let store =
            FakeStore::new().with_hits("Python Kubernetes", vec![("exp-1", 0.1), ("exp-2", 0.2)]);

        let result = orchestrator(no_content(), store, EchoModel, options())
            .match_job(JobSource::Description(job))
            .await
            .expect("empty filter result should complete");

        assert!(result.matched_experiences.is_empty());
        assert_eq!(result.match_score, 0.0);
        assert_eq!(result.processing_metadata.candidate_count, 2);
    }

    #[tokio::test]
    async fn manual_description_without_title_is_a_validation_error() {
        let mut job = description(&["Python"], "text");
        job.title = String::new();

        let result = orchestrator(no_content(), FakeStore::new(), FailingModel, options())
            .match_job(JobSource::Description(job))
            .await;

        assert!(matches!(result, Err(MatchError::Validation { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_during_extract_is_fatal() {
        let content = FakeContent {
            text: "anything".to_string(),
            hang: true,
        };
        let mut opts = options();
        opts.timeout = Some(Duration::from_millis(100));

        let result = orchestrator(content, FakeStore::new(), FailingModel, opts)
            .match_job(JobSource::Url("https://jobs.example.com/1".to_string()))
            .await;

        match result {
            Err(MatchError::Timeout { stage }) => assert_eq!(stage, "extract"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn url_source_runs_the_extraction_service() {
        let content = FakeContent {
            text: "Requirements:\n- Python services\n- Kubernetes operations\n".to_string(),
            hang: false,
        };
        let store = FakeStore::new().with_hits("Python Kubernetes", vec![("exp-1", 0.9)]);

        let result = orchestrator(content, store, EchoModel, options())
            .match_job(JobSource::Url("https://jobs.example.com/platform".to_string()))
            .await
            .expect("url match should succeed");

        assert_eq!(result.job_url, "https://jobs.example.com/platform");
        assert_eq!(result.matched_experiences.len(), 1);
        assert!(result.processing_metadata.stage_timings_ms.contains_key("extract"));
        assert!(result.processing_metadata.stage_timings_ms.contains_key("refine"));
    }
}
