use crate::cache::RefinementCache;
use crate::error::ModelError;
use crate::models::{CandidateMatch, JobDescription, RefinedExperience};
use crate::prompts::{build_refinement_prompt, parse_refinement_response, REFINEMENT_SYSTEM_PROMPT};
use crate::retry::RetryPolicy;
use crate::traits::{CompletionRequest, TextGenerationModel};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

const FALLBACK_ACCOMPLISHMENT_CHARS: usize = 280;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefineKind {
    CacheHit,
    Refined,
    Fallback,
}

#[derive(Debug, Clone, Default)]
pub struct RefineOutcome {
    pub refined: Vec<RefinedExperience>,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub fallbacks: usize,
    pub timed_out: bool,
}

/// Rewrites candidate records into job-tailored accomplishment statements.
/// Every result is cached by (record, job fingerprint); a model that stays
/// down degrades to a pass-through fallback instead of failing the pipeline.
pub struct ExperienceRefiner<M> {
    model: Arc<M>,
    cache: Arc<dyn RefinementCache>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl<M> ExperienceRefiner<M>
where
    M: TextGenerationModel + Send + Sync + 'static,
{
    pub fn new(
        model: Arc<M>,
        cache: Arc<dyn RefinementCache>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            model,
            cache,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Refines candidates in parallel (bounded pool), preserving input
    /// order. When `deadline` expires, in-flight calls are abandoned and
    /// the unfinished slots are filled with pass-through fallbacks.
    pub async fn refine_batch(
        &self,
        candidates: &[CandidateMatch],
        job: &JobDescription,
        deadline: Option<Instant>,
    ) -> RefineOutcome {
        if candidates.is_empty() {
            return RefineOutcome::default();
        }

        let fingerprint = Arc::new(job_fingerprint(job));
        let job = Arc::new(job.clone());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let slots: Arc<Mutex<Vec<Option<(RefinedExperience, RefineKind)>>>> =
            Arc::new(Mutex::new(vec![None; candidates.len()]));

        let mut tasks = JoinSet::new();
        for (index, candidate) in candidates.iter().cloned().enumerate() {
            let model = Arc::clone(&self.model);
            let cache = Arc::clone(&self.cache);
            let retry = self.retry.clone();
            let job = Arc::clone(&job);
            let fingerprint = Arc::clone(&fingerprint);
            let semaphore = Arc::clone(&semaphore);
            let slots = Arc::clone(&slots);

            tasks.spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result =
                    refine_one(model, cache, retry, &candidate, &job, &fingerprint).await;
                drop(permit);

                if let Ok(mut guard) = slots.lock() {
                    guard[index] = Some(result);
                }
            });
        }

        let mut timed_out = false;
        match deadline {
            Some(deadline) => {
                let join_all = async {
                    while tasks.join_next().await.is_some() {}
                };
                if tokio::time::timeout_at(deadline, join_all).await.is_err() {
                    warn!("refinement deadline expired, abandoning in-flight calls");
                    tasks.abort_all();
                    timed_out = true;
                }
            }
            None => while tasks.join_next().await.is_some() {},
        }

        let slots = match slots.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        let mut outcome = RefineOutcome {
            timed_out,
            ..Default::default()
        };
        for (candidate, slot) in candidates.iter().zip(slots) {
            match slot {
                Some((refined, kind)) => {
                    match kind {
                        RefineKind::CacheHit => outcome.cache_hits += 1,
                        RefineKind::Refined => outcome.cache_misses += 1,
                        RefineKind::Fallback => {
                            outcome.cache_misses += 1;
                            outcome.fallbacks += 1;
                        }
                    }
                    outcome.refined.push(refined);
                }
                None => {
                    // Abandoned by the deadline; the pre-refinement score
                    // carries through untouched.
                    outcome.fallbacks += 1;
                    outcome.refined.push(fallback_experience(
                        candidate,
                        cache_key(&candidate.experience_id, &fingerprint),
                        "deadline exceeded",
                    ));
                }
            }
        }

        outcome
    }
}

async fn refine_one<M>(
    model: Arc<M>,
    cache: Arc<dyn RefinementCache>,
    retry: RetryPolicy,
    candidate: &CandidateMatch,
    job: &JobDescription,
    fingerprint: &str,
) -> (RefinedExperience, RefineKind)
where
    M: TextGenerationModel + Send + Sync,
{
    let key = cache_key(&candidate.experience_id, fingerprint);

    if let Some(cached) = cache.get(&key).await {
        debug!(experience_id = %candidate.experience_id, "refinement cache hit");
        return (cached, RefineKind::CacheHit);
    }

    let request = CompletionRequest {
        system: REFINEMENT_SYSTEM_PROMPT.to_string(),
        prompt: build_refinement_prompt(job, candidate),
    };

    let refined = retry
        .run("refinement", |error: &ModelError| error.is_transient(), || async {
            let raw = model.complete(&request).await?;
            parse_refinement_response(&raw)
        })
        .await;

    match refined {
        Ok(response) => {
            let experience = RefinedExperience {
                original_experience_id: candidate.experience_id.clone(),
                refined_accomplishment: response.refined_accomplishment,
                extracted_skills: response.extracted_skills,
                extracted_tools: response.extracted_tools,
                relevance_score: response.relevance_score,
                refinement_notes: response.refinement_notes,
                cache_key: key.clone(),
            };
            cache.put(&key, experience.clone()).await;
            (experience, RefineKind::Refined)
        }
        Err(error) => {
            warn!(
                experience_id = %candidate.experience_id,
                "refinement failed, using pass-through fallback: {error}"
            );
            let experience = fallback_experience(candidate, key.clone(), &error.to_string());
            // Cached as well, so a model that stays down is not hammered
            // for the same (record, job) pair within a session.
            cache.put(&key, experience.clone()).await;
            (experience, RefineKind::Fallback)
        }
    }
}

/// Stable fingerprint of a job description, used with a record id to
/// address the refinement cache.
pub fn job_fingerprint(job: &JobDescription) -> String {
    let mut skills = job.skills_mentioned.clone();
    skills.sort();
    let mut requirements = job.requirements.clone();
    requirements.sort();

    let mut hasher = Sha256::new();
    hasher.update(job.url.as_bytes());
    hasher.update(job.title.as_bytes());
    hasher.update(job.company.as_bytes());
    for skill in &skills {
        hasher.update(skill.as_bytes());
    }
    for requirement in &requirements {
        hasher.update(requirement.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn cache_key(experience_id: &str, fingerprint: &str) -> String {
    format!("{experience_id}:{fingerprint}")
}

fn fallback_experience(
    candidate: &CandidateMatch,
    cache_key: String,
    reason: &str,
) -> RefinedExperience {
    RefinedExperience {
        original_experience_id: candidate.experience_id.clone(),
        refined_accomplishment: truncate_chars(&candidate.raw_text, FALLBACK_ACCOMPLISHMENT_CHARS),
        extracted_skills: Vec::new(),
        extracted_tools: Vec::new(),
        relevance_score: candidate.aggregated_score.clamp(0.0, 1.0),
        refinement_notes: format!("refinement_failed: {reason}"),
        cache_key,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
