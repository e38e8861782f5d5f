use crate::error::SearchError;
use crate::models::{CandidateMatch, ExperienceHit, SearchQuery};
use crate::traits::VectorSearchStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub candidates: Vec<CandidateMatch>,
    pub failed_queries: usize,
}

/// Fans out one retrieval call per query and merges the per-query hit lists
/// into a deduplicated, score-ranked candidate list. A record matched by
/// several independent strategies earns a small diversity bonus on top of
/// its best single-query score.
pub struct MultiQuerySearchCoordinator<V> {
    store: Arc<V>,
    per_query_limit: usize,
    max_concurrency: usize,
    diversity_bonus: f64,
}

impl<V> MultiQuerySearchCoordinator<V>
where
    V: VectorSearchStore + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<V>,
        per_query_limit: usize,
        max_concurrency: usize,
        diversity_bonus: f64,
    ) -> Self {
        Self {
            store,
            per_query_limit,
            max_concurrency: max_concurrency.max(1),
            diversity_bonus,
        }
    }

    /// Fails only when every query fails; one failed query among several is
    /// a logged degradation reported through `failed_queries`.
    pub async fn search_all(&self, queries: &[SearchQuery]) -> Result<SearchOutcome, SearchError> {
        if queries.is_empty() {
            return Ok(SearchOutcome {
                candidates: Vec::new(),
                failed_queries: 0,
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for (index, query) in queries.iter().cloned().enumerate() {
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let limit = self.per_query_limit;

            tasks.spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            Err(SearchError::Request("search pool closed".to_string())),
                        )
                    }
                };
                let hits = store.search(&query.text, limit).await;
                drop(permit);
                (index, hits)
            });
        }

        // Slots keep query order so the merge below stays deterministic no
        // matter which call settles first.
        let mut slots: Vec<Option<Vec<ExperienceHit>>> = vec![None; queries.len()];
        let mut failed_queries = 0;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(hits))) => slots[index] = Some(hits),
                Ok((index, Err(error))) => {
                    failed_queries += 1;
                    warn!(query = %queries[index].text, "search query failed: {error}");
                }
                Err(join_error) => {
                    failed_queries += 1;
                    warn!("search task aborted: {join_error}");
                }
            }
        }

        if failed_queries == queries.len() {
            return Err(SearchError::Exhausted {
                query_count: queries.len(),
            });
        }

        let candidates = merge_hits(queries, &slots, self.diversity_bonus);
        debug!(
            candidate_count = candidates.len(),
            failed_queries, "multi-query search merged"
        );

        Ok(SearchOutcome {
            candidates,
            failed_queries,
        })
    }
}

struct Accumulated {
    experience_id: String,
    raw_text: String,
    per_query_scores: BTreeMap<String, f64>,
    first_seen: usize,
}

/// Builds one candidate per distinct experience id. Queries are walked in
/// their original priority order, so `raw_text` and first-seen bookkeeping
/// come from the highest-priority query that returned the record.
fn merge_hits(
    queries: &[SearchQuery],
    slots: &[Option<Vec<ExperienceHit>>],
    diversity_bonus: f64,
) -> Vec<CandidateMatch> {
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut accumulated: Vec<Accumulated> = Vec::new();

    for (query, slot) in queries.iter().zip(slots.iter()) {
        let Some(hits) = slot else { continue };

        for hit in hits {
            let score = hit.similarity_score.clamp(0.0, 1.0);
            let position = match by_id.get(&hit.experience_id) {
                Some(position) => *position,
                None => {
                    let position = accumulated.len();
                    by_id.insert(hit.experience_id.clone(), position);
                    accumulated.push(Accumulated {
                        experience_id: hit.experience_id.clone(),
                        raw_text: hit.raw_text.clone(),
                        per_query_scores: BTreeMap::new(),
                        first_seen: position,
                    });
                    position
                }
            };

            let entry = &mut accumulated[position];
            let recorded = entry
                .per_query_scores
                .entry(query.text.clone())
                .or_insert(score);
            if score > *recorded {
                *recorded = score;
            }
        }
    }

    let mut ranked: Vec<(usize, CandidateMatch)> = accumulated
        .into_iter()
        .map(|entry| {
            let matched_query_count = entry.per_query_scores.len();
            let best = entry
                .per_query_scores
                .values()
                .fold(0.0f64, |acc, score| acc.max(*score));
            let aggregated_score = (best
                + diversity_bonus * matched_query_count.saturating_sub(1) as f64)
                .min(1.0);

            (
                entry.first_seen,
                CandidateMatch {
                    experience_id: entry.experience_id,
                    raw_text: entry.raw_text,
                    per_query_scores: entry.per_query_scores,
                    matched_query_count,
                    aggregated_score,
                },
            )
        })
        .collect();

    ranked.sort_by(|(left_seen, left), (right_seen, right)| {
        right
            .aggregated_score
            .total_cmp(&left.aggregated_score)
            .then_with(|| right.matched_query_count.cmp(&left.matched_query_count))
            .then_with(|| left_seen.cmp(right_seen))
    });

    ranked.into_iter().map(|(_, candidate)| candidate).collect()
}
