use crate::models::RefinedExperience;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Refinement cache capability. Injected into the refiner at construction;
/// the backing store and its lifetime belong to the caller, never to a
/// process-wide singleton. Writes are last-write-wins.
#[async_trait]
pub trait RefinementCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<RefinedExperience>;
    async fn put(&self, key: &str, value: RefinedExperience);
}

#[derive(Default)]
pub struct InMemoryRefinementCache {
    entries: Mutex<HashMap<String, RefinedExperience>>,
}

impl InMemoryRefinementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[async_trait]
impl RefinementCache for InMemoryRefinementCache {
    async fn get(&self, key: &str) -> Option<RefinedExperience> {
        self.entries.lock().await.get(key).cloned()
    }

    async fn put(&self, key: &str, value: RefinedExperience) {
        self.entries.lock().await.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryRefinementCache, RefinementCache};
    use crate::models::RefinedExperience;

    fn entry(id: &str) -> RefinedExperience {
        RefinedExperience {
            original_experience_id: id.to_string(),
            refined_accomplishment: "did a thing".to_string(),
            extracted_skills: Vec::new(),
            extracted_tools: Vec::new(),
            relevance_score: 0.5,
            refinement_notes: String::new(),
            cache_key: format!("{id}:job"),
        }
    }

    #[tokio::test]
    async fn put_then_get_returns_stored_value() {
        let cache = InMemoryRefinementCache::new();
        cache.put("exp-1:job", entry("exp-1")).await;

        let hit = cache.get("exp-1:job").await.expect("entry should exist");
        assert_eq!(hit.original_experience_id, "exp-1");
        assert!(cache.get("exp-2:job").await.is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let cache = InMemoryRefinementCache::new();
        cache.put("key", entry("exp-1")).await;

        let mut updated = entry("exp-1");
        updated.relevance_score = 0.9;
        cache.put("key", updated).await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("key").await.unwrap().relevance_score, 0.9);
    }
}
