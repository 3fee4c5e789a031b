// File: src/services/radio/cache.rs

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use jukebot_common::models::Track;

/// Rules for trimming the cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

#[derive(Debug, Clone)]
struct CachedRecommendation {
    tracks: Vec<Track>,
    inserted_at: Instant,
}

/// Recommender answers keyed by a fingerprint of the seed set.
pub struct RecommendationCache {
    entries: HashMap<String, CachedRecommendation>,
    config: CacheConfig,
}

impl RecommendationCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
        }
    }

    /// Order-insensitive key: normalized seed ids plus the requested count.
    pub fn fingerprint(seeds: &[Track], count: usize) -> String {
        let ids: BTreeSet<String> = seeds
            .iter()
            .map(|t| t.id.as_str().trim().to_lowercase())
            .collect();
        let joined: Vec<String> = ids.into_iter().collect();
        format!("{}|{}", joined.join(","), count)
    }

    pub fn get(&mut self, key: &str) -> Option<Vec<Track>> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() >= self.config.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.tracks.clone())
    }

    pub fn insert(&mut self, key: String, tracks: Vec<Track>) {
        self.entries.insert(
            key,
            CachedRecommendation {
                tracks,
                inserted_at: Instant::now(),
            },
        );
        self.trim();
    }

    /// Drops expired entries, then the oldest ones while over `max_entries`.
    /// Returns how many entries were removed.
    pub fn trim(&mut self) -> usize {
        let before = self.entries.len();
        let ttl = self.config.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);

        while self.entries.len() > self.config.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                }
                None => break,
            }
        }
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
