// src/services/radio/mod.rs
//
// Keeps a session's queue topped up with recommended tracks while radio is on.

pub mod cache;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jukebot_common::models::{GuildId, PlaybackState, RadioDisabledReason, Track};
use jukebot_common::traits::Recommender;

use crate::config::{RadioConfig, RetryConfig};
use crate::eventbus::{BotEvent, EventBus, SessionEvent};
use crate::playback::SessionRegistry;
use crate::utils::retry_with_backoff;
use crate::Error;

pub use cache::{CacheConfig, RecommendationCache};

#[derive(Debug, Clone, Default)]
struct RadioState {
    generated: usize,
    refilling: bool,
}

pub struct RadioController {
    registry: Arc<SessionRegistry>,
    recommender: Arc<dyn Recommender>,
    event_bus: Arc<EventBus>,
    cache: Mutex<RecommendationCache>,
    states: DashMap<GuildId, RadioState>,
    config: RadioConfig,
    retry: RetryConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RadioController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        recommender: Arc<dyn Recommender>,
        event_bus: Arc<EventBus>,
        config: RadioConfig,
        retry: RetryConfig,
    ) -> Self {
        let cache = RecommendationCache::new(CacheConfig {
            ttl: config.cache_ttl(),
            max_entries: config.cache_max_entries,
        });
        Self {
            registry,
            recommender,
            event_bus,
            cache: Mutex::new(cache),
            states: DashMap::new(),
            config,
            retry,
            task: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self, guild_id: GuildId) -> bool {
        self.states.contains_key(&guild_id)
    }

    pub fn generated(&self, guild_id: GuildId) -> usize {
        self.states.get(&guild_id).map(|s| s.generated).unwrap_or(0)
    }

    /// Turns radio on or off for the guild and returns the new setting.
    /// Enabling needs something playing to seed from, and fills right away.
    pub async fn toggle(&self, guild_id: GuildId) -> Result<bool, Error> {
        if self.states.remove(&guild_id).is_some() {
            info!("Radio: disabled for guild {}", guild_id);
            return Ok(false);
        }

        let session = self.registry.get(guild_id)?;
        let status = session.status().await?;
        if status.now_playing.is_none() {
            return Err(Error::invalid_state("enable radio", PlaybackState::Idle));
        }
        self.states.insert(guild_id, RadioState::default());
        info!("Radio: enabled for guild {}", guild_id);

        if let Err(e) = self.refill(guild_id).await {
            warn!("Radio: initial fill for guild {} failed: {}", guild_id, e);
        }
        Ok(true)
    }

    /// Reacts to low and exhausted queues on the bus until `stop` or shutdown.
    pub async fn start(self: &Arc<Self>) {
        let mut rx = self.event_bus.subscribe(None).await;
        let mut shutdown_rx = self.event_bus.shutdown_rx.clone();
        let me = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(BotEvent::Session(SessionEvent::QueueLow { guild_id, .. }))
                            | Some(BotEvent::Session(SessionEvent::QueueExhausted { guild_id })) => {
                                if me.is_enabled(guild_id) {
                                    let me = Arc::clone(&me);
                                    tokio::spawn(async move {
                                        if let Err(e) = me.refill(guild_id).await {
                                            error!("Radio: refill for guild {} failed: {}", guild_id, e);
                                        }
                                    });
                                }
                            }
                            Some(BotEvent::Session(SessionEvent::SessionClosed { guild_id })) => {
                                me.states.remove(&guild_id);
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Radio: listener stopped");
        });

        let mut task = self.task.lock().await;
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }

    /// Tops up the guild's queue if radio is on and the queue is low. At most
    /// one refill per guild runs at a time. Returns how many tracks were added.
    pub async fn refill(&self, guild_id: GuildId) -> Result<usize, Error> {
        let remaining = {
            let Some(mut state) = self.states.get_mut(&guild_id) else {
                return Ok(0);
            };
            if state.refilling {
                return Ok(0);
            }
            state.refilling = true;
            self.config.max_tracks_per_session.saturating_sub(state.generated)
        };

        let result = if remaining == 0 {
            Ok(0)
        } else {
            self.fill(guild_id, remaining).await
        };

        let cap_reached = match self.states.get_mut(&guild_id) {
            Some(mut state) => {
                state.refilling = false;
                if let Ok(added) = &result {
                    state.generated += *added;
                }
                (state.generated >= self.config.max_tracks_per_session).then_some(state.generated)
            }
            // Turned off while the refill ran.
            None => None,
        };

        if let Some(generated) = cap_reached {
            self.states.remove(&guild_id);
            info!("Radio: guild {} reached {} generated tracks, disabling", guild_id, generated);
            self.event_bus
                .publish_session(SessionEvent::RadioDisabled {
                    guild_id,
                    reason: RadioDisabledReason::CapReached { generated },
                })
                .await;
        }
        result
    }

    async fn fill(&self, guild_id: GuildId, remaining: usize) -> Result<usize, Error> {
        let session = self.registry.get(guild_id)?;
        let status = session.status().await?;
        if status.pending.len() > self.config.low_water_mark {
            return Ok(0);
        }

        let seeds = session.radio_seeds(self.config.seed_history).await;
        if seeds.is_empty() {
            debug!("Radio: no seeds for guild {}", guild_id);
            return Ok(0);
        }
        let count = self.config.batch_size.min(remaining);
        let Some(suggestions) = self.recommendations(&seeds, count).await else {
            return Ok(0);
        };

        let tracks: Vec<Track> = suggestions
            .into_iter()
            .map(Track::as_recommendation)
            .take(count)
            .collect();
        let added = session.enqueue_unique(tracks).await?;
        info!("Radio: added {} track(s) to guild {}", added, guild_id);
        Ok(added)
    }

    /// Cached answer if fresh, else ask the recommender. Failures are logged
    /// and yield `None` so playback carries on without a refill.
    async fn recommendations(&self, seeds: &[Track], count: usize) -> Option<Vec<Track>> {
        let key = RecommendationCache::fingerprint(seeds, count);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            debug!("Radio: cache hit for {}", key);
            return Some(hit);
        }

        let recommender: &dyn Recommender = self.recommender.as_ref();
        let result = retry_with_backoff(&self.retry, "recommend", move || recommender.suggest(seeds, count)).await;
        match result {
            Ok(tracks) => {
                self.cache.lock().await.insert(key, tracks.clone());
                Some(tracks)
            }
            Err(e) => {
                warn!("Radio: recommender failed, skipping this refill: {}", e);
                None
            }
        }
    }

    /// Drops expired cache entries. Called from the cleanup task.
    pub async fn purge_cache(&self) -> usize {
        self.cache.lock().await.trim()
    }
}
