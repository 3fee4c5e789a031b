// src/playback/registry.rs
//
// Process-wide map from guild to playback session. The map is the only
// cross-guild shared structure; nothing awaits while a shard is held.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jukebot_common::models::{GuildId, TransportFinished};

use crate::config::EngineConfig;
use crate::eventbus::EventBus;
use crate::playback::session::{PlaybackSession, SessionDeps, StateGuard};
use crate::Error;

pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<PlaybackSession>>,
    deps: SessionDeps,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            sessions: DashMap::new(),
            deps,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.deps.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.deps.event_bus
    }

    /// Returns the guild's session, creating it if needed. A new session is
    /// inserted already locked and restores its snapshot after insertion, so
    /// concurrent callers wait on the session, not on the map.
    pub async fn get_or_create(&self, guild_id: GuildId) -> Result<Arc<PlaybackSession>, Error> {
        let created = match self.sessions.entry(guild_id) {
            Entry::Occupied(mut e) => {
                if !e.get().is_closed() {
                    return Ok(e.get().clone());
                }
                let (session, guard) = self.fresh_session(guild_id)?;
                e.insert(session.clone());
                (session, guard)
            }
            Entry::Vacant(v) => {
                let (session, guard) = self.fresh_session(guild_id)?;
                v.insert(session.clone());
                (session, guard)
            }
        };

        let (session, guard) = created;
        info!("Registry: created session for guild {}", guild_id);
        session.restore(guard).await;
        Ok(session)
    }

    fn fresh_session(&self, guild_id: GuildId) -> Result<(Arc<PlaybackSession>, StateGuard), Error> {
        let session = Arc::new(PlaybackSession::new(guild_id, self.deps.clone()));
        let guard = session.try_lock_fresh()?;
        Ok((session, guard))
    }

    pub fn get(&self, guild_id: GuildId) -> Result<Arc<PlaybackSession>, Error> {
        self.lookup(guild_id)
            .ok_or_else(|| Error::NotFound(format!("no active session for guild {}", guild_id)))
    }

    /// Like `get`, but without building an error for the common miss.
    pub fn lookup(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions
            .get(&guild_id)
            .map(|s| s.clone())
            .filter(|s| !s.is_closed())
    }

    /// Detaches and closes the guild's session, and forgets its snapshot.
    pub async fn remove(&self, guild_id: GuildId) -> Result<(), Error> {
        let (_, session) = self
            .sessions
            .remove(&guild_id)
            .ok_or_else(|| Error::NotFound(format!("no active session for guild {}", guild_id)))?;
        session.close().await?;
        self.forget_snapshot(guild_id).await;
        info!("Registry: removed session for guild {}", guild_id);
        Ok(())
    }

    /// Detaches a session that was already closed, if it is still the one
    /// registered for its guild.
    pub async fn retire(&self, session: &Arc<PlaybackSession>) -> bool {
        let guild_id = session.guild_id();
        let removed = self
            .sessions
            .remove_if(&guild_id, |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            self.forget_snapshot(guild_id).await;
        }
        removed
    }

    async fn forget_snapshot(&self, guild_id: GuildId) {
        if let Err(e) = self.deps.repository.delete_snapshot(guild_id).await {
            warn!("Registry: could not delete snapshot for guild {}: {}", guild_id, e);
        }
    }

    /// Point-in-time list of sessions. Safe to await on while iterating.
    pub fn sessions(&self) -> Vec<Arc<PlaybackSession>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Closes every session. Snapshots are kept so queues survive a restart.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = {
            let keys: Vec<GuildId> = self.sessions.iter().map(|e| *e.key()).collect();
            keys.into_iter()
                .filter_map(|k| self.sessions.remove(&k).map(|(_, s)| s))
                .collect()
        };
        info!("Registry: shutting down {} session(s)", sessions.len());
        let results = join_all(sessions.iter().map(|s| s.close())).await;
        for (session, res) in sessions.iter().zip(results) {
            if let Err(e) = res {
                warn!("Registry: closing guild {} failed: {}", session.guild_id(), e);
            }
        }
    }

    /// Routes transport completions to their sessions. Each completion is
    /// handled on its own task, so one guild's advance never holds up another.
    pub fn spawn_transport_listener(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<TransportFinished>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(finished) = rx.recv().await {
                let guild_id = finished.handle.guild_id;
                let Some(session) = registry.lookup(guild_id) else {
                    debug!("Registry: completion for guild {} without a session", guild_id);
                    continue;
                };
                tokio::spawn(async move {
                    if let Err(e) = session.on_transport_finished(finished).await {
                        warn!("Registry: advance for guild {} failed: {}", guild_id, e);
                    }
                });
            }
            debug!("Registry: transport channel closed");
        })
    }
}
