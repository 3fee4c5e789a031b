// src/repositories/memory.rs
//
// Memory-only persistence for running without Postgres, and for tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use jukebot_common::error::Error;
use jukebot_common::models::{GuildId, HistoryEntry, SessionSnapshot};
use jukebot_common::traits::SessionRepository;

const HISTORY_PER_GUILD: usize = 500;

#[derive(Default)]
pub struct InMemorySessionRepository {
    snapshots: DashMap<GuildId, SessionSnapshot>,
    history: DashMap<GuildId, VecDeque<HistoryEntry>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, guild_id: GuildId) -> Option<SessionSnapshot> {
        self.snapshots.get(&guild_id).map(|s| s.clone())
    }

    pub fn history_len(&self, guild_id: GuildId) -> usize {
        self.history.get(&guild_id).map(|h| h.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), Error> {
        let mut log = self.history.entry(entry.guild_id).or_default();
        log.push_front(entry.clone());
        log.truncate(HISTORY_PER_GUILD);
        Ok(())
    }

    async fn recent_history(&self, guild_id: GuildId, limit: usize) -> Result<Vec<HistoryEntry>, Error> {
        Ok(self
            .history
            .get(&guild_id)
            .map(|h| h.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn load_session(&self, guild_id: GuildId) -> Result<Option<SessionSnapshot>, Error> {
        Ok(self.snapshot(guild_id))
    }

    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), Error> {
        self.snapshots.insert(snapshot.guild_id, snapshot.clone());
        Ok(())
    }

    async fn delete_snapshot(&self, guild_id: GuildId) -> Result<(), Error> {
        self.snapshots.remove(&guild_id);
        Ok(())
    }

    async fn purge_history_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let mut purged = 0;
        for mut log in self.history.iter_mut() {
            let before = log.len();
            log.retain(|e| e.finished_at >= cutoff);
            purged += (before - log.len()) as u64;
        }
        Ok(purged)
    }
}
