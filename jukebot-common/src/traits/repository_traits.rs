use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::models::{GuildId, HistoryEntry, SessionSnapshot};

/// Durable storage for playback sessions. Used for crash recovery of queue
/// contents and for the play history that seeds the radio.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), Error>;

    /// Newest first.
    async fn recent_history(&self, guild_id: GuildId, limit: usize) -> Result<Vec<HistoryEntry>, Error>;

    async fn load_session(&self, guild_id: GuildId) -> Result<Option<SessionSnapshot>, Error>;
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), Error>;
    async fn delete_snapshot(&self, guild_id: GuildId) -> Result<(), Error>;

    /// Deletes history entries older than `cutoff`; returns how many went.
    async fn purge_history_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Error>;
}
