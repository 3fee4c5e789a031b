// jukebot-core/src/repositories/postgres/session.rs
//
// Stores one snapshot per guild in "guild_sessions" and every finished track
// in "track_history". Tracks and snapshots are kept as JSONB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use jukebot_common::error::Error;
use jukebot_common::models::{GuildId, HistoryEntry, SessionSnapshot, Track, TrackOutcome};
use jukebot_common::traits::SessionRepository;

fn guild_key(guild_id: GuildId) -> i64 {
    guild_id.get() as i64
}

fn guild_from_key(raw: i64) -> Result<GuildId, Error> {
    GuildId::new_checked(raw as u64).ok_or_else(|| Error::Parse(format!("invalid guild id {raw}")))
}

#[derive(Clone)]
pub struct PostgresSessionRepository {
    pool: Pool<Postgres>,
}

impl PostgresSessionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), Error> {
        let q = r#"
            INSERT INTO track_history
                (history_id, guild_id, track_id, title, track, outcome, requester_id, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;
        sqlx::query(q)
            .bind(Uuid::new_v4())
            .bind(guild_key(entry.guild_id))
            .bind(entry.track.id.as_str())
            .bind(&entry.track.title)
            .bind(Json(&entry.track))
            .bind(entry.outcome.as_str())
            .bind(entry.track.requester_id().map(|id| id.get() as i64))
            .bind(entry.finished_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_history(&self, guild_id: GuildId, limit: usize) -> Result<Vec<HistoryEntry>, Error> {
        let q = r#"
            SELECT guild_id, track, outcome, finished_at
            FROM track_history
            WHERE guild_id = $1
            ORDER BY finished_at DESC
            LIMIT $2
        "#;
        let rows = sqlx::query(q)
            .bind(guild_key(guild_id))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let Json(track): Json<Track> = r.try_get("track")?;
            let outcome: String = r.try_get("outcome")?;
            out.push(HistoryEntry {
                guild_id: guild_from_key(r.try_get("guild_id")?)?,
                track,
                finished_at: r.try_get("finished_at")?,
                outcome: outcome.parse::<TrackOutcome>()?,
            });
        }
        Ok(out)
    }

    async fn load_session(&self, guild_id: GuildId) -> Result<Option<SessionSnapshot>, Error> {
        let q = r#"
            SELECT snapshot
            FROM guild_sessions
            WHERE guild_id = $1
        "#;
        let row = sqlx::query(q)
            .bind(guild_key(guild_id))
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => {
                let Json(snapshot): Json<SessionSnapshot> = r.try_get("snapshot")?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), Error> {
        let q = r#"
            INSERT INTO guild_sessions (guild_id, loop_mode, volume, snapshot, saved_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (guild_id)
            DO UPDATE SET loop_mode = EXCLUDED.loop_mode,
                          volume    = EXCLUDED.volume,
                          snapshot  = EXCLUDED.snapshot,
                          saved_at  = EXCLUDED.saved_at
        "#;
        sqlx::query(q)
            .bind(guild_key(snapshot.guild_id))
            .bind(snapshot.loop_mode.to_string())
            .bind(snapshot.volume)
            .bind(Json(snapshot))
            .bind(snapshot.saved_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_snapshot(&self, guild_id: GuildId) -> Result<(), Error> {
        sqlx::query("DELETE FROM guild_sessions WHERE guild_id = $1")
            .bind(guild_key(guild_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_history_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let res = sqlx::query("DELETE FROM track_history WHERE finished_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}
