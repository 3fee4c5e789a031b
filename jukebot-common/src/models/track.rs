use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{GuildId, MemberId};

/// Source URL or provider id of a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: MemberId,
    pub display_name: String,
}

/// Opaque playable stream handed out by the resolver.
/// Stream URLs typically expire, so they are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub stream_url: String,
    pub format: Option<String>,
}

/// A playable item. Values are immutable; resolving or re-attributing a track
/// produces a new `Track`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub source_url: String,
    pub artist: Option<String>,
    pub duration: Option<Duration>,
    pub requester: Option<Requester>,
    #[serde(skip)]
    pub stream: Option<StreamDescriptor>,
    #[serde(default)]
    pub from_recommendation: bool,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: TrackId::new(id),
            title: title.into(),
            source_url: source_url.into(),
            artist: None,
            duration: None,
            requester: None,
            stream: None,
            from_recommendation: false,
        }
    }

    pub fn with_artist(self, artist: impl Into<String>) -> Self {
        Self { artist: Some(artist.into()), ..self }
    }

    pub fn with_duration(self, duration: Duration) -> Self {
        Self { duration: Some(duration), ..self }
    }

    pub fn with_requester(self, id: MemberId, display_name: impl Into<String>) -> Self {
        Self {
            requester: Some(Requester { id, display_name: display_name.into() }),
            ..self
        }
    }

    pub fn with_stream(self, stream: StreamDescriptor) -> Self {
        Self { stream: Some(stream), ..self }
    }

    /// Marks the track as generated by the recommender. Radio tracks have no requester.
    pub fn as_recommendation(self) -> Self {
        Self { from_recommendation: true, requester: None, ..self }
    }

    pub fn is_resolved(&self) -> bool {
        self.stream.is_some()
    }

    pub fn requested_by(&self, member: MemberId) -> bool {
        self.requester.as_ref().is_some_and(|r| r.id == member)
    }

    pub fn requester_id(&self) -> Option<MemberId> {
        self.requester.as_ref().map(|r| r.id)
    }

    /// "Artist - Title" when the artist is known.
    pub fn display_title(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} - {}", artist, self.title),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOutcome {
    Completed,
    Skipped,
    Errored,
    Superseded,
}

impl TrackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackOutcome::Completed => "completed",
            TrackOutcome::Skipped => "skipped",
            TrackOutcome::Errored => "errored",
            TrackOutcome::Superseded => "superseded",
        }
    }
}

impl fmt::Display for TrackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TrackOutcome::Completed),
            "skipped" => Ok(TrackOutcome::Skipped),
            "errored" => Ok(TrackOutcome::Errored),
            "superseded" => Ok(TrackOutcome::Superseded),
            other => Err(format!("unknown track outcome '{other}'")),
        }
    }
}

/// A finished track in a guild's history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub guild_id: GuildId,
    pub track: Track,
    pub finished_at: DateTime<Utc>,
    pub outcome: TrackOutcome,
}

impl HistoryEntry {
    pub fn new(guild_id: GuildId, track: Track, outcome: TrackOutcome) -> Self {
        Self {
            guild_id,
            track,
            finished_at: Utc::now(),
            outcome,
        }
    }
}
