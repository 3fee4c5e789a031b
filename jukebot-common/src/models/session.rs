use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{GuildId, Track};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl LoopMode {
    /// Off -> Track -> Queue -> Off
    pub fn next(self) -> Self {
        match self {
            LoopMode::Off => LoopMode::Track,
            LoopMode::Track => LoopMode::Queue,
            LoopMode::Queue => LoopMode::Off,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopMode::Off => "off",
            LoopMode::Track => "track",
            LoopMode::Queue => "queue",
        };
        f.write_str(s)
    }
}

impl FromStr for LoopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(LoopMode::Off),
            "track" | "song" => Ok(LoopMode::Track),
            "queue" | "all" => Ok(LoopMode::Queue),
            other => Err(format!("unknown loop mode '{other}'")),
        }
    }
}

/// Lifecycle state of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    /// Between one track ending and the next starting.
    Transitioning,
    Closed,
}

impl PlaybackState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Transitioning
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Transitioning => "transitioning",
            PlaybackState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Durable copy of a session's queue, written after every mutation and read
/// back when a session for the same guild is created again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub loop_mode: LoopMode,
    pub volume: f32,
    pub now_playing: Option<Track>,
    pub pending: Vec<Track>,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.now_playing.is_none() && self.pending.is_empty()
    }

    /// Tracks in play order, the interrupted now-playing track first.
    pub fn into_tracks(self) -> Vec<Track> {
        self.now_playing.into_iter().chain(self.pending).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_mode_cycles() {
        assert_eq!(LoopMode::Off.next(), LoopMode::Track);
        assert_eq!(LoopMode::Track.next(), LoopMode::Queue);
        assert_eq!(LoopMode::Queue.next(), LoopMode::Off);
    }

    #[test]
    fn test_loop_mode_parse() {
        assert_eq!("QUEUE".parse::<LoopMode>().unwrap(), LoopMode::Queue);
        assert_eq!("song".parse::<LoopMode>().unwrap(), LoopMode::Track);
        assert!("sideways".parse::<LoopMode>().is_err());
    }
}
