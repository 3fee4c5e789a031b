use std::fmt;

use uuid::Uuid;

use crate::models::{GuildId, TrackId, TrackOutcome};

/// Identifies one started track on the transport. A fresh handle is allocated
/// for every start, so completions for superseded tracks can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle {
    pub id: Uuid,
    pub guild_id: GuildId,
}

impl TransportHandle {
    pub fn new(guild_id: GuildId) -> Self {
        Self { id: Uuid::new_v4(), guild_id }
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    Completed,
    Errored,
    Superseded,
}

impl From<TransportOutcome> for TrackOutcome {
    fn from(o: TransportOutcome) -> Self {
        match o {
            TransportOutcome::Completed => TrackOutcome::Completed,
            TransportOutcome::Errored => TrackOutcome::Errored,
            TransportOutcome::Superseded => TrackOutcome::Superseded,
        }
    }
}

/// Sent by a transport exactly once per started track.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportFinished {
    pub handle: TransportHandle,
    pub track_id: TrackId,
    pub outcome: TransportOutcome,
}
