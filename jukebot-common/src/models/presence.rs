use crate::models::{GuildId, MemberId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    Joined,
    Left,
}

/// A member joined or left the voice channel the bot is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoicePresenceEvent {
    pub guild_id: GuildId,
    pub member_id: MemberId,
    pub change: PresenceChange,
}
