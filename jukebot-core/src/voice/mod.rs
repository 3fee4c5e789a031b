// src/voice/mod.rs
//
// Tracks who is in the bot's voice channel per guild. The roster is the
// source of listener counts for vote thresholds and the auto-skip prompt.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use jukebot_common::models::{GuildId, MemberId, PresenceChange, VoicePresenceEvent};

use crate::eventbus::{BotEvent, EventBus};

#[derive(Default)]
pub struct VoiceRoster {
    occupants: DashMap<GuildId, HashSet<MemberId>>,
}

impl VoiceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: &VoicePresenceEvent) {
        match event.change {
            PresenceChange::Joined => {
                self.occupants
                    .entry(event.guild_id)
                    .or_default()
                    .insert(event.member_id);
            }
            PresenceChange::Left => {
                if let Some(mut members) = self.occupants.get_mut(&event.guild_id) {
                    members.remove(&event.member_id);
                }
                self.occupants.remove_if(&event.guild_id, |_, members| members.is_empty());
            }
        }
    }

    /// Listeners in the guild's voice channel, not counting the bot.
    pub fn listener_count(&self, guild_id: GuildId) -> usize {
        self.occupants.get(&guild_id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_present(&self, guild_id: GuildId, member_id: MemberId) -> bool {
        self.occupants
            .get(&guild_id)
            .is_some_and(|m| m.contains(&member_id))
    }

    /// Forget a guild entirely, e.g. when the bot leaves its channel.
    pub fn clear_guild(&self, guild_id: GuildId) {
        self.occupants.remove(&guild_id);
    }
}

/// Entry point for voice presence changes coming from the gateway or console.
/// Updates the roster first so subscribers see current listener counts.
#[derive(Clone)]
pub struct PresenceIntake {
    roster: Arc<VoiceRoster>,
    event_bus: Arc<EventBus>,
}

impl PresenceIntake {
    pub fn new(roster: Arc<VoiceRoster>, event_bus: Arc<EventBus>) -> Self {
        Self { roster, event_bus }
    }

    pub async fn submit(&self, guild_id: GuildId, member_id: MemberId, change: PresenceChange) {
        let event = VoicePresenceEvent { guild_id, member_id, change };
        self.roster.apply(&event);
        debug!(
            "Presence: member {} {:?} in guild {} ({} listeners)",
            member_id,
            change,
            guild_id,
            self.roster.listener_count(guild_id)
        );
        self.event_bus.publish(BotEvent::VoicePresence(event)).await;
    }
}
