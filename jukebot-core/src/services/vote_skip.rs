// src/services/vote_skip.rs

use std::sync::Arc;

use jukebot_common::models::{MemberId, SkipOutcome, VoteResult};

use crate::config::VotingConfig;
use crate::playback::PlaybackSession;
use crate::voice::VoiceRoster;
use crate::Error;

/// Pure threshold rule.
///
/// Required votes are `ceil(listeners * percentage)`, never below `min_voters`.
/// At or below `auto_skip_listener_count` listeners one vote is enough.
pub fn evaluate_threshold(listeners: usize, votes: usize, config: &VotingConfig) -> VoteResult {
    let required = if listeners <= config.auto_skip_listener_count {
        1
    } else {
        // Epsilon keeps exact products such as 4 * 0.5 from rounding up.
        let raw = (listeners as f64 * config.skip_threshold_percentage - 1e-9).ceil();
        (raw.max(0.0) as usize).max(config.min_voters)
    };
    VoteResult {
        current_count: votes,
        required_count: required,
        threshold_met: votes >= required,
    }
}

pub struct VoteSkipCoordinator {
    roster: Arc<VoiceRoster>,
    config: VotingConfig,
}

impl VoteSkipCoordinator {
    pub fn new(roster: Arc<VoiceRoster>, config: VotingConfig) -> Self {
        Self { roster, config }
    }

    pub fn config(&self) -> &VotingConfig {
        &self.config
    }

    fn ensure_listening(&self, session: &PlaybackSession, member: MemberId) -> Result<(), Error> {
        if self.roster.is_present(session.guild_id(), member) {
            Ok(())
        } else {
            Err(Error::invalid_state("vote to skip", "not in the voice channel"))
        }
    }

    /// Counts one vote against the current listener count. When the
    /// threshold is met the session skips and the tally resets. Only
    /// members in the voice channel may vote.
    pub async fn record_vote(&self, session: &PlaybackSession, voter: MemberId) -> Result<VoteResult, Error> {
        self.ensure_listening(session, voter)?;
        let listeners = self.roster.listener_count(session.guild_id());
        match session.vote_skip(voter, false, listeners, &self.config).await? {
            SkipOutcome::Voted(vote) => Ok(vote),
            SkipOutcome::Skipped { vote: Some(vote), .. } => Ok(vote),
            // The requester skipping their own track counts as a met vote.
            SkipOutcome::Skipped { vote: None, .. } => Ok(VoteResult {
                current_count: 1,
                required_count: 1,
                threshold_met: true,
            }),
        }
    }

    /// Skip request from a member. Privileged members (owner, DJ role) and
    /// the requester of the current track skip directly; everyone else votes.
    /// Unprivileged members outside the voice channel are turned away.
    pub async fn request_skip(
        &self,
        session: &PlaybackSession,
        member: MemberId,
        privileged: bool,
    ) -> Result<SkipOutcome, Error> {
        if !privileged {
            self.ensure_listening(session, member)?;
        }
        let listeners = self.roster.listener_count(session.guild_id());
        session.vote_skip(member, privileged, listeners, &self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> VotingConfig {
        VotingConfig::new(0.5, 1, 2).unwrap()
    }

    #[test]
    fn test_four_listeners_need_two_votes() {
        let one = evaluate_threshold(4, 1, &cfg());
        assert_eq!(one.required_count, 2);
        assert!(!one.threshold_met);
        assert!(evaluate_threshold(4, 2, &cfg()).threshold_met);
    }

    #[test]
    fn test_small_channel_fast_path() {
        for listeners in 0..=2 {
            let r = evaluate_threshold(listeners, 1, &cfg());
            assert_eq!(r.required_count, 1);
            assert!(r.threshold_met);
        }
    }

    #[test]
    fn test_rounds_up() {
        assert_eq!(evaluate_threshold(5, 0, &cfg()).required_count, 3);
        assert_eq!(evaluate_threshold(3, 0, &cfg()).required_count, 2);
    }

    #[test]
    fn test_min_voters_floor() {
        let c = VotingConfig::new(0.1, 3, 2).unwrap();
        assert_eq!(evaluate_threshold(10, 0, &c).required_count, 3);
    }

    #[test]
    fn test_zero_percentage_still_needs_min_voters() {
        let c = VotingConfig::new(0.0, 1, 0).unwrap();
        let r = evaluate_threshold(8, 0, &c);
        assert_eq!(r.required_count, 1);
        assert!(!r.threshold_met);
    }
}
