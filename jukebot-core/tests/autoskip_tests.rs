// File: jukebot-core/tests/autoskip_tests.rs

use std::sync::Arc;
use std::time::Duration;

use jukebot_common::models::{
    PlaybackState, PresenceChange, TrackOutcome, VoicePresenceEvent,
};
use jukebot_core::config::AutoSkipConfig;
use jukebot_core::eventbus::SessionEvent;
use jukebot_core::playback::{LeaveAction, PlaybackSession, PromptResolution, SessionRegistry};
use jukebot_core::services::AutoSkipOnLeave;
use jukebot_core::test_utils::helpers::*;
use jukebot_core::voice::{PresenceIntake, VoiceRoster};
use jukebot_core::Error;

const REQUESTER: u64 = 100;

struct Fixture {
    h: TestHarness,
    registry: Arc<SessionRegistry>,
    roster: Arc<VoiceRoster>,
    autoskip: Arc<AutoSkipOnLeave>,
    session: Arc<PlaybackSession>,
}

/// Guild 1 playing "a" (requested by REQUESTER) with "b" queued, and the
/// requester plus `others` listeners in the channel.
async fn fixture(others: u64) -> Result<Fixture, Error> {
    let h = TestHarness::new();
    let registry = h.registry();
    let roster = Arc::new(VoiceRoster::new());
    for m in std::iter::once(REQUESTER).chain(1..=others) {
        roster.apply(&VoicePresenceEvent {
            guild_id: guild(1),
            member_id: member(m),
            change: PresenceChange::Joined,
        });
    }
    let autoskip = Arc::new(AutoSkipOnLeave::new(
        registry.clone(),
        roster.clone(),
        h.event_bus.clone(),
        AutoSkipConfig::default(),
    ));
    let session = registry.get_or_create(guild(1)).await?;
    session.enqueue(requested_track("a", member(REQUESTER))).await?;
    session.enqueue(track("b")).await?;
    Ok(Fixture { h, registry, roster, autoskip, session })
}

impl Fixture {
    /// Applies a leave to the roster and hands it to the auto-skip service.
    async fn leave(&self, m: u64) -> Result<Option<LeaveAction>, Error> {
        let event = VoicePresenceEvent {
            guild_id: guild(1),
            member_id: member(m),
            change: PresenceChange::Left,
        };
        self.roster.apply(&event);
        self.autoskip.handle_presence(event).await
    }

    async fn prompt(&self) -> Result<uuid::Uuid, Error> {
        match self.leave(REQUESTER).await? {
            Some(LeaveAction::Prompted { prompt_id, .. }) => Ok(prompt_id),
            other => Err(Error::Validation(format!("expected a prompt, got {other:?}"))),
        }
    }

    async fn now_playing_id(&self) -> Option<String> {
        self.session.now_playing().await.map(|t| t.id.to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn test_requester_leaving_pauses_and_prompts() -> Result<(), Error> {
    let f = fixture(2).await?;
    let mut rx = f.h.event_bus.subscribe(None).await;

    let prompt_id = f.prompt().await?;
    let status = f.session.status().await?;
    assert_eq!(status.state, PlaybackState::Paused);
    assert_eq!(status.prompt_id, Some(prompt_id));

    let events = session_events(drain_events(&mut rx));
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::AutoSkipPromptRequested { prompt_id: id, track, .. }
            if *id == prompt_id && track.id.as_str() == "a"
    )));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_keep_resumes_and_cancels_timer() -> Result<(), Error> {
    let f = fixture(2).await?;
    let prompt_id = f.prompt().await?;

    assert_eq!(f.autoskip.decide(guild(1), prompt_id, true).await?, PromptResolution::Kept);
    assert_eq!(f.session.state().await, PlaybackState::Playing);

    // Well past the timeout nothing else happens.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(f.now_playing_id().await, Some("a".to_string()));
    assert_eq!(f.session.state().await, PlaybackState::Playing);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_resume_keeps_prompt_open() -> Result<(), Error> {
    let f = fixture(2).await?;
    let prompt_id = f.prompt().await?;

    f.h.transport.fail_resumes(true);
    assert!(f.autoskip.decide(guild(1), prompt_id, true).await.is_err());
    let status = f.session.status().await?;
    assert_eq!(status.state, PlaybackState::Paused);
    assert_eq!(status.prompt_id, Some(prompt_id));

    // The session lock was released, so a retry goes through.
    f.h.transport.fail_resumes(false);
    assert_eq!(f.autoskip.decide(guild(1), prompt_id, true).await?, PromptResolution::Kept);
    let status = f.session.status().await?;
    assert_eq!(status.state, PlaybackState::Playing);
    assert_eq!(status.prompt_id, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_no_answer_skips() -> Result<(), Error> {
    let f = fixture(2).await?;
    let prompt_id = f.prompt().await?;

    match f.autoskip.decide(guild(1), prompt_id, false).await? {
        PromptResolution::Skipped(Some(t)) => assert_eq!(t.id.as_str(), "a"),
        other => panic!("expected skip, got {other:?}"),
    }
    assert_eq!(f.now_playing_id().await, Some("b".to_string()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timeout_skips_exactly_once() -> Result<(), Error> {
    let f = fixture(2).await?;
    let prompt_id = f.prompt().await?;

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(f.now_playing_id().await, Some("b".to_string()));

    // A decision arriving after the timeout finds nothing to settle.
    let late = f.autoskip.decide(guild(1), prompt_id, true).await;
    assert!(matches!(late, Err(Error::NotFound(_))), "got {late:?}");

    tokio::time::sleep(Duration::from_secs(60)).await;
    let skipped = f
        .session
        .recent_history(10)
        .await
        .into_iter()
        .filter(|e| e.outcome == TrackOutcome::Skipped)
        .count();
    assert_eq!(skipped, 1);
    assert_eq!(f.now_playing_id().await, Some("b".to_string()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_empty_channel_skips_without_prompt() -> Result<(), Error> {
    let f = fixture(0).await?;
    match f.leave(REQUESTER).await? {
        Some(LeaveAction::Skipped(t)) => assert_eq!(t.id.as_str(), "a"),
        other => panic!("expected immediate skip, got {other:?}"),
    }
    assert_eq!(f.now_playing_id().await, Some("b".to_string()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_other_members_and_joins_are_ignored() -> Result<(), Error> {
    let f = fixture(2).await?;
    assert!(matches!(f.leave(1).await?, Some(LeaveAction::Ignored)));

    let join = VoicePresenceEvent {
        guild_id: guild(1),
        member_id: member(5),
        change: PresenceChange::Joined,
    };
    assert!(f.autoskip.handle_presence(join).await?.is_none());
    assert_eq!(f.session.state().await, PlaybackState::Playing);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_second_leave_does_not_open_another_prompt() -> Result<(), Error> {
    let f = fixture(2).await?;
    let first = f.prompt().await?;
    assert!(matches!(f.leave(REQUESTER).await?, Some(LeaveAction::AlreadyPrompted)));
    assert_eq!(f.session.status().await?.prompt_id, Some(first));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_manual_resume_settles_prompt() -> Result<(), Error> {
    let f = fixture(2).await?;
    let prompt_id = f.prompt().await?;

    f.session.resume().await?;
    assert_eq!(f.session.status().await?.prompt_id, None);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(f.now_playing_id().await, Some("a".to_string()));
    assert!(matches!(
        f.autoskip.decide(guild(1), prompt_id, false).await,
        Err(Error::NotFound(_))
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_open_prompt() -> Result<(), Error> {
    let f = fixture(2).await?;
    let prompt_id = f.prompt().await?;

    f.registry.remove(guild(1)).await?;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(matches!(
        f.autoskip.decide(guild(1), prompt_id, true).await,
        Err(Error::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_listener_reacts_to_bus_presence_events() -> Result<(), Error> {
    let f = fixture(2).await?;
    f.autoskip.start().await;
    let intake = PresenceIntake::new(f.roster.clone(), f.h.event_bus.clone());

    intake.submit(guild(1), member(REQUESTER), PresenceChange::Left).await;

    let mut paused = false;
    for _ in 0..100 {
        if f.session.state().await == PlaybackState::Paused {
            paused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    f.autoskip.stop().await;
    assert!(paused, "leave on the bus should pause playback");
    assert_eq!(f.roster.listener_count(guild(1)), 2);
    Ok(())
}
