// File: jukebot-core/tests/session_tests.rs

use std::sync::Arc;

use jukebot_common::models::{
    LoopMode, PlaybackState, Track, TrackOutcome, TransportFinished, TransportOutcome,
};
use jukebot_core::eventbus::SessionEvent;
use jukebot_core::playback::{Enqueued, PlaybackSession};
use jukebot_core::test_utils::fakes::{FailingRepository, TransportCall};
use jukebot_core::test_utils::helpers::*;
use jukebot_core::Error;

/// Ends the guild's current track on the fake transport and feeds the
/// completion straight into the session.
async fn finish_current(
    h: &TestHarness,
    session: &PlaybackSession,
    outcome: TransportOutcome,
) -> Result<TransportFinished, Error> {
    let handle = h
        .transport
        .current_handle(session.guild_id())
        .ok_or_else(|| Error::NotFound("no running track".into()))?;
    let finished = h
        .transport
        .finish(handle, outcome)
        .await
        .ok_or_else(|| Error::NotFound("track already finished".into()))?;
    session.on_transport_finished(finished.clone()).await?;
    Ok(finished)
}

fn pending_ids(status: &jukebot_core::playback::SessionStatus) -> Vec<String> {
    status.pending.iter().map(|t| t.id.to_string()).collect()
}

#[tokio::test]
async fn test_enqueue_starts_when_idle_then_queues() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));

    match session.enqueue(track("a")).await? {
        Enqueued::Started(t) => assert_eq!(t.id.as_str(), "a"),
        other => panic!("expected start, got {other:?}"),
    }
    assert_eq!(session.enqueue(track("b")).await?, Enqueued::Queued { position: 1 });
    assert_eq!(session.enqueue(track("c")).await?, Enqueued::Queued { position: 2 });

    let status = session.status().await?;
    assert_eq!(status.state, PlaybackState::Playing);
    assert_eq!(status.now_playing.as_ref().map(|t| t.id.to_string()), Some("a".to_string()));
    assert_eq!(pending_ids(&status), vec!["b", "c"]);
    assert_eq!(h.transport.started().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_enqueue_next_goes_to_front() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;
    assert_eq!(session.enqueue_next(track("urgent")).await?, Enqueued::Queued { position: 1 });

    let status = session.status().await?;
    assert_eq!(pending_ids(&status), vec!["urgent", "b"]);
    Ok(())
}

#[tokio::test]
async fn test_completion_advances_and_records_history() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;

    finish_current(&h, &session, TransportOutcome::Completed).await?;

    let status = session.status().await?;
    assert_eq!(status.now_playing.as_ref().map(|t| t.id.to_string()), Some("b".to_string()));
    assert!(status.pending.is_empty());

    let history = session.recent_history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].track.id.as_str(), "a");
    assert_eq!(history[0].outcome, TrackOutcome::Completed);
    assert_eq!(h.repository.history_len(guild(1)), 1);
    Ok(())
}

fn ids(tracks: &[Track]) -> Vec<String> {
    tracks.iter().map(|t| t.id.to_string()).collect()
}

#[tokio::test]
async fn test_radio_seeds_take_exactly_the_requested_history() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    for id in ["a", "b", "c", "d"] {
        session.enqueue(track(id)).await?;
    }
    for _ in 0..3 {
        finish_current(&h, &session, TransportOutcome::Completed).await?;
    }

    // "d" is playing; the history count excludes it.
    assert_eq!(ids(&session.radio_seeds(2).await), vec!["d", "c", "b"]);
    assert_eq!(ids(&session.radio_seeds(0).await), vec!["d"]);

    finish_current(&h, &session, TransportOutcome::Completed).await?;
    assert_eq!(session.state().await, PlaybackState::Idle);
    assert_eq!(ids(&session.radio_seeds(2).await), vec!["d", "c"]);
    assert!(session.radio_seeds(0).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_last_track_completing_goes_idle() -> Result<(), Error> {
    let h = TestHarness::new();
    let mut rx = h.event_bus.subscribe(None).await;
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;

    finish_current(&h, &session, TransportOutcome::Completed).await?;

    assert_eq!(session.state().await, PlaybackState::Idle);
    assert!(session.now_playing().await.is_none());
    let events = session_events(drain_events(&mut rx));
    assert!(events.iter().any(|e| matches!(e, SessionEvent::QueueExhausted { .. })));
    Ok(())
}

#[tokio::test]
async fn test_loop_track_replays_completed_track() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;
    session.set_loop_mode(LoopMode::Track).await?;

    finish_current(&h, &session, TransportOutcome::Completed).await?;
    finish_current(&h, &session, TransportOutcome::Completed).await?;

    let status = session.status().await?;
    assert_eq!(status.now_playing.as_ref().map(|t| t.id.to_string()), Some("a".to_string()));
    assert_eq!(pending_ids(&status), vec!["b"]);
    let started: Vec<String> = h.transport.started().iter().map(|t| t.to_string()).collect();
    assert_eq!(started, vec!["a", "a", "a"]);
    Ok(())
}

#[tokio::test]
async fn test_loop_track_does_not_repeat_skipped_track() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;
    session.set_loop_mode(LoopMode::Track).await?;

    let skipped = session.force_skip().await?;
    assert_eq!(skipped.id.as_str(), "a");
    let status = session.status().await?;
    assert_eq!(status.now_playing.as_ref().map(|t| t.id.to_string()), Some("b".to_string()));
    assert!(status.pending.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_loop_queue_rotates_finished_track_to_back() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;
    session.enqueue(track("c")).await?;
    session.set_loop_mode(LoopMode::Queue).await?;

    finish_current(&h, &session, TransportOutcome::Completed).await?;
    let status = session.status().await?;
    assert_eq!(status.now_playing.as_ref().map(|t| t.id.to_string()), Some("b".to_string()));
    assert_eq!(pending_ids(&status), vec!["c", "a"]);

    // Skips rotate too.
    session.force_skip().await?;
    let status = session.status().await?;
    assert_eq!(status.now_playing.as_ref().map(|t| t.id.to_string()), Some("c".to_string()));
    assert_eq!(pending_ids(&status), vec!["a", "b"]);
    Ok(())
}

#[tokio::test]
async fn test_cycle_loop_mode() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    assert_eq!(session.cycle_loop_mode().await?, LoopMode::Track);
    assert_eq!(session.cycle_loop_mode().await?, LoopMode::Queue);
    assert_eq!(session.cycle_loop_mode().await?, LoopMode::Off);
    Ok(())
}

#[tokio::test]
async fn test_stale_completion_is_ignored() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;
    session.enqueue(track("c")).await?;

    let old_handle = h
        .transport
        .current_handle(guild(1))
        .ok_or_else(|| Error::NotFound("no handle".into()))?;
    session.force_skip().await?;

    // A late "completed" for the skipped track must not advance again.
    session
        .on_transport_finished(TransportFinished {
            handle: old_handle,
            track_id: track("a").id,
            outcome: TransportOutcome::Completed,
        })
        .await?;

    let status = session.status().await?;
    assert_eq!(status.now_playing.as_ref().map(|t| t.id.to_string()), Some("b".to_string()));
    assert_eq!(pending_ids(&status), vec!["c"]);
    Ok(())
}

#[tokio::test]
async fn test_remove_out_of_range_leaves_queue_unchanged() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;

    let err = session.remove(5).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
    assert_eq!(pending_ids(&session.status().await?), vec!["b"]);

    assert_eq!(session.remove(0).await?.id.as_str(), "b");
    assert!(session.status().await?.pending.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_move_and_clear() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    for id in ["a", "b", "c", "d"] {
        session.enqueue(track(id)).await?;
    }
    session.move_track(2, 0).await?;
    assert_eq!(pending_ids(&session.status().await?), vec!["d", "b", "c"]);

    assert_eq!(session.clear().await?, 3);
    let status = session.status().await?;
    assert!(status.pending.is_empty());
    assert_eq!(status.state, PlaybackState::Playing);
    Ok(())
}

#[tokio::test]
async fn test_capacity_rejects_extra_tracks() -> Result<(), Error> {
    let h = TestHarness::with_config(config_with(|c| c.queue.max_queue_size = 2)?);
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;
    session.enqueue(track("c")).await?;

    let err = session.enqueue(track("d")).await.unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { capacity: 2 }), "got {err:?}");
    assert_eq!(pending_ids(&session.status().await?), vec!["b", "c"]);
    Ok(())
}

#[tokio::test]
async fn test_shuffle_keeps_the_same_tracks() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("now")).await?;
    for i in 0..20 {
        session.enqueue(track(&format!("t{i}"))).await?;
    }
    assert_eq!(session.shuffle().await?, 20);

    let status = session.status().await?;
    let mut ids = pending_ids(&status);
    ids.sort();
    let mut expected: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
    expected.sort();
    assert_eq!(ids, expected);
    assert_eq!(status.now_playing.as_ref().map(|t| t.id.to_string()), Some("now".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_pause_and_resume() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));

    let err = session.pause().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    session.enqueue(track("a")).await?;
    session.pause().await?;
    session.pause().await?;
    assert_eq!(session.state().await, PlaybackState::Paused);

    session.resume().await?;
    assert_eq!(session.state().await, PlaybackState::Playing);
    let err = session.resume().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    let calls = h.transport.calls();
    assert_eq!(calls.iter().filter(|c| matches!(c, TransportCall::Pause(_))).count(), 1);
    assert_eq!(calls.iter().filter(|c| matches!(c, TransportCall::Resume(_))).count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_set_volume_validates_and_applies() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;

    assert!(matches!(session.set_volume(2.5).await, Err(Error::Validation(_))));
    session.set_volume(1.25).await?;
    assert_eq!(session.status().await?.volume, 1.25);
    assert!(h
        .transport
        .calls()
        .iter()
        .any(|c| matches!(c, TransportCall::Volume(_, v) if *v == 1.25)));
    Ok(())
}

#[tokio::test]
async fn test_stop_keeps_pending_tracks() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;

    session.stop().await?;
    let status = session.status().await?;
    assert_eq!(status.state, PlaybackState::Idle);
    assert!(status.now_playing.is_none());
    assert_eq!(pending_ids(&status), vec!["b"]);
    assert_eq!(h.transport.stop_count(), 1);

    let started = session.play_pending().await?;
    assert_eq!(started.map(|t| t.id.to_string()), Some("b".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_failed_start_moves_on_to_next_track() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("x")).await?;
    session.enqueue(track("broken")).await?;
    session.enqueue(track("c")).await?;
    h.transport.fail_start_for("broken");

    finish_current(&h, &session, TransportOutcome::Completed).await?;

    let status = session.status().await?;
    assert_eq!(status.now_playing.as_ref().map(|t| t.id.to_string()), Some("c".to_string()));
    let history = session.recent_history(10).await;
    assert_eq!(history[0].track.id.as_str(), "broken");
    assert_eq!(history[0].outcome, TrackOutcome::Errored);
    Ok(())
}

#[tokio::test]
async fn test_enqueue_of_unplayable_track_fails_and_stays_idle() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    h.transport.fail_start_for("a");

    assert!(session.enqueue(track("a")).await.is_err());
    let status = session.status().await?;
    assert_eq!(status.state, PlaybackState::Idle);
    assert!(status.now_playing.is_none());
    Ok(())
}

#[tokio::test]
async fn test_gives_up_after_consecutive_failures() -> Result<(), Error> {
    let h = TestHarness::new();
    let mut rx = h.event_bus.subscribe(None).await;
    let session = h.session(guild(1));
    session.enqueue(track("x")).await?;
    for id in ["p1", "p2", "p3", "p4"] {
        session.enqueue(track(id)).await?;
    }
    h.transport.fail_all_starts(true);

    let handle = h
        .transport
        .current_handle(guild(1))
        .ok_or_else(|| Error::NotFound("no handle".into()))?;
    let finished = h
        .transport
        .finish(handle, TransportOutcome::Completed)
        .await
        .ok_or_else(|| Error::NotFound("already finished".into()))?;
    let err = session.on_transport_finished(finished).await.unwrap_err();
    assert!(matches!(err, Error::BatchFailure { attempts: 3 }), "got {err:?}");

    let status = session.status().await?;
    assert_eq!(status.state, PlaybackState::Idle);
    assert_eq!(pending_ids(&status), vec!["p4"]);

    let events = session_events(drain_events(&mut rx));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::PlaybackFailed { attempts: 3, .. })));
    Ok(())
}

#[tokio::test]
async fn test_unresolved_track_is_resolved_with_retry() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    h.resolver.rate_limit_once("u");

    match session.enqueue(unresolved_track("u")).await? {
        Enqueued::Started(t) => {
            assert_eq!(t.id.as_str(), "u");
            assert!(t.is_resolved());
        }
        other => panic!("expected start, got {other:?}"),
    }
    assert_eq!(h.resolver.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_started_and_low_queue_notifications() -> Result<(), Error> {
    let h = TestHarness::new();
    let mut rx = h.event_bus.subscribe(None).await;
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;

    let events = session_events(drain_events(&mut rx));
    assert!(matches!(
        events.first(),
        Some(SessionEvent::TrackStarted { track, .. }) if track.id.as_str() == "a"
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::QueueLow { pending: 0, .. })));
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() -> Result<(), Error> {
    let h = TestHarness::new();
    let mut rx = h.event_bus.subscribe(None).await;
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;

    session.close().await?;
    session.close().await?;

    assert!(session.is_closed());
    assert_eq!(session.state().await, PlaybackState::Closed);
    assert!(matches!(session.enqueue(track("c")).await, Err(Error::NotFound(_))));
    assert!(matches!(session.status().await, Err(Error::NotFound(_))));
    assert_eq!(h.transport.stop_count(), 1);

    let closed = session_events(drain_events(&mut rx))
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::SessionClosed { .. }))
        .count();
    assert_eq!(closed, 1);
    Ok(())
}

#[tokio::test]
async fn test_snapshot_follows_queue_changes() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));
    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;

    let snapshot = h
        .repository
        .snapshot(guild(1))
        .ok_or_else(|| Error::NotFound("no snapshot".into()))?;
    assert_eq!(snapshot.now_playing.map(|t| t.id.to_string()), Some("a".to_string()));
    assert_eq!(snapshot.pending.len(), 1);

    session.stop().await?;
    session.clear().await?;
    assert!(h.repository.snapshot(guild(1)).is_none());
    Ok(())
}

#[tokio::test]
async fn test_persistence_failure_does_not_stop_playback() -> Result<(), Error> {
    let h = TestHarness::new();
    let failing = Arc::new(FailingRepository::default());
    let session = Arc::new(PlaybackSession::new(guild(1), h.deps_with_repository(failing.clone())));

    session.enqueue(track("a")).await?;
    session.enqueue(track("b")).await?;
    finish_current(&h, &session, TransportOutcome::Completed).await?;

    let status = session.status().await?;
    assert_eq!(status.now_playing.as_ref().map(|t| t.id.to_string()), Some("b".to_string()));
    // The in-memory history still has the entry the repository refused.
    assert_eq!(session.recent_history(5).await.len(), 1);
    assert!(failing.attempts.load(std::sync::atomic::Ordering::SeqCst) > 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_enqueues_keep_one_track_playing() -> Result<(), Error> {
    let h = TestHarness::new();
    let session = h.session(guild(1));

    let mut tasks = Vec::new();
    for i in 0..10 {
        let s = session.clone();
        tasks.push(tokio::spawn(async move { s.enqueue(track(&format!("t{i}"))).await }));
    }
    let mut started = 0;
    for t in tasks {
        if let Ok(Ok(Enqueued::Started(_))) = t.await {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    let status = session.status().await?;
    assert!(status.now_playing.is_some());
    assert_eq!(status.pending.len(), 9);
    assert_eq!(h.transport.started().len(), 1);
    Ok(())
}
