// src/playback/session.rs
//
// Per-guild playback state machine. Every operation runs under the session's
// own async mutex; notifications are collected while the lock is held and
// published once it is released.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use jukebot_common::models::{
    GuildId, HistoryEntry, LoopMode, MemberId, PlaybackState, SessionSnapshot, SkipOutcome, Track,
    TrackOutcome, TransportFinished, TransportHandle, TransportOutcome,
};
use jukebot_common::traits::{Resolver, SessionRepository, Transport};

use crate::config::{EngineConfig, VotingConfig};
use crate::eventbus::{EventBus, SessionEvent};
use crate::playback::queue::{FinishReason, Queue};
use crate::services::vote_skip::evaluate_threshold;
use crate::utils::retry_with_backoff;
use crate::Error;

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub resolver: Arc<dyn Resolver>,
    pub transport: Arc<dyn Transport>,
    pub repository: Arc<dyn SessionRepository>,
    pub event_bus: Arc<EventBus>,
    pub config: Arc<EngineConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    /// The session was idle and this track started right away.
    Started(Track),
    /// 1-based position among pending tracks.
    Queued { position: usize },
}

/// What happened when a member left the voice channel.
#[derive(Debug, Clone)]
pub enum LeaveAction {
    /// The member is not the requester of the current track, or nothing plays.
    Ignored,
    /// A prompt is already outstanding; the first one wins.
    AlreadyPrompted,
    /// Nobody is left to ask, so the track was skipped.
    Skipped(Track),
    /// Playback paused and a prompt was opened. `cancel` fires when the
    /// prompt is resolved by any path.
    Prompted {
        prompt_id: Uuid,
        cancel: CancellationToken,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDecision {
    Keep,
    Skip,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptResolution {
    Kept,
    Skipped(Option<Track>),
}

/// Read-only view of a session.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub guild_id: GuildId,
    pub state: PlaybackState,
    pub now_playing: Option<Track>,
    pub pending: Vec<Track>,
    pub loop_mode: LoopMode,
    pub volume: f32,
    pub votes: usize,
    pub prompt_id: Option<Uuid>,
    pub idle_for: Duration,
}

struct PendingPrompt {
    id: Uuid,
    /// Only resume on "keep" if the prompt was what paused playback.
    paused_by_prompt: bool,
    cancel: CancellationToken,
}

pub(crate) struct SessionState {
    playback: PlaybackState,
    queue: Queue,
    loop_mode: LoopMode,
    volume: f32,
    handle: Option<TransportHandle>,
    last_activity: Instant,
    votes: HashSet<MemberId>,
    prompt: Option<PendingPrompt>,
    history: VecDeque<HistoryEntry>,
    history_limit: usize,
    dirty: bool,
    outbox: Vec<SessionEvent>,
}

pub(crate) type StateGuard = OwnedMutexGuard<SessionState>;

impl SessionState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            playback: PlaybackState::Idle,
            queue: Queue::new(config.queue().max_queue_size),
            loop_mode: LoopMode::Off,
            volume: config.queue().default_volume,
            handle: None,
            last_activity: Instant::now(),
            votes: HashSet::new(),
            prompt: None,
            history: VecDeque::new(),
            history_limit: config.queue().history_limit,
            dirty: false,
            outbox: Vec::new(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.dirty = true;
    }

    fn emit(&mut self, event: SessionEvent) {
        self.outbox.push(event);
    }

    /// Votes and prompts belong to one track; drop them whenever it changes.
    fn clear_track_state(&mut self) {
        self.votes.clear();
        if let Some(prompt) = self.prompt.take() {
            prompt.cancel.cancel();
        }
    }

    fn recently_played(&self, track: &Track) -> bool {
        self.history.iter().any(|h| h.track.id == track.id)
    }

    fn snapshot(&self, guild_id: GuildId) -> SessionSnapshot {
        SessionSnapshot {
            guild_id,
            loop_mode: self.loop_mode,
            volume: self.volume,
            now_playing: self.queue.now_playing().cloned(),
            pending: self.queue.pending_snapshot(),
            saved_at: Utc::now(),
        }
    }
}

pub struct PlaybackSession {
    guild_id: GuildId,
    deps: SessionDeps,
    state: Arc<Mutex<SessionState>>,
    /// Fired on close; aborts an in-flight start and any prompt timer.
    cancel: CancellationToken,
}

impl PlaybackSession {
    pub fn new(guild_id: GuildId, deps: SessionDeps) -> Self {
        let state = SessionState::new(&deps.config);
        Self {
            guild_id,
            deps,
            state: Arc::new(Mutex::new(state)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// True once `close` has begun.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn closed_error(&self) -> Error {
        Error::NotFound(format!("no active session for guild {}", self.guild_id))
    }

    async fn lock(&self) -> Result<StateGuard, Error> {
        let guard = self.state.clone().lock_owned().await;
        if guard.playback == PlaybackState::Closed {
            return Err(self.closed_error());
        }
        Ok(guard)
    }

    /// Lock a session nobody else has seen yet.
    pub(crate) fn try_lock_fresh(&self) -> Result<StateGuard, Error> {
        self.state
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::invalid_state("initialize", "locked"))
    }

    /// Persists a snapshot if anything changed, unlocks, then publishes the
    /// notifications gathered while locked.
    async fn release(&self, mut state: StateGuard) {
        if state.dirty && state.playback != PlaybackState::Closed {
            state.dirty = false;
            let snapshot = state.snapshot(self.guild_id);
            let res = if snapshot.is_empty() {
                self.deps.repository.delete_snapshot(self.guild_id).await
            } else {
                self.deps.repository.save_snapshot(&snapshot).await
            };
            if let Err(e) = res {
                warn!("Session {}: could not persist snapshot: {}", self.guild_id, e);
            }
        }
        let events = std::mem::take(&mut state.outbox);
        drop(state);
        for event in events {
            self.deps.event_bus.publish_session(event).await;
        }
    }

    async fn record_history(&self, state: &mut SessionState, track: Track, outcome: TrackOutcome) {
        let entry = HistoryEntry::new(self.guild_id, track, outcome);
        if let Err(e) = self.deps.repository.append_history(&entry).await {
            warn!("Session {}: could not store history entry: {}", self.guild_id, e);
        }
        state.history.push_front(entry);
        state.history.truncate(state.history_limit);
    }

    async fn stop_quietly(&self, handle: &TransportHandle) {
        if let Err(e) = self.deps.transport.stop(handle).await {
            warn!("Session {}: transport stop for {} failed: {}", self.guild_id, handle, e);
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Pops tracks until one starts. Tracks that fail to resolve or start are
    /// recorded as errored; after too many failures in a row the session
    /// gives up and goes idle.
    async fn advance_locked(&self, state: &mut SessionState) -> Result<Option<Track>, Error> {
        let max_failures = self.deps.config.queue().max_consecutive_failures;
        let mut failures = 0;
        let mut last_error = None;

        loop {
            if self.is_closed() {
                return Err(self.closed_error());
            }
            let Some(next) = state.queue.pop_next() else {
                state.playback = PlaybackState::Idle;
                state.handle = None;
                state.touch();
                state.emit(SessionEvent::QueueExhausted { guild_id: self.guild_id });
                return match last_error {
                    Some(e) => Err(e),
                    None => Ok(None),
                };
            };

            state.playback = PlaybackState::Transitioning;
            match self.start_track(state, next.clone()).await {
                Ok(started) => {
                    info!("Session {}: now playing '{}'", self.guild_id, started.display_title());
                    state.queue.set_now_playing(started.clone());
                    state.playback = PlaybackState::Playing;
                    state.touch();
                    state.emit(SessionEvent::TrackStarted {
                        guild_id: self.guild_id,
                        track: started.clone(),
                    });
                    let pending = state.queue.pending_len();
                    if pending <= self.deps.config.radio().low_water_mark {
                        state.emit(SessionEvent::QueueLow { guild_id: self.guild_id, pending });
                    }
                    return Ok(Some(started));
                }
                Err(e) => {
                    if self.is_closed() {
                        return Err(self.closed_error());
                    }
                    warn!("Session {}: could not start '{}': {}", self.guild_id, next.title, e);
                    state.emit(SessionEvent::TrackFinished {
                        guild_id: self.guild_id,
                        track: next.clone(),
                        outcome: TrackOutcome::Errored,
                    });
                    self.record_history(state, next, TrackOutcome::Errored).await;
                    failures += 1;
                    if failures >= max_failures {
                        state.playback = PlaybackState::Idle;
                        state.handle = None;
                        state.touch();
                        state.emit(SessionEvent::PlaybackFailed {
                            guild_id: self.guild_id,
                            attempts: failures,
                        });
                        return Err(Error::BatchFailure { attempts: failures });
                    }
                    last_error = Some(e);
                }
            }
        }
    }

    async fn start_track(&self, state: &mut SessionState, track: Track) -> Result<Track, Error> {
        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = self.start_track_inner(state, track) => Some(res),
        };
        match outcome {
            Some(res) => res,
            None => {
                // Roll back a start that may have been half done.
                if let Some(handle) = state.handle.take() {
                    self.stop_quietly(&handle).await;
                }
                Err(self.closed_error())
            }
        }
    }

    async fn start_track_inner(&self, state: &mut SessionState, track: Track) -> Result<Track, Error> {
        let track = if track.is_resolved() {
            track
        } else {
            let resolver: &dyn Resolver = self.deps.resolver.as_ref();
            let unresolved = &track;
            let stream = retry_with_backoff(self.deps.config.retry(), "resolve", move || {
                resolver.resolve_stream(unresolved)
            })
            .await?;
            track.with_stream(stream)
        };

        let handle = TransportHandle::new(self.guild_id);
        state.handle = Some(handle);
        if let Err(e) = self.deps.transport.start(&handle, &track).await {
            state.handle = None;
            self.stop_quietly(&handle).await;
            return Err(e);
        }
        if let Err(e) = self.deps.transport.set_volume(&handle, state.volume).await {
            warn!("Session {}: could not apply volume: {}", self.guild_id, e);
        }
        Ok(track)
    }

    async fn skip_locked(&self, state: &mut SessionState) -> Result<Track, Error> {
        if !matches!(state.playback, PlaybackState::Playing | PlaybackState::Paused) {
            return Err(Error::invalid_state("skip", state.playback));
        }
        state.playback = PlaybackState::Transitioning;
        if let Some(handle) = state.handle.take() {
            self.stop_quietly(&handle).await;
        }
        state.clear_track_state();
        let loop_mode = state.loop_mode;
        let skipped = state
            .queue
            .finish_current(loop_mode, FinishReason::Skipped)
            .ok_or_else(|| Error::invalid_state("skip", "nothing playing"))?;
        info!("Session {}: skipped '{}'", self.guild_id, skipped.display_title());
        state.emit(SessionEvent::TrackFinished {
            guild_id: self.guild_id,
            track: skipped.clone(),
            outcome: TrackOutcome::Skipped,
        });
        self.record_history(state, skipped.clone(), TrackOutcome::Skipped).await;
        state.touch();

        // The skip itself succeeded even if nothing after it could start.
        if let Err(e) = self.advance_locked(state).await {
            warn!("Session {}: advance after skip failed: {}", self.guild_id, e);
        }
        Ok(skipped)
    }

    async fn close_locked(&self, state: &mut SessionState) {
        state.clear_track_state();
        if let Some(handle) = state.handle.take() {
            self.stop_quietly(&handle).await;
        }
        if let Some(track) = state.queue.take_now_playing() {
            self.record_history(state, track, TrackOutcome::Superseded).await;
        }
        state.queue.clear_pending();
        state.playback = PlaybackState::Closed;
        state.emit(SessionEvent::SessionClosed { guild_id: self.guild_id });
        info!("Session {}: closed", self.guild_id);
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    pub async fn enqueue(&self, track: Track) -> Result<Enqueued, Error> {
        let mut state = self.lock().await?;
        let position = state.queue.push_back(track)?;
        state.touch();
        let result = if state.playback == PlaybackState::Idle {
            let was_pending = position - 1;
            match self.advance_locked(&mut state).await {
                // Restored tracks ahead of this one play first.
                Ok(Some(started)) if was_pending == 0 => Ok(Enqueued::Started(started)),
                Ok(_) => Ok(Enqueued::Queued { position: was_pending }),
                Err(e) => Err(e),
            }
        } else {
            Ok(Enqueued::Queued { position })
        };
        self.release(state).await;
        result
    }

    /// Puts a track at the front of the pending queue ("play next").
    pub async fn enqueue_next(&self, track: Track) -> Result<Enqueued, Error> {
        let mut state = self.lock().await?;
        state.queue.push_front(track)?;
        state.touch();
        let result = if state.playback == PlaybackState::Idle {
            match self.advance_locked(&mut state).await {
                Ok(Some(started)) => Ok(Enqueued::Started(started)),
                Ok(None) => Ok(Enqueued::Queued { position: 1 }),
                Err(e) => Err(e),
            }
        } else {
            Ok(Enqueued::Queued { position: 1 })
        };
        self.release(state).await;
        result
    }

    /// Appends tracks that are not already queued, playing or in recent
    /// history, stopping quietly when the queue is full. Returns how many
    /// were added.
    pub async fn enqueue_unique(&self, tracks: Vec<Track>) -> Result<usize, Error> {
        let mut state = self.lock().await?;
        let mut added = 0;
        for track in tracks {
            if state.queue.contains(&track.id) || state.recently_played(&track) {
                debug!("Session {}: skipping duplicate '{}'", self.guild_id, track.title);
                continue;
            }
            if state.queue.push_back(track).is_err() {
                break;
            }
            added += 1;
        }
        if added > 0 {
            state.touch();
            if state.playback == PlaybackState::Idle {
                if let Err(e) = self.advance_locked(&mut state).await {
                    warn!("Session {}: could not start added tracks: {}", self.guild_id, e);
                }
            }
        }
        self.release(state).await;
        Ok(added)
    }

    /// Starts playback of pending tracks, e.g. after a restore.
    pub async fn play_pending(&self) -> Result<Option<Track>, Error> {
        let mut state = self.lock().await?;
        if state.playback != PlaybackState::Idle {
            return Err(Error::invalid_state("play", state.playback));
        }
        if state.queue.pending_len() == 0 {
            return Ok(None);
        }
        let result = self.advance_locked(&mut state).await;
        self.release(state).await;
        result
    }

    pub async fn pause(&self) -> Result<(), Error> {
        let mut state = self.lock().await?;
        match state.playback {
            PlaybackState::Paused => return Ok(()),
            PlaybackState::Playing => {}
            other => return Err(Error::invalid_state("pause", other)),
        }
        if let Some(handle) = state.handle {
            self.deps.transport.pause(&handle).await?;
        }
        state.playback = PlaybackState::Paused;
        state.touch();
        self.release(state).await;
        Ok(())
    }

    /// Resuming by hand also settles any open auto-skip prompt.
    pub async fn resume(&self) -> Result<(), Error> {
        let mut state = self.lock().await?;
        if state.playback != PlaybackState::Paused {
            return Err(Error::invalid_state("resume", state.playback));
        }
        if let Some(handle) = state.handle {
            self.deps.transport.resume(&handle).await?;
        }
        if let Some(prompt) = state.prompt.take() {
            prompt.cancel.cancel();
        }
        state.playback = PlaybackState::Playing;
        state.touch();
        self.release(state).await;
        Ok(())
    }

    /// Skips regardless of votes.
    pub async fn force_skip(&self) -> Result<Track, Error> {
        let mut state = self.lock().await?;
        let result = self.skip_locked(&mut state).await;
        self.release(state).await;
        result
    }

    /// Records a skip vote and skips in the same critical section if the
    /// threshold is met. The requester of the current track and privileged
    /// members skip without a vote.
    pub async fn vote_skip(
        &self,
        voter: MemberId,
        privileged: bool,
        listeners: usize,
        config: &VotingConfig,
    ) -> Result<SkipOutcome, Error> {
        let mut state = self.lock().await?;
        if !matches!(state.playback, PlaybackState::Playing | PlaybackState::Paused) {
            return Err(Error::invalid_state("vote to skip", state.playback));
        }
        let is_requester = state.queue.now_playing().is_some_and(|t| t.requested_by(voter));

        let result = if privileged || is_requester {
            self.skip_locked(&mut state)
                .await
                .map(|track| SkipOutcome::Skipped { track, vote: None })
        } else {
            state.votes.insert(voter);
            let vote = evaluate_threshold(listeners, state.votes.len(), config);
            debug!(
                "Session {}: skip vote {}/{} from {}",
                self.guild_id, vote.current_count, vote.required_count, voter
            );
            if vote.threshold_met {
                self.skip_locked(&mut state)
                    .await
                    .map(|track| SkipOutcome::Skipped { track, vote: Some(vote) })
            } else {
                Ok(SkipOutcome::Voted(vote))
            }
        };
        self.release(state).await;
        result
    }

    /// Stops the current track and goes idle. Pending tracks stay queued.
    pub async fn stop(&self) -> Result<(), Error> {
        let mut state = self.lock().await?;
        if !matches!(state.playback, PlaybackState::Playing | PlaybackState::Paused) {
            return Err(Error::invalid_state("stop", state.playback));
        }
        if let Some(handle) = state.handle.take() {
            self.stop_quietly(&handle).await;
        }
        state.clear_track_state();
        if let Some(track) = state.queue.take_now_playing() {
            state.emit(SessionEvent::TrackFinished {
                guild_id: self.guild_id,
                track: track.clone(),
                outcome: TrackOutcome::Superseded,
            });
            self.record_history(&mut state, track, TrackOutcome::Superseded).await;
        }
        state.playback = PlaybackState::Idle;
        state.touch();
        self.release(state).await;
        Ok(())
    }

    /// Reorders pending tracks at random. Returns how many were shuffled.
    pub async fn shuffle(&self) -> Result<usize, Error> {
        let mut state = self.lock().await?;
        {
            let mut rng = rand::rng();
            state.queue.shuffle_pending(&mut rng);
        }
        let n = state.queue.pending_len();
        state.touch();
        self.release(state).await;
        Ok(n)
    }

    /// Removes the pending track at `position` (0 = next up).
    pub async fn remove(&self, position: usize) -> Result<Track, Error> {
        let mut state = self.lock().await?;
        let removed = state.queue.remove(position)?;
        state.touch();
        self.release(state).await;
        Ok(removed)
    }

    pub async fn move_track(&self, from: usize, to: usize) -> Result<(), Error> {
        let mut state = self.lock().await?;
        state.queue.move_track(from, to)?;
        state.touch();
        self.release(state).await;
        Ok(())
    }

    pub async fn clear(&self) -> Result<usize, Error> {
        let mut state = self.lock().await?;
        let n = state.queue.clear_pending();
        state.touch();
        self.release(state).await;
        Ok(n)
    }

    pub async fn set_loop_mode(&self, mode: LoopMode) -> Result<(), Error> {
        let mut state = self.lock().await?;
        state.loop_mode = mode;
        state.touch();
        self.release(state).await;
        Ok(())
    }

    pub async fn cycle_loop_mode(&self) -> Result<LoopMode, Error> {
        let mut state = self.lock().await?;
        state.loop_mode = state.loop_mode.next();
        let mode = state.loop_mode;
        state.touch();
        self.release(state).await;
        Ok(mode)
    }

    pub async fn set_volume(&self, volume: f32) -> Result<(), Error> {
        if !(0.0..=2.0).contains(&volume) {
            return Err(Error::Validation(format!("volume must be between 0 and 2, got {volume}")));
        }
        let mut state = self.lock().await?;
        if let Some(handle) = state.handle {
            self.deps.transport.set_volume(&handle, volume).await?;
        }
        state.volume = volume;
        state.touch();
        self.release(state).await;
        Ok(())
    }

    /// Completion callback from the transport. Completions for a handle that
    /// is no longer current are stale and ignored.
    pub async fn on_transport_finished(&self, finished: TransportFinished) -> Result<(), Error> {
        let mut state = self.state.clone().lock_owned().await;
        if state.playback == PlaybackState::Closed {
            debug!("Session {}: ignoring completion after close", self.guild_id);
            return Ok(());
        }
        if state.handle.map(|h| h.id) != Some(finished.handle.id) {
            debug!(
                "Session {}: ignoring stale completion for {} ({:?})",
                self.guild_id, finished.track_id, finished.outcome
            );
            return Ok(());
        }

        state.handle = None;
        state.playback = PlaybackState::Transitioning;
        state.clear_track_state();
        let reason = match finished.outcome {
            TransportOutcome::Completed => FinishReason::Completed,
            TransportOutcome::Superseded => FinishReason::Skipped,
            TransportOutcome::Errored => FinishReason::Failed,
        };
        let loop_mode = state.loop_mode;
        let outcome = TrackOutcome::from(finished.outcome);
        if let Some(track) = state.queue.finish_current(loop_mode, reason) {
            self.record_history(&mut state, track.clone(), outcome).await;
            state.emit(SessionEvent::TrackFinished {
                guild_id: self.guild_id,
                track,
                outcome,
            });
        }
        state.touch();

        let result = self.advance_locked(&mut state).await.map(|_| ());
        self.release(state).await;
        result
    }

    /// Called when `member` left the voice channel and `remaining` listeners
    /// are still there. Opens an auto-skip prompt if the member requested the
    /// current track.
    pub async fn requester_left(
        &self,
        member: MemberId,
        remaining: usize,
        timeout: Duration,
    ) -> Result<LeaveAction, Error> {
        let mut state = self.lock().await?;
        let Some(current) = state.queue.now_playing().cloned() else {
            return Ok(LeaveAction::Ignored);
        };
        if !current.requested_by(member)
            || !matches!(state.playback, PlaybackState::Playing | PlaybackState::Paused)
        {
            return Ok(LeaveAction::Ignored);
        }
        if state.prompt.is_some() {
            return Ok(LeaveAction::AlreadyPrompted);
        }

        if remaining == 0 {
            info!("Session {}: requester left an empty channel, skipping", self.guild_id);
            let result = self.skip_locked(&mut state).await.map(LeaveAction::Skipped);
            self.release(state).await;
            return result;
        }

        let action = {
            let paused_by_prompt = state.playback == PlaybackState::Playing;
            if paused_by_prompt {
                if let Some(handle) = state.handle {
                    self.deps.transport.pause(&handle).await?;
                }
                state.playback = PlaybackState::Paused;
            }
            let prompt_id = Uuid::new_v4();
            let cancel = self.cancel.child_token();
            state.prompt = Some(PendingPrompt {
                id: prompt_id,
                paused_by_prompt,
                cancel: cancel.clone(),
            });
            state.touch();
            let expires_at = Utc::now()
                + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(30));
            state.emit(SessionEvent::AutoSkipPromptRequested {
                guild_id: self.guild_id,
                prompt_id,
                track: current,
                expires_at,
            });
            info!("Session {}: requester left, prompt {} opened", self.guild_id, prompt_id);
            LeaveAction::Prompted { prompt_id, cancel }
        };
        self.release(state).await;
        Ok(action)
    }

    /// Settles an open prompt. Only the first decision for a prompt wins;
    /// later ones find nothing and fail with `NotFound`. A keep whose
    /// resume fails leaves the prompt open.
    pub async fn resolve_prompt(
        &self,
        prompt_id: Uuid,
        decision: PromptDecision,
    ) -> Result<PromptResolution, Error> {
        let mut state = self.lock().await?;
        let paused_by_prompt = match &state.prompt {
            Some(p) if p.id == prompt_id => p.paused_by_prompt,
            _ => return Err(Error::NotFound(format!("no open prompt {prompt_id}"))),
        };

        if matches!(decision, PromptDecision::Keep)
            && paused_by_prompt
            && state.playback == PlaybackState::Paused
        {
            if let Some(handle) = state.handle {
                if let Err(e) = self.deps.transport.resume(&handle).await {
                    warn!("Session {}: resume for prompt {} failed: {}", self.guild_id, prompt_id, e);
                    self.release(state).await;
                    return Err(e);
                }
            }
            state.playback = PlaybackState::Playing;
        }

        if let Some(prompt) = state.prompt.take() {
            prompt.cancel.cancel();
        }
        info!("Session {}: prompt {} resolved as {:?}", self.guild_id, prompt_id, decision);

        let result = match decision {
            PromptDecision::Keep => {
                state.touch();
                Ok(PromptResolution::Kept)
            }
            PromptDecision::Skip | PromptDecision::TimedOut => self
                .skip_locked(&mut state)
                .await
                .map(|t| PromptResolution::Skipped(Some(t))),
        };
        self.release(state).await;
        result
    }

    /// Idempotent. Cancels any in-flight start before waiting for the lock.
    pub async fn close(&self) -> Result<(), Error> {
        self.cancel.cancel();
        let mut state = self.state.clone().lock_owned().await;
        if state.playback == PlaybackState::Closed {
            return Ok(());
        }
        self.close_locked(&mut state).await;
        self.release(state).await;
        Ok(())
    }

    /// Closes the session if it has been idle for at least `stale_after`.
    /// The check and the close happen under one lock, so a session that
    /// starts playing in the meantime is left alone.
    pub async fn close_if_stale(&self, stale_after: Duration) -> Result<bool, Error> {
        let mut state = self.lock().await?;
        if state.playback != PlaybackState::Idle || state.last_activity.elapsed() < stale_after {
            return Ok(false);
        }
        self.cancel.cancel();
        self.close_locked(&mut state).await;
        self.release(state).await;
        Ok(true)
    }

    /// Loads persisted history and the queue snapshot into a freshly created
    /// session. Restored tracks wait in the queue; the session stays idle.
    pub(crate) async fn restore(&self, mut state: StateGuard) -> usize {
        match self.deps.repository.recent_history(self.guild_id, state.history_limit).await {
            Ok(entries) => {
                state.history = entries.into_iter().take(state.history_limit).collect();
                debug!("Session {}: loaded {} history entries", self.guild_id, state.history.len());
            }
            Err(e) => warn!("Session {}: could not load history: {}", self.guild_id, e),
        }
        let snapshot = match self.deps.repository.load_session(self.guild_id).await {
            Ok(Some(s)) if !s.is_empty() => s,
            Ok(_) => return 0,
            Err(e) => {
                warn!("Session {}: could not load snapshot: {}", self.guild_id, e);
                return 0;
            }
        };
        state.loop_mode = snapshot.loop_mode;
        state.volume = snapshot.volume.clamp(0.0, 2.0);
        let mut restored = 0;
        for track in snapshot.into_tracks() {
            if state.queue.push_back(track).is_err() {
                warn!("Session {}: snapshot larger than queue capacity, truncating", self.guild_id);
                break;
            }
            restored += 1;
        }
        info!("Session {}: restored {} queued track(s)", self.guild_id, restored);
        state.emit(SessionEvent::SessionRestored {
            guild_id: self.guild_id,
            tracks: restored,
        });
        self.release(state).await;
        restored
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub async fn status(&self) -> Result<SessionStatus, Error> {
        let state = self.lock().await?;
        Ok(SessionStatus {
            guild_id: self.guild_id,
            state: state.playback,
            now_playing: state.queue.now_playing().cloned(),
            pending: state.queue.pending_snapshot(),
            loop_mode: state.loop_mode,
            volume: state.volume,
            votes: state.votes.len(),
            prompt_id: state.prompt.as_ref().map(|p| p.id),
            idle_for: state.last_activity.elapsed(),
        })
    }

    pub async fn state(&self) -> PlaybackState {
        self.state.lock().await.playback
    }

    pub async fn now_playing(&self) -> Option<Track> {
        self.state.lock().await.queue.now_playing().cloned()
    }

    /// Newest first.
    pub async fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        let state = self.state.lock().await;
        state.history.iter().take(limit).cloned().collect()
    }

    /// The current track followed by up to `history` recently finished
    /// ones, without repeats.
    pub async fn radio_seeds(&self, history: usize) -> Vec<Track> {
        let state = self.state.lock().await;
        let mut seeds: Vec<Track> = state.queue.now_playing().cloned().into_iter().collect();
        let mut added = 0;
        for entry in state.history.iter().filter(|h| h.outcome != TrackOutcome::Errored) {
            if added >= history {
                break;
            }
            if !seeds.iter().any(|s| s.id == entry.track.id) {
                seeds.push(entry.track.clone());
                added += 1;
            }
        }
        seeds
    }
}
