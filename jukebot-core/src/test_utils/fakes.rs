// File: jukebot-core/src/test_utils/fakes.rs
//
// In-process stand-ins for the external collaborators, for tests and for
// running the engine without voice or network access.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;

use jukebot_common::error::{Collaborator, Error, ResolveFailure};
use jukebot_common::models::{
    GuildId, HistoryEntry, SessionSnapshot, StreamDescriptor, Track, TrackId, TransportFinished,
    TransportHandle, TransportOutcome,
};
use jukebot_common::traits::{Resolver, SessionRepository, Transport};

/// Resolves any query to a track whose id is the query itself.
#[derive(Default)]
pub struct FakeResolver {
    unplayable: DashSet<String>,
    rate_limited_once: DashSet<String>,
    pub resolve_calls: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every resolve of `id` fails fatally.
    pub fn mark_unplayable(&self, id: &str) {
        self.unplayable.insert(id.to_string());
    }

    /// The next resolve of `id` fails with a retryable error.
    pub fn rate_limit_once(&self, id: &str) {
        self.rate_limited_once.insert(id.to_string());
    }

    pub fn calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(&self, query: &str) -> Result<Track, Error> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let id = query.rsplit('/').next().unwrap_or(query);
        if self.rate_limited_once.remove(id).is_some() {
            return Err(Error::resolve(ResolveFailure::RateLimited, query));
        }
        if self.unplayable.contains(id) {
            return Err(Error::resolve(ResolveFailure::Unplayable, query));
        }
        Ok(Track::new(id, format!("Track {id}"), query).with_stream(StreamDescriptor {
            stream_url: format!("memory://{id}"),
            format: Some("pcm".into()),
        }))
    }
}

/// What a `FakeTransport` was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Start(TransportHandle, TrackId),
    Pause(TransportHandle),
    Resume(TransportHandle),
    Stop(TransportHandle),
    Volume(TransportHandle, f32),
}

/// Records every call and reports completions on its channel. Tracks only
/// finish when a test calls `finish`, or when they are stopped.
pub struct FakeTransport {
    tx: mpsc::Sender<TransportFinished>,
    calls: Mutex<Vec<TransportCall>>,
    active: DashMap<TransportHandle, TrackId>,
    failing: DashSet<String>,
    fail_all: AtomicBool,
    fail_resume: AtomicBool,
}

impl FakeTransport {
    pub fn new(tx: mpsc::Sender<TransportFinished>) -> Self {
        Self {
            tx,
            calls: Mutex::new(Vec::new()),
            active: DashMap::new(),
            failing: DashSet::new(),
            fail_all: AtomicBool::new(false),
            fail_resume: AtomicBool::new(false),
        }
    }

    /// A transport plus the receiving end of its completion channel.
    pub fn with_channel() -> (Self, mpsc::Receiver<TransportFinished>) {
        let (tx, rx) = mpsc::channel(64);
        (Self::new(tx), rx)
    }

    pub fn fail_start_for(&self, id: &str) {
        self.failing.insert(id.to_string());
    }

    pub fn fail_all_starts(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_resumes(&self, fail: bool) {
        self.fail_resume.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn started(&self) -> Vec<TrackId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TransportCall::Start(_, id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn stop_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::Stop(_)))
            .count()
    }

    /// The handle of the most recent successful start that has not finished.
    pub fn current_handle(&self, guild_id: GuildId) -> Option<TransportHandle> {
        self.calls()
            .into_iter()
            .rev()
            .find_map(|c| match c {
                TransportCall::Start(h, _) if h.guild_id == guild_id && self.active.contains_key(&h) => Some(h),
                _ => None,
            })
    }

    /// Ends a running track as if the stream ran out (or broke).
    pub async fn finish(&self, handle: TransportHandle, outcome: TransportOutcome) -> Option<TransportFinished> {
        let (_, track_id) = self.active.remove(&handle)?;
        let finished = TransportFinished { handle, track_id, outcome };
        let _ = self.tx.send(finished.clone()).await;
        Some(finished)
    }

    fn record(&self, call: TransportCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start(&self, handle: &TransportHandle, track: &Track) -> Result<(), Error> {
        if self.fail_all.load(Ordering::SeqCst) || self.failing.contains(track.id.as_str()) {
            return Err(Error::fatal(
                Collaborator::Transport,
                format!("cannot start '{}'", track.title),
            ));
        }
        self.active.insert(*handle, track.id.clone());
        self.record(TransportCall::Start(*handle, track.id.clone()));
        Ok(())
    }

    async fn pause(&self, handle: &TransportHandle) -> Result<(), Error> {
        self.record(TransportCall::Pause(*handle));
        Ok(())
    }

    async fn resume(&self, handle: &TransportHandle) -> Result<(), Error> {
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(Error::retryable(Collaborator::Transport, "resume rejected"));
        }
        self.record(TransportCall::Resume(*handle));
        Ok(())
    }

    async fn stop(&self, handle: &TransportHandle) -> Result<(), Error> {
        self.record(TransportCall::Stop(*handle));
        if let Some((_, track_id)) = self.active.remove(handle) {
            let _ = self.tx.try_send(TransportFinished {
                handle: *handle,
                track_id,
                outcome: TransportOutcome::Superseded,
            });
        }
        Ok(())
    }

    async fn set_volume(&self, handle: &TransportHandle, volume: f32) -> Result<(), Error> {
        self.record(TransportCall::Volume(*handle, volume));
        Ok(())
    }
}

/// Persistence that is always down.
#[derive(Default)]
pub struct FailingRepository {
    pub attempts: AtomicUsize,
}

impl FailingRepository {
    fn fail<T>(&self) -> Result<T, Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::retryable(Collaborator::Persistence, "database unavailable"))
    }
}

#[async_trait]
impl SessionRepository for FailingRepository {
    async fn append_history(&self, _entry: &HistoryEntry) -> Result<(), Error> {
        self.fail()
    }

    async fn recent_history(&self, _guild_id: GuildId, _limit: usize) -> Result<Vec<HistoryEntry>, Error> {
        self.fail()
    }

    async fn load_session(&self, _guild_id: GuildId) -> Result<Option<SessionSnapshot>, Error> {
        self.fail()
    }

    async fn save_snapshot(&self, _snapshot: &SessionSnapshot) -> Result<(), Error> {
        self.fail()
    }

    async fn delete_snapshot(&self, _guild_id: GuildId) -> Result<(), Error> {
        self.fail()
    }

    async fn purge_history_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, Error> {
        self.fail()
    }
}
