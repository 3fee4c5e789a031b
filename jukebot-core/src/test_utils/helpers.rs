// File: jukebot-core/src/test_utils/helpers.rs

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tokio::sync::mpsc;

use jukebot_common::models::{GuildId, MemberId, StreamDescriptor, Track, TransportFinished};
use jukebot_common::traits::SessionRepository;

use crate::config::{EngineConfig, EngineConfigFile, RetryConfig};
use crate::eventbus::{BotEvent, EventBus, SessionEvent};
use crate::playback::{PlaybackSession, SessionDeps, SessionRegistry};
use crate::repositories::InMemorySessionRepository;
use crate::test_utils::fakes::{FakeResolver, FakeTransport};
use crate::Error;

pub fn guild(n: u64) -> GuildId {
    GuildId::new(n)
}

pub fn member(n: u64) -> MemberId {
    MemberId::new(n)
}

/// A resolved track with id `id`.
pub fn track(id: &str) -> Track {
    unresolved_track(id).with_stream(StreamDescriptor {
        stream_url: format!("memory://{id}"),
        format: Some("pcm".into()),
    })
}

pub fn unresolved_track(id: &str) -> Track {
    Track::new(id, format!("Track {id}"), format!("https://tracks.test/{id}"))
}

pub fn requested_track(id: &str, by: MemberId) -> Track {
    track(id).with_requester(by, format!("member-{by}"))
}

/// Defaults with retry delays short enough for real-time tests.
pub fn test_config() -> EngineConfig {
    config_with(|_| {}).unwrap_or_default()
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

/// Test defaults adjusted by `f`, then validated.
pub fn config_with(f: impl FnOnce(&mut EngineConfigFile)) -> Result<EngineConfig, Error> {
    let mut raw = EngineConfigFile {
        retry: fast_retry(),
        ..EngineConfigFile::default()
    };
    f(&mut raw);
    EngineConfig::new(raw)
}

/// Fakes wired into `SessionDeps`.
pub struct TestHarness {
    pub resolver: Arc<FakeResolver>,
    pub transport: Arc<FakeTransport>,
    pub repository: Arc<InMemorySessionRepository>,
    pub event_bus: Arc<EventBus>,
    pub config: Arc<EngineConfig>,
    pub transport_rx: Option<mpsc::Receiver<TransportFinished>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let (transport, rx) = FakeTransport::with_channel();
        Self {
            resolver: Arc::new(FakeResolver::new()),
            transport: Arc::new(transport),
            repository: Arc::new(InMemorySessionRepository::new()),
            event_bus: Arc::new(EventBus::new()),
            config: Arc::new(config),
            transport_rx: Some(rx),
        }
    }

    pub fn deps(&self) -> SessionDeps {
        self.deps_with_repository(self.repository.clone())
    }

    pub fn deps_with_repository(&self, repository: Arc<dyn SessionRepository>) -> SessionDeps {
        SessionDeps {
            resolver: self.resolver.clone(),
            transport: self.transport.clone(),
            repository,
            event_bus: self.event_bus.clone(),
            config: self.config.clone(),
        }
    }

    /// A standalone session, not registered anywhere.
    pub fn session(&self, guild_id: GuildId) -> Arc<PlaybackSession> {
        Arc::new(PlaybackSession::new(guild_id, self.deps()))
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(self.deps()))
    }

    /// A registry whose transport completions are routed back into it.
    pub fn wired_registry(&mut self) -> Arc<SessionRegistry> {
        let registry = self.registry();
        if let Some(rx) = self.transport_rx.take() {
            registry.spawn_transport_listener(rx);
        }
        registry
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything currently buffered on a subscription.
pub fn drain_events(rx: &mut mpsc::Receiver<BotEvent>) -> Vec<BotEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// Only the session notifications among `events`.
pub fn session_events(events: Vec<BotEvent>) -> Vec<SessionEvent> {
    events
        .into_iter()
        .filter_map(|e| match e {
            BotEvent::Session(s) => Some(s),
            _ => None,
        })
        .collect()
}

/// Connects to `TEST_DATABASE_URL`, or returns `None` when it is not set so
/// database tests can be skipped on machines without Postgres.
pub async fn test_db_pool() -> Result<Option<Pool<Postgres>>, Error> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        return Ok(None);
    };
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;
    Ok(Some(pool))
}
