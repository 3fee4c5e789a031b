// src/services/music_service.rs
//
// The surface the presentation layer talks to. Owns the registry and the
// services around it, and the background tasks that drive them.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use jukebot_common::models::{
    GuildId, HistoryEntry, LoopMode, MemberId, PresenceChange, SkipOutcome, Track, TransportFinished,
};
use jukebot_common::traits::{Recommender, Resolver, SessionRepository, Transport};

use crate::config::{EngineConfig, RetryConfig};
use crate::eventbus::EventBus;
use crate::playback::{Enqueued, PromptResolution, SessionDeps, SessionRegistry, SessionStatus};
use crate::services::{AutoSkipOnLeave, RadioController, VoteSkipCoordinator};
use crate::tasks::spawn_session_cleanup_task;
use crate::utils::retry_with_backoff;
use crate::voice::{PresenceIntake, VoiceRoster};
use crate::Error;

/// Implementations of the external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn Resolver>,
    pub transport: Arc<dyn Transport>,
    pub repository: Arc<dyn SessionRepository>,
    pub recommender: Arc<dyn Recommender>,
}

pub struct MusicService {
    registry: Arc<SessionRegistry>,
    roster: Arc<VoiceRoster>,
    intake: PresenceIntake,
    votes: VoteSkipCoordinator,
    autoskip: Arc<AutoSkipOnLeave>,
    radio: Arc<RadioController>,
    resolver: Arc<dyn Resolver>,
    retry: RetryConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MusicService {
    /// Wires everything together and starts the transport listener, the
    /// auto-skip and radio subscribers and the cleanup task.
    pub async fn start(
        collaborators: Collaborators,
        event_bus: Arc<EventBus>,
        config: EngineConfig,
        transport_rx: mpsc::Receiver<TransportFinished>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::new(SessionDeps {
            resolver: collaborators.resolver.clone(),
            transport: collaborators.transport.clone(),
            repository: collaborators.repository.clone(),
            event_bus: event_bus.clone(),
            config: config.clone(),
        }));
        let roster = Arc::new(VoiceRoster::new());
        let intake = PresenceIntake::new(roster.clone(), event_bus.clone());
        let votes = VoteSkipCoordinator::new(roster.clone(), config.voting().clone());
        let autoskip = Arc::new(AutoSkipOnLeave::new(
            registry.clone(),
            roster.clone(),
            event_bus.clone(),
            config.autoskip().clone(),
        ));
        let radio = Arc::new(RadioController::new(
            registry.clone(),
            collaborators.recommender.clone(),
            event_bus.clone(),
            config.radio().clone(),
            config.retry().clone(),
        ));

        autoskip.start().await;
        radio.start().await;
        let listener = registry.spawn_transport_listener(transport_rx);
        let cleanup = spawn_session_cleanup_task(
            registry.clone(),
            Some(radio.clone()),
            collaborators.repository.clone(),
            config.cleanup().clone(),
        );
        info!("MusicService started");

        Arc::new(Self {
            registry,
            roster,
            intake,
            votes,
            autoskip,
            radio,
            resolver: collaborators.resolver,
            retry: config.retry().clone(),
            tasks: Mutex::new(vec![listener, cleanup]),
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn roster(&self) -> &Arc<VoiceRoster> {
        &self.roster
    }

    /// Resolves `query` and queues it for the guild, creating the session on
    /// first use.
    pub async fn play(
        &self,
        guild_id: GuildId,
        member: MemberId,
        display_name: &str,
        query: &str,
    ) -> Result<Enqueued, Error> {
        let track = self.resolve(query).await?.with_requester(member, display_name);
        let session = self.registry.get_or_create(guild_id).await?;
        session.enqueue(track).await
    }

    pub async fn play_next(
        &self,
        guild_id: GuildId,
        member: MemberId,
        display_name: &str,
        query: &str,
    ) -> Result<Enqueued, Error> {
        let track = self.resolve(query).await?.with_requester(member, display_name);
        let session = self.registry.get_or_create(guild_id).await?;
        session.enqueue_next(track).await
    }

    async fn resolve(&self, query: &str) -> Result<Track, Error> {
        let resolver: &dyn Resolver = self.resolver.as_ref();
        retry_with_backoff(&self.retry, "resolve", move || resolver.resolve(query)).await
    }

    /// Plays whatever a restored session brought back.
    pub async fn resume_restored(&self, guild_id: GuildId) -> Result<Option<Track>, Error> {
        let session = self.registry.get_or_create(guild_id).await?;
        session.play_pending().await
    }

    pub async fn skip(&self, guild_id: GuildId, member: MemberId, privileged: bool) -> Result<SkipOutcome, Error> {
        let session = self.registry.get(guild_id)?;
        self.votes.request_skip(&session, member, privileged).await
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<(), Error> {
        self.registry.get(guild_id)?.pause().await
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<(), Error> {
        self.registry.get(guild_id)?.resume().await
    }

    pub async fn stop(&self, guild_id: GuildId) -> Result<(), Error> {
        self.registry.get(guild_id)?.stop().await
    }

    /// The bot leaves the guild's voice channel.
    pub async fn leave(&self, guild_id: GuildId) -> Result<(), Error> {
        self.registry.remove(guild_id).await?;
        self.roster.clear_guild(guild_id);
        Ok(())
    }

    pub async fn shuffle(&self, guild_id: GuildId) -> Result<usize, Error> {
        self.registry.get(guild_id)?.shuffle().await
    }

    pub async fn remove(&self, guild_id: GuildId, position: usize) -> Result<Track, Error> {
        self.registry.get(guild_id)?.remove(position).await
    }

    pub async fn move_track(&self, guild_id: GuildId, from: usize, to: usize) -> Result<(), Error> {
        self.registry.get(guild_id)?.move_track(from, to).await
    }

    pub async fn clear(&self, guild_id: GuildId) -> Result<usize, Error> {
        self.registry.get(guild_id)?.clear().await
    }

    /// Sets the loop mode, or cycles it when `mode` is `None`.
    pub async fn set_loop(&self, guild_id: GuildId, mode: Option<LoopMode>) -> Result<LoopMode, Error> {
        let session = self.registry.get(guild_id)?;
        match mode {
            Some(mode) => {
                session.set_loop_mode(mode).await?;
                Ok(mode)
            }
            None => session.cycle_loop_mode().await,
        }
    }

    pub async fn set_volume(&self, guild_id: GuildId, volume: f32) -> Result<(), Error> {
        self.registry.get(guild_id)?.set_volume(volume).await
    }

    pub async fn status(&self, guild_id: GuildId) -> Result<SessionStatus, Error> {
        self.registry.get(guild_id)?.status().await
    }

    pub async fn history(&self, guild_id: GuildId, limit: usize) -> Result<Vec<HistoryEntry>, Error> {
        Ok(self.registry.get(guild_id)?.recent_history(limit).await)
    }

    pub async fn toggle_radio(&self, guild_id: GuildId) -> Result<bool, Error> {
        self.radio.toggle(guild_id).await
    }

    pub async fn answer_prompt(&self, guild_id: GuildId, prompt_id: Uuid, keep: bool) -> Result<PromptResolution, Error> {
        self.autoskip.decide(guild_id, prompt_id, keep).await
    }

    pub async fn presence(&self, guild_id: GuildId, member: MemberId, change: PresenceChange) {
        self.intake.submit(guild_id, member, change).await;
    }

    /// Stops the background tasks and closes every session. Snapshots stay
    /// behind for the next start.
    pub async fn shutdown(&self) {
        self.autoskip.stop().await;
        self.radio.stop().await;
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        self.registry.shutdown().await;
        info!("MusicService stopped");
    }
}
