// src/services/autoskip.rs
//
// Pauses and asks what to do when the requester of the current track leaves
// the voice channel. No answer before the timeout means skip.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};
use uuid::Uuid;

use jukebot_common::models::{GuildId, PresenceChange, VoicePresenceEvent};

use crate::config::AutoSkipConfig;
use crate::eventbus::{BotEvent, EventBus};
use crate::playback::{LeaveAction, PlaybackSession, PromptDecision, PromptResolution, SessionRegistry};
use crate::voice::VoiceRoster;
use crate::Error;

pub struct AutoSkipOnLeave {
    registry: Arc<SessionRegistry>,
    roster: Arc<VoiceRoster>,
    event_bus: Arc<EventBus>,
    config: AutoSkipConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AutoSkipOnLeave {
    pub fn new(
        registry: Arc<SessionRegistry>,
        roster: Arc<VoiceRoster>,
        event_bus: Arc<EventBus>,
        config: AutoSkipConfig,
    ) -> Self {
        Self {
            registry,
            roster,
            event_bus,
            config,
            task: Mutex::new(None),
        }
    }

    /// Subscribes to presence events until `stop` or bus shutdown.
    pub async fn start(self: &Arc<Self>) {
        let mut rx = self.event_bus.subscribe(None).await;
        let mut shutdown_rx = self.event_bus.shutdown_rx.clone();
        let me = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(BotEvent::VoicePresence(event)) => {
                                // One task per event keeps a busy guild from delaying others.
                                let me = Arc::clone(&me);
                                tokio::spawn(async move {
                                    if let Err(e) = me.handle_presence(event).await {
                                        error!("AutoSkip: presence handling failed for guild {}: {}", event.guild_id, e);
                                    }
                                });
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("AutoSkip: listener stopped");
        });

        let mut task = self.task.lock().await;
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }

    /// Applies one presence change. Joins (including the requester coming
    /// back while a prompt is open) change nothing.
    pub async fn handle_presence(
        self: &Arc<Self>,
        event: VoicePresenceEvent,
    ) -> Result<Option<LeaveAction>, Error> {
        if !self.config.enabled || event.change != PresenceChange::Left {
            return Ok(None);
        }
        let Some(session) = self.registry.lookup(event.guild_id) else {
            return Ok(None);
        };
        let remaining = self.roster.listener_count(event.guild_id);
        let action = session
            .requester_left(event.member_id, remaining, self.config.prompt_timeout())
            .await?;

        if let LeaveAction::Prompted { prompt_id, cancel } = &action {
            self.spawn_prompt_timer(session, *prompt_id, cancel.clone());
        }
        Ok(Some(action))
    }

    fn spawn_prompt_timer(
        &self,
        session: Arc<PlaybackSession>,
        prompt_id: Uuid,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        let timeout = self.config.prompt_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("AutoSkip: prompt {} settled before timeout", prompt_id);
                }
                _ = sleep(timeout) => {
                    match session.resolve_prompt(prompt_id, PromptDecision::TimedOut).await {
                        Ok(_) => info!("AutoSkip: prompt {} timed out, track skipped", prompt_id),
                        // A decision raced in first.
                        Err(e) => debug!("AutoSkip: prompt {} already settled: {}", prompt_id, e),
                    }
                }
            }
        });
    }

    /// A member's answer to the prompt: `keep` resumes, otherwise skip.
    pub async fn decide(
        &self,
        guild_id: GuildId,
        prompt_id: Uuid,
        keep: bool,
    ) -> Result<PromptResolution, Error> {
        let session = self.registry.get(guild_id)?;
        let decision = if keep { PromptDecision::Keep } else { PromptDecision::Skip };
        session.resolve_prompt(prompt_id, decision).await
    }
}
