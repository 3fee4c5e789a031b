//! src/eventbus/mod.rs
//!
//! Provides an in-process event bus that supports guaranteed delivery
//! to multiple subscribers via bounded MPSC queues. Voice presence changes
//! and playback session notifications both travel over it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use jukebot_common::models::{
    GuildId, RadioDisabledReason, Track, TrackOutcome, VoicePresenceEvent,
};

/// Notifications emitted by playback sessions and the services around them.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TrackStarted {
        guild_id: GuildId,
        track: Track,
    },
    TrackFinished {
        guild_id: GuildId,
        track: Track,
        outcome: TrackOutcome,
    },
    /// A track started and no more than the low-water mark is left pending.
    QueueLow {
        guild_id: GuildId,
        pending: usize,
    },
    /// Playback ran out of tracks and the session went idle.
    QueueExhausted {
        guild_id: GuildId,
    },
    SessionRestored {
        guild_id: GuildId,
        tracks: usize,
    },
    SessionClosed {
        guild_id: GuildId,
    },
    /// Several tracks in a row failed to start; the session gave up and is idle.
    PlaybackFailed {
        guild_id: GuildId,
        attempts: usize,
    },
    AutoSkipPromptRequested {
        guild_id: GuildId,
        prompt_id: Uuid,
        track: Track,
        expires_at: DateTime<Utc>,
    },
    RadioDisabled {
        guild_id: GuildId,
        reason: RadioDisabledReason,
    },
}

impl SessionEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            SessionEvent::TrackStarted { guild_id, .. }
            | SessionEvent::TrackFinished { guild_id, .. }
            | SessionEvent::QueueLow { guild_id, .. }
            | SessionEvent::QueueExhausted { guild_id }
            | SessionEvent::SessionRestored { guild_id, .. }
            | SessionEvent::SessionClosed { guild_id }
            | SessionEvent::PlaybackFailed { guild_id, .. }
            | SessionEvent::AutoSkipPromptRequested { guild_id, .. }
            | SessionEvent::RadioDisabled { guild_id, .. } => *guild_id,
        }
    }
}

/// Global event type that various parts of the bot can publish or subscribe to.
#[derive(Debug, Clone)]
pub enum BotEvent {
    VoicePresence(VoicePresenceEvent),
    Session(SessionEvent),
    SystemMessage(String),
}

impl BotEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> String {
        match self {
            BotEvent::VoicePresence(_) => "voice.presence".to_string(),
            BotEvent::SystemMessage(_) => "system_message".to_string(),
            BotEvent::Session(ev) => match ev {
                SessionEvent::TrackStarted { .. } => "session.track_started".to_string(),
                SessionEvent::TrackFinished { .. } => "session.track_finished".to_string(),
                SessionEvent::QueueLow { .. } => "session.queue_low".to_string(),
                SessionEvent::QueueExhausted { .. } => "session.queue_exhausted".to_string(),
                SessionEvent::SessionRestored { .. } => "session.restored".to_string(),
                SessionEvent::SessionClosed { .. } => "session.closed".to_string(),
                SessionEvent::PlaybackFailed { .. } => "session.playback_failed".to_string(),
                SessionEvent::AutoSkipPromptRequested { .. } => "session.autoskip_prompt".to_string(),
                SessionEvent::RadioDisabled { .. } => "session.radio_disabled".to_string(),
            },
        }
    }

    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            BotEvent::VoicePresence(p) => Some(p.guild_id),
            BotEvent::Session(ev) => Some(ev.guild_id()),
            BotEvent::SystemMessage(_) => None,
        }
    }
}

/// Each subscriber gets its own `mpsc::Sender<BotEvent>` for guaranteed delivery.
///
/// - If the subscriber’s channel buffer fills, `publish` will await
///   until there's space (backpressure).
/// - If the subscriber has dropped the `Receiver`, it is pruned on the next publish.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<BotEvent>>>>,
    shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Default size for each subscriber’s buffer.
const DEFAULT_BUFFER_SIZE: usize = 10000;

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new, empty event bus.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            subscribers: Arc::new(Mutex::new(vec![])),
            shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Returns a receiver on which events will be delivered.
    pub async fn subscribe(&self, buffer_size: Option<usize>) -> mpsc::Receiver<BotEvent> {
        let size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let (tx, rx) = mpsc::channel(size);
        let mut subs = self.subscribers.lock().await;
        subs.push(tx);
        rx
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Publish an event to all subscribers.
    pub async fn publish(&self, event: BotEvent) {
        let senders = {
            let mut subs = self.subscribers.lock().await;
            subs.retain(|s| !s.is_closed());
            subs.clone()
        };
        for s in senders {
            let _ = s.send(event.clone()).await;
        }
    }

    /// Convenience method: publish a session notification.
    pub async fn publish_session(&self, event: SessionEvent) {
        self.publish(BotEvent::Session(event)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebot_common::models::PresenceChange;
    use tokio::time::{sleep, timeout, Duration};

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();

        let mut rx1 = bus.subscribe(Some(5)).await;
        let mut rx2 = bus.subscribe(Some(5)).await;

        bus.publish_session(SessionEvent::QueueExhausted { guild_id: GuildId::new(1) }).await;

        let evt1 = rx1.recv().await.expect("rx1 should get event");
        let evt2 = rx2.recv().await.expect("rx2 should get event");

        assert_eq!(evt1.event_type(), "session.queue_exhausted");
        assert_eq!(evt2.guild_id(), Some(GuildId::new(1)));
    }

    #[tokio::test]
    async fn test_backpressure_blocking() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(Some(1)).await; // queue size = 1

        bus.publish(BotEvent::SystemMessage("msg1".into())).await;

        let handle = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            let first = rx.recv().await.expect("expected first message");
            let second = rx.recv().await.expect("expected second message");
            (first, second)
        });

        // Waits until the reader makes room.
        let second_publish = bus.publish(BotEvent::SystemMessage("msg2".into()));
        let result = timeout(Duration::from_millis(500), second_publish).await;
        assert!(result.is_ok(), "publish should eventually unblock");

        let (evt1, evt2) = handle.await.unwrap();
        match (evt1, evt2) {
            (BotEvent::SystemMessage(a), BotEvent::SystemMessage(b)) => {
                assert_eq!(a, "msg1");
                assert_eq!(b, "msg2");
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe(Some(1)).await;
        let mut live = bus.subscribe(Some(4)).await;
        drop(rx);

        bus.publish(BotEvent::VoicePresence(VoicePresenceEvent {
            guild_id: GuildId::new(3),
            member_id: jukebot_common::models::MemberId::new(4),
            change: PresenceChange::Left,
        }))
        .await;

        assert_eq!(bus.subscriber_count().await, 1);
        assert!(matches!(live.recv().await, Some(BotEvent::VoicePresence(_))));
    }

    #[tokio::test]
    async fn test_shutdown_flag() {
        let bus = EventBus::new();
        let mut rx = bus.shutdown_rx.clone();
        assert!(!bus.is_shutdown());
        bus.shutdown();
        rx.changed().await.unwrap();
        assert!(bus.is_shutdown());
    }
}
