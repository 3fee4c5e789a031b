// jukebot-core/src/tasks/session_cleanup.rs

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jukebot_common::traits::SessionRepository;

use crate::config::CleanupConfig;
use crate::playback::SessionRegistry;
use crate::services::RadioController;
use crate::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub sessions_closed: usize,
    pub sessions_failed: usize,
    pub cache_entries_purged: usize,
    pub history_purged: u64,
}

/// Spawns a background task that retires stale sessions on a fixed interval.
pub fn spawn_session_cleanup_task(
    registry: Arc<SessionRegistry>,
    radio: Option<Arc<RadioController>>,
    repository: Arc<dyn SessionRepository>,
    config: CleanupConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.interval());
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            match run_session_cleanup(&registry, radio.as_deref(), repository.as_ref(), &config).await {
                Ok(stats) => debug!("Session cleanup finished: {:?}", stats),
                Err(e) => error!("Session cleanup failed: {:?}", e),
            }
        }
    })
}

/// One sweep:
///  1. close and remove sessions idle for at least `stale_after`
///  2. purge expired recommendation cache entries
///  3. drop history older than the retention window
///
/// A session that fails to close is logged and the sweep moves on.
pub async fn run_session_cleanup(
    registry: &SessionRegistry,
    radio: Option<&RadioController>,
    repository: &dyn SessionRepository,
    config: &CleanupConfig,
) -> Result<CleanupStats, Error> {
    let mut stats = CleanupStats::default();
    let stale_after = config.stale_after();

    for session in registry.sessions() {
        let guild_id = session.guild_id();
        if session.is_closed() {
            // Closed elsewhere but never removed.
            registry.retire(&session).await;
            continue;
        }
        match session.close_if_stale(stale_after).await {
            Ok(true) => {
                registry.retire(&session).await;
                stats.sessions_closed += 1;
                info!("Session cleanup: closed idle session for guild {}", guild_id);
            }
            Ok(false) => {}
            Err(e) => {
                stats.sessions_failed += 1;
                warn!("Session cleanup: could not close guild {}: {}", guild_id, e);
            }
        }
    }

    if let Some(radio) = radio {
        stats.cache_entries_purged = radio.purge_cache().await;
    }

    let cutoff = Utc::now() - chrono::Duration::days(config.history_retention_days);
    match repository.purge_history_before(cutoff).await {
        Ok(n) => stats.history_purged = n,
        Err(e) => warn!("Session cleanup: history purge failed: {}", e),
    }

    if stats.sessions_closed > 0 || stats.history_purged > 0 {
        info!(
            "Session cleanup: closed {} session(s), purged {} cache entr(ies) and {} history row(s)",
            stats.sessions_closed, stats.cache_entries_purged, stats.history_purged
        );
    }
    Ok(stats)
}
