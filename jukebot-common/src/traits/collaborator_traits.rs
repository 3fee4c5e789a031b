// File: jukebot-common/src/traits/collaborator_traits.rs
//
// External collaborators of the playback engine. The engine only talks to
// these traits; the server crate supplies the real implementations.

use async_trait::async_trait;

use crate::error::{Collaborator, Error};
use crate::models::{StreamDescriptor, Track, TransportHandle};

/// Turns a URL or search query into a playable track.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Fails with a `Collaborator` error built from `Error::resolve` for
    /// not-found, rate-limited and unplayable queries.
    async fn resolve(&self, query: &str) -> Result<Track, Error>;

    /// Fetches a fresh stream for a track that is queued without one
    /// (restored from a snapshot, or produced by the recommender).
    async fn resolve_stream(&self, track: &Track) -> Result<StreamDescriptor, Error> {
        let resolved = self.resolve(&track.source_url).await?;
        resolved.stream.ok_or_else(|| {
            Error::fatal(
                Collaborator::Resolver,
                format!("no stream available for '{}'", track.title),
            )
        })
    }
}

/// Audio transport to the voice channel.
///
/// Implementations report the end of every started track exactly once, by
/// sending a `TransportFinished` on the channel they were constructed with.
/// `stop` must be idempotent and safe to call for a handle whose `start`
/// never completed.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self, handle: &TransportHandle, track: &Track) -> Result<(), Error>;
    async fn pause(&self, handle: &TransportHandle) -> Result<(), Error>;
    async fn resume(&self, handle: &TransportHandle) -> Result<(), Error>;
    async fn stop(&self, handle: &TransportHandle) -> Result<(), Error>;

    async fn set_volume(&self, _handle: &TransportHandle, _volume: f32) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait Recommender: Send + Sync {
    /// Suggests up to `count` tracks similar to `seeds`. Returned tracks are
    /// usually unresolved.
    async fn suggest(&self, seeds: &[Track], count: usize) -> Result<Vec<Track>, Error>;
}
