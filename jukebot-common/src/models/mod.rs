// File: jukebot-common/src/models/mod.rs
pub mod track;
pub mod session;
pub mod transport;
pub mod voting;
pub mod presence;
pub mod radio;

use twilight_model::id::Id;
use twilight_model::id::marker::{GuildMarker, UserMarker};

/// Discord guild (server) identifier; the unit of playback isolation.
pub type GuildId = Id<GuildMarker>;

/// Discord member identifier.
pub type MemberId = Id<UserMarker>;

pub use track::{HistoryEntry, Requester, StreamDescriptor, Track, TrackId, TrackOutcome};
pub use session::{LoopMode, PlaybackState, SessionSnapshot};
pub use transport::{TransportFinished, TransportHandle, TransportOutcome};
pub use voting::{SkipOutcome, VoteResult};
pub use presence::{PresenceChange, VoicePresenceEvent};
pub use radio::RadioDisabledReason;
