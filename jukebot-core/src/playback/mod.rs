pub mod queue;
pub mod registry;
pub mod session;

pub use queue::Queue;
pub use registry::SessionRegistry;
pub use session::{
    Enqueued, LeaveAction, PlaybackSession, PromptDecision, PromptResolution, SessionDeps,
    SessionStatus,
};
