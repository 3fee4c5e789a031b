pub mod autoskip;
pub mod music_service;
pub mod radio;
pub mod vote_skip;

pub use autoskip::AutoSkipOnLeave;
pub use music_service::{Collaborators, MusicService};
pub use radio::RadioController;
pub use vote_skip::{evaluate_threshold, VoteSkipCoordinator};
