use crate::models::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteResult {
    pub current_count: usize,
    pub required_count: usize,
    pub threshold_met: bool,
}

/// What a skip request ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipOutcome {
    /// The track was skipped, either directly or because the vote passed.
    Skipped { track: Track, vote: Option<VoteResult> },
    /// The vote was recorded but the threshold is not met yet.
    Voted(VoteResult),
}

impl SkipOutcome {
    pub fn skipped(&self) -> bool {
        matches!(self, SkipOutcome::Skipped { .. })
    }
}
