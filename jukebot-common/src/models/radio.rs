use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioDisabledReason {
    /// The per-session limit of generated tracks was reached.
    CapReached { generated: usize },
    /// Turned off on request.
    Requested,
}

impl fmt::Display for RadioDisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioDisabledReason::CapReached { generated } => {
                write!(f, "radio limit reached after {generated} tracks")
            }
            RadioDisabledReason::Requested => f.write_str("radio turned off"),
        }
    }
}
