use serde::{Deserialize, Serialize};

/// A user's stance on one market. Stored as a single row whose `stance`
/// column is +1 or -1; no row means `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteState {
    #[default]
    None,
    Up,
    Down,
}

impl VoteState {
    pub fn from_stance(stance: Option<i64>) -> Self {
        match stance {
            Some(s) if s > 0 => VoteState::Up,
            Some(s) if s < 0 => VoteState::Down,
            _ => VoteState::None,
        }
    }

    /// Column value for this state, or None when the row should not exist.
    pub fn stance(self) -> Option<i64> {
        match self {
            VoteState::None => None,
            VoteState::Up => Some(1),
            VoteState::Down => Some(-1),
        }
    }
}

impl std::fmt::Display for VoteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VoteState::None => "none",
            VoteState::Up => "up",
            VoteState::Down => "down",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteAction {
    Upvote,
    Downvote,
}

impl std::fmt::Display for VoteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteAction::Upvote => write!(f, "upvote"),
            VoteAction::Downvote => write!(f, "downvote"),
        }
    }
}

/// Change to apply to a market's denormalized counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterDelta {
    pub upvotes: i64,
    pub downvotes: i64,
}

/// Pressing the button for the current stance clears it; pressing the other
/// button switches sides, moving one count from one counter to the other.
pub fn transition(current: VoteState, action: VoteAction) -> (VoteState, CounterDelta) {
    let delta = |upvotes, downvotes| CounterDelta { upvotes, downvotes };
    match (current, action) {
        (VoteState::None, VoteAction::Upvote) => (VoteState::Up, delta(1, 0)),
        (VoteState::Up, VoteAction::Upvote) => (VoteState::None, delta(-1, 0)),
        (VoteState::Down, VoteAction::Upvote) => (VoteState::Up, delta(1, -1)),
        (VoteState::None, VoteAction::Downvote) => (VoteState::Down, delta(0, 1)),
        (VoteState::Down, VoteAction::Downvote) => (VoteState::None, delta(0, -1)),
        (VoteState::Up, VoteAction::Downvote) => (VoteState::Down, delta(-1, 1)),
    }
}
