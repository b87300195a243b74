use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::comments::CommentNode;
use crate::consensus::Consensus;
use crate::votes::VoteState;

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Public view of a user attached to markets, comments and predictions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
}

impl AuthorRef {
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.email)
    }
}

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMarket {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "resolutionCriteria")]
    pub resolution_criteria: String,
}

/// One row of the market list, shaped for the requesting viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub resolution_criteria: String,
    pub author: AuthorRef,
    pub created_at: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub comment_count: i64,
    pub viewer_vote: VoteState,
    pub is_owner: bool,
    pub is_new: bool,
}

/// A market with voters and its comment tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDetail {
    pub id: String,
    pub title: String,
    pub description: String,
    pub resolution_criteria: String,
    pub author: AuthorRef,
    pub created_at: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub upvoters: Vec<String>,
    pub downvoters: Vec<String>,
    pub viewer_vote: VoteState,
    pub is_owner: bool,
    pub comments: Vec<CommentNode>,
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionEntry {
    pub user: AuthorRef,
    pub probability: f64,
}

/// Everything the probability page shows for a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilityView {
    pub market_id: String,
    pub title: String,
    pub description: String,
    pub author: AuthorRef,
    pub created_at: i64,
    pub predictions: Vec<PredictionEntry>,
    pub consensus: Consensus,
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

/// Result of a vote toggle: the viewer's new stance and the market's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub state: VoteState,
    pub upvotes: i64,
    pub downvotes: i64,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Nanoseconds since the Unix epoch. All stored timestamps use this unit.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

pub const NANOS_PER_SEC: i64 = 1_000_000_000;
