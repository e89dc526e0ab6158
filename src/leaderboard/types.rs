use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::LeaderboardError;

pub type UserId = i32;
pub type GameId = i32;
pub type ScoreId = i32;
pub type ScoreValue = i64;

/// Moderation status of a submitted score. Only `Pending` may be left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    Pending,
    Approved,
    Rejected,
}

impl ScoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreStatus::Pending => "pending",
            ScoreStatus::Approved => "approved",
            ScoreStatus::Rejected => "rejected",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ScoreStatus::Pending)
    }

    /// Applies a moderation decision. Every source state other than `Pending`
    /// is terminal.
    pub fn transition(self, decision: &ReviewDecision) -> Result<ScoreStatus, LeaderboardError> {
        match (self, decision) {
            (ScoreStatus::Pending, ReviewDecision::Approve) => Ok(ScoreStatus::Approved),
            (ScoreStatus::Pending, ReviewDecision::Reject { .. }) => Ok(ScoreStatus::Rejected),
            (current, _) => Err(LeaderboardError::invalid_state(format!(
                "score is already {}",
                current.as_str()
            ))),
        }
    }
}

impl std::fmt::Display for ScoreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject { reason: Option<String> },
}

impl ReviewDecision {
    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            ReviewDecision::Approve => None,
            ReviewDecision::Reject { reason } => reason.as_deref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub id: ScoreId,
    pub user_id: UserId,
    pub game_id: GameId,
    pub value: ScoreValue,
    pub submitted_at: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub status: ScoreStatus,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl Score {
    /// Returns the score as it looks after `review` has been applied.
    pub fn reviewed(mut self, review: &ScoreReview) -> Result<Self, LeaderboardError> {
        self.status = self.status.transition(&review.decision)?;
        self.reviewed_by = Some(review.reviewer_id);
        self.reviewed_at = Some(review.reviewed_at);
        self.rejection_reason = review.decision.rejection_reason().map(str::to_owned);
        Ok(self)
    }
}

/// Caller-supplied submission, before title defaults are resolved.
#[derive(Clone, Debug, Deserialize)]
pub struct ScoreSubmission {
    pub user_id: UserId,
    pub game_id: GameId,
    pub value: ScoreValue,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Row handed to the durable store. The store assigns `id` and `submitted_at`.
#[derive(Clone, Debug)]
pub struct NewScore {
    pub user_id: UserId,
    pub game_id: GameId,
    pub value: ScoreValue,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ScoreReview {
    pub score_id: ScoreId,
    pub reviewer_id: UserId,
    pub reviewed_at: DateTime<Utc>,
    pub decision: ReviewDecision,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Moderator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Moderator => "Moderator",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameModerator {
    pub game_id: GameId,
    pub user_id: UserId,
    pub assigned_at: DateTime<Utc>,
}

/// A (user, best approved value) pair as held by the ranked index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RankedEntry {
    pub user_id: UserId,
    pub value: ScoreValue,
}

impl RankedEntry {
    pub fn new(user_id: UserId, value: ScoreValue) -> Self {
        Self { user_id, value }
    }
}

/// Read projection of the ranked index with the display name resolved at read time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub user_name: Option<String>,
    pub score: ScoreValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

impl Page {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusFilter {
    ApprovedOnly,
    Any,
}

impl StatusFilter {
    pub fn admits(&self, status: ScoreStatus) -> bool {
        match self {
            StatusFilter::ApprovedOnly => status == ScoreStatus::Approved,
            StatusFilter::Any => true,
        }
    }
}

/// Whether the ranked index followed a committed approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CacheSync {
    Synced,
    Degraded { reason: String },
}

impl CacheSync {
    pub fn is_synced(&self) -> bool {
        matches!(self, CacheSync::Synced)
    }
}

#[derive(Clone, Debug)]
pub struct ApprovalOutcome {
    pub score: Score,
    pub cache: CacheSync,
}
