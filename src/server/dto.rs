use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::leaderboard::{
    ApprovalOutcome, CacheSync, GameId, Score, ScoreId, ScoreSubmission, ScoreValue, UserId,
};

/// Body of `POST /scores`; the submitting user is the request principal.
#[derive(Debug, Deserialize)]
pub struct SubmitScoreRequest {
    pub game_id: GameId,
    pub value: ScoreValue,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl SubmitScoreRequest {
    pub fn into_submission(self, user_id: UserId) -> ScoreSubmission {
        ScoreSubmission {
            user_id,
            game_id: self.game_id,
            value: self.value,
            title: self.title,
            description: self.description,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectScoreRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TopPlayersQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: Option<u64>,
}

#[derive(Serialize)]
pub struct SubmitScoreResponse {
    pub score_id: ScoreId,
    pub score: Score,
}

#[derive(Serialize)]
pub struct ApprovalResponse {
    pub score: Score,
    pub cache: CacheSync,
}

impl From<ApprovalOutcome> for ApprovalResponse {
    fn from(outcome: ApprovalOutcome) -> Self {
        Self {
            score: outcome.score,
            cache: outcome.cache,
        }
    }
}

#[derive(Serialize)]
pub struct RankResponse {
    pub game_id: GameId,
    pub user_id: UserId,
    pub rank: Option<u64>,
}

#[derive(Serialize)]
pub struct CanModerateResponse {
    pub game_id: GameId,
    pub user_id: UserId,
    pub can_moderate: bool,
}
