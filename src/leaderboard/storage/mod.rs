use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::leaderboard::error::LeaderboardError;
use crate::leaderboard::types::{
    GameId, NewScore, Page, RankedEntry, Score, ScoreId, ScoreReview, ScoreValue, StatusFilter,
    UserId,
};

/// Durable score store. Reads go straight to the store; writes go through a
/// transaction from [`ScoreStorage::begin`].
#[async_trait]
pub trait ScoreStorage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ScoreStorageTxn>, LeaderboardError>;

    async fn load_score(&self, id: ScoreId) -> Result<Option<Score>, LeaderboardError>;

    /// Each user's maximum approved value for `game_id`.
    async fn best_approved_by_user(
        &self,
        game_id: GameId,
    ) -> Result<Vec<RankedEntry>, LeaderboardError>;

    async fn best_approved_for(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<Option<ScoreValue>, LeaderboardError>;

    /// Approved scores submitted within `[start, end]`, highest value first,
    /// oldest first among equal values.
    async fn top_approved_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Score>, LeaderboardError>;

    /// Newest first.
    async fn scores_by_user(
        &self,
        user_id: UserId,
        filter: StatusFilter,
        page: Page,
    ) -> Result<Vec<Score>, LeaderboardError>;

    /// Approved scores across all games, newest first.
    async fn recent_approved(&self, page: Page) -> Result<Vec<Score>, LeaderboardError>;

    /// Oldest first.
    async fn pending_for_game(
        &self,
        game_id: GameId,
        page: Page,
    ) -> Result<Vec<Score>, LeaderboardError>;

    /// Pending scores of games without any moderator assignment, oldest first.
    async fn pending_for_unmoderated_games(
        &self,
        page: Page,
    ) -> Result<Vec<Score>, LeaderboardError>;
}

#[async_trait]
pub trait ScoreStorageTxn: Send {
    async fn best_approved_for(
        &mut self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<Option<ScoreValue>, LeaderboardError>;

    /// Inserts a pending score; the store assigns the id and submission time.
    async fn insert_score(&mut self, score: NewScore) -> Result<Score, LeaderboardError>;

    /// Applies a review only if the score is still pending at write time.
    /// Fails with `InvalidState` otherwise.
    async fn record_review(&mut self, review: ScoreReview) -> Result<Score, LeaderboardError>;

    async fn commit(self: Box<Self>) -> Result<(), LeaderboardError>;
    async fn rollback(self: Box<Self>);
}

pub mod in_memory;
pub mod sea_orm;

pub use self::in_memory::InMemoryLeaderboardStore;
pub use self::sea_orm::SeaOrmLeaderboardStore;
