//! Per-game ranked index of best approved scores.
//!
//! The engine only talks to the index through [`RankedIndex`]; the index is a
//! derived structure that can be dropped and rebuilt from the durable store at
//! any time.

pub mod in_memory;
pub mod set;

use std::sync::Arc;

use async_trait::async_trait;

use crate::leaderboard::types::{GameId, RankedEntry, ScoreValue, UserId};

pub use in_memory::InMemoryRankedIndex;
pub use set::RankedSet;

pub type SharedRankedIndex = Arc<dyn RankedIndex>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RankedIndexError {
    #[error("ranked index unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RankedIndex: Send + Sync {
    /// Writes `value` for `user_id`, creating the game's entry when absent.
    async fn upsert(
        &self,
        game_id: GameId,
        user_id: UserId,
        value: ScoreValue,
    ) -> Result<(), RankedIndexError>;

    /// Writes `value` only when the game's entry is present. Returns whether
    /// the write happened.
    async fn upsert_if_present(
        &self,
        game_id: GameId,
        user_id: UserId,
        value: ScoreValue,
    ) -> Result<bool, RankedIndexError>;

    /// Merges `entries` into the game's entry, creating it when absent. A
    /// member's value is only ever raised, so a payload read before a later
    /// approval cannot drop or lower what that approval wrote. Start from
    /// [`RankedIndex::invalidate`] to replace the entry outright. An empty
    /// payload is a no-op.
    async fn bulk_load(
        &self,
        game_id: GameId,
        entries: Vec<RankedEntry>,
    ) -> Result<(), RankedIndexError>;

    async fn rank_of(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<Option<u64>, RankedIndexError>;

    async fn top(&self, game_id: GameId, k: usize) -> Result<Vec<RankedEntry>, RankedIndexError>;

    async fn cardinality(&self, game_id: GameId) -> Result<usize, RankedIndexError>;

    async fn exists(&self, game_id: GameId) -> Result<bool, RankedIndexError>;

    async fn invalidate(&self, game_id: GameId) -> Result<(), RankedIndexError>;
}
