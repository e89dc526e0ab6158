use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use crate::leaderboard::types::{GameId, RankedEntry, ScoreValue, UserId};

use super::{RankedIndex, RankedIndexError, RankedSet};

const LOG_TARGET: &str = "leaderboard::ranked::in_memory";

/// Process-local ranked index, one [`RankedSet`] per game.
#[derive(Default)]
pub struct InMemoryRankedIndex {
    games: DashMap<GameId, RankedSet>,
}

impl InMemoryRankedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, game_id: GameId) -> Option<Vec<RankedEntry>> {
        self.games.get(&game_id).map(|set| set.entries())
    }
}

#[async_trait]
impl RankedIndex for InMemoryRankedIndex {
    async fn upsert(
        &self,
        game_id: GameId,
        user_id: UserId,
        value: ScoreValue,
    ) -> Result<(), RankedIndexError> {
        self.games
            .entry(game_id)
            .or_default()
            .upsert(user_id, value);
        trace!(target: LOG_TARGET, game_id, user_id, value, "upserted ranked entry");
        Ok(())
    }

    async fn upsert_if_present(
        &self,
        game_id: GameId,
        user_id: UserId,
        value: ScoreValue,
    ) -> Result<bool, RankedIndexError> {
        match self.games.get_mut(&game_id) {
            Some(mut set) => {
                set.upsert(user_id, value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn bulk_load(
        &self,
        game_id: GameId,
        entries: Vec<RankedEntry>,
    ) -> Result<(), RankedIndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        let count = entries.len();
        let mut set = self.games.entry(game_id).or_default();
        let mut changed = 0usize;
        for entry in entries {
            if set.raise(entry.user_id, entry.value) {
                changed += 1;
            }
        }
        trace!(target: LOG_TARGET, game_id, count, changed, "bulk loaded ranked entries");
        Ok(())
    }

    async fn rank_of(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<Option<u64>, RankedIndexError> {
        Ok(self
            .games
            .get(&game_id)
            .and_then(|set| set.rank_of(user_id)))
    }

    async fn top(&self, game_id: GameId, k: usize) -> Result<Vec<RankedEntry>, RankedIndexError> {
        Ok(self
            .games
            .get(&game_id)
            .map(|set| set.top(k))
            .unwrap_or_default())
    }

    async fn cardinality(&self, game_id: GameId) -> Result<usize, RankedIndexError> {
        Ok(self.games.get(&game_id).map(|set| set.len()).unwrap_or(0))
    }

    async fn exists(&self, game_id: GameId) -> Result<bool, RankedIndexError> {
        Ok(self.games.contains_key(&game_id))
    }

    async fn invalidate(&self, game_id: GameId) -> Result<(), RankedIndexError> {
        self.games.remove(&game_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn games_are_namespaced() {
        let index = InMemoryRankedIndex::new();
        index.upsert(1, 10, 500).await.unwrap();
        index.upsert(2, 10, 20).await.unwrap();
        assert_eq!(index.top(1, 5).await.unwrap(), vec![RankedEntry::new(10, 500)]);
        assert_eq!(index.top(2, 5).await.unwrap(), vec![RankedEntry::new(10, 20)]);
        assert_eq!(index.cardinality(3).await.unwrap(), 0);
        assert!(!index.exists(3).await.unwrap());
    }

    #[tokio::test]
    async fn conditional_upsert_never_creates_an_entry() {
        let index = InMemoryRankedIndex::new();
        assert!(!index.upsert_if_present(4, 1, 10).await.unwrap());
        assert!(!index.exists(4).await.unwrap());
        index.bulk_load(4, vec![RankedEntry::new(2, 30)]).await.unwrap();
        assert!(index.upsert_if_present(4, 1, 10).await.unwrap());
        assert_eq!(index.rank_of(4, 1).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn bulk_load_merges_and_is_idempotent() {
        let index = InMemoryRankedIndex::new();
        index.upsert(5, 99, 1).await.unwrap();
        let payload = vec![RankedEntry::new(1, 10), RankedEntry::new(2, 30)];
        index.bulk_load(5, payload.clone()).await.unwrap();
        index.bulk_load(5, payload).await.unwrap();
        assert_eq!(index.cardinality(5).await.unwrap(), 3);
        assert_eq!(index.rank_of(5, 99).await.unwrap(), Some(3));

        index.bulk_load(5, Vec::new()).await.unwrap();
        assert_eq!(index.cardinality(5).await.unwrap(), 3);
        assert!(index.bulk_load(6, Vec::new()).await.is_ok());
        assert!(!index.exists(6).await.unwrap());
    }

    #[tokio::test]
    async fn stale_bulk_load_keeps_newer_values() {
        let index = InMemoryRankedIndex::new();
        index
            .bulk_load(7, vec![RankedEntry::new(1, 10), RankedEntry::new(2, 99)])
            .await
            .unwrap();
        // A payload read before user 2 was approved and before user 1 improved.
        index.bulk_load(7, vec![RankedEntry::new(1, 5)]).await.unwrap();
        assert_eq!(
            index.top(7, 10).await.unwrap(),
            vec![RankedEntry::new(2, 99), RankedEntry::new(1, 10)]
        );

        index.invalidate(7).await.unwrap();
        index.bulk_load(7, vec![RankedEntry::new(1, 5)]).await.unwrap();
        assert_eq!(index.top(7, 10).await.unwrap(), vec![RankedEntry::new(1, 5)]);
    }
}
