//! Collaborators the engine consumes but does not own: the user and game
//! directories and the moderator assignment store.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::LeaderboardError;
use super::types::{Game, GameId, GameModerator, Role, User, UserId};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, LeaderboardError>;

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, LeaderboardError>;

    async fn user_exists(&self, id: UserId) -> Result<bool, LeaderboardError> {
        Ok(self.user_by_id(id).await?.is_some())
    }

    /// Display names for `ids`; unknown ids are absent from the result.
    async fn usernames(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, LeaderboardError>;
}

#[async_trait]
pub trait GameDirectory: Send + Sync {
    async fn game_by_id(&self, id: GameId) -> Result<Option<Game>, LeaderboardError>;
}

#[async_trait]
pub trait ModeratorAssignments: Send + Sync {
    async fn list_moderators(&self, game_id: GameId)
        -> Result<Vec<GameModerator>, LeaderboardError>;

    async fn games_moderated_by(
        &self,
        user_id: UserId,
    ) -> Result<Vec<GameModerator>, LeaderboardError>;

    async fn is_assigned(&self, game_id: GameId, user_id: UserId)
        -> Result<bool, LeaderboardError>;

    async fn has_assignments(&self, game_id: GameId) -> Result<bool, LeaderboardError>;

    async fn user_has_role(&self, user_id: UserId, role: Role) -> Result<bool, LeaderboardError>;

    /// Fails with `InvalidState` when the pair is already assigned.
    async fn insert_assignment(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<GameModerator, LeaderboardError>;

    /// Returns whether an assignment was removed.
    async fn delete_assignment(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<bool, LeaderboardError>;
}
