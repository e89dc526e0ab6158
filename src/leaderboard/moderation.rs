use std::sync::Arc;

use tracing::info;

use super::directory::ModeratorAssignments;
use super::error::LeaderboardError;
use super::types::{GameId, GameModerator, Role, Score, UserId};

const LOG_TARGET: &str = "leaderboard::moderation";

/// The per-game moderation rule. Explicit assignments close the game to
/// global moderators, even if every assignee is inactive.
pub fn may_moderate(assigned: bool, game_has_assignments: bool, global_moderator: bool) -> bool {
    assigned || (!game_has_assignments && global_moderator)
}

/// Decides who may review scores of a game and who may manage assignments.
#[derive(Clone)]
pub struct ModerationAuthority {
    assignments: Arc<dyn ModeratorAssignments>,
}

impl ModerationAuthority {
    pub fn new(assignments: Arc<dyn ModeratorAssignments>) -> Self {
        Self { assignments }
    }

    pub async fn can_moderate(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<bool, LeaderboardError> {
        let assigned = self.assignments.is_assigned(game_id, user_id).await?;
        let game_has_assignments = self.assignments.has_assignments(game_id).await?;
        let global = self.is_global_moderator(user_id).await?;
        Ok(may_moderate(assigned, game_has_assignments, global))
    }

    pub async fn ensure_can_moderate(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<(), LeaderboardError> {
        if !self.can_moderate(game_id, user_id).await? {
            return Err(LeaderboardError::forbidden(
                "not authorized to moderate scores for this game",
            ));
        }
        Ok(())
    }

    /// Self-review is refused before the moderation rule is consulted.
    pub async fn ensure_can_review(
        &self,
        score: &Score,
        moderator_id: UserId,
    ) -> Result<(), LeaderboardError> {
        if score.user_id == moderator_id {
            return Err(LeaderboardError::forbidden(
                "moderators cannot review their own scores",
            ));
        }
        self.ensure_can_moderate(score.game_id, moderator_id).await
    }

    pub async fn is_global_moderator(&self, user_id: UserId) -> Result<bool, LeaderboardError> {
        self.assignments.user_has_role(user_id, Role::Moderator).await
    }

    pub async fn ensure_admin(&self, user_id: UserId) -> Result<(), LeaderboardError> {
        if !self.assignments.user_has_role(user_id, Role::Admin).await? {
            return Err(LeaderboardError::forbidden(
                "only admins can manage game moderators",
            ));
        }
        Ok(())
    }

    pub async fn assign(
        &self,
        admin_id: UserId,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<GameModerator, LeaderboardError> {
        self.ensure_admin(admin_id).await?;
        let assignment = self.assignments.insert_assignment(game_id, user_id).await?;
        info!(
            target: LOG_TARGET,
            admin_id, game_id, user_id, "assigned game moderator"
        );
        Ok(assignment)
    }

    pub async fn remove(
        &self,
        admin_id: UserId,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<(), LeaderboardError> {
        self.ensure_admin(admin_id).await?;
        if !self.assignments.delete_assignment(game_id, user_id).await? {
            return Err(LeaderboardError::NotFound("moderator assignment"));
        }
        info!(
            target: LOG_TARGET,
            admin_id, game_id, user_id, "removed game moderator"
        );
        Ok(())
    }

    pub async fn moderators_of(&self, game_id: GameId) -> Result<Vec<GameModerator>, LeaderboardError> {
        self.assignments.list_moderators(game_id).await
    }

    pub async fn games_moderated_by(
        &self,
        user_id: UserId,
    ) -> Result<Vec<GameModerator>, LeaderboardError> {
        self.assignments.games_moderated_by(user_id).await
    }
}
