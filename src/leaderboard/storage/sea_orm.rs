use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Query;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set, SqlErr, TransactionTrait,
};

use crate::db::entity::sea_orm_active_enums::ScoreStatus as DbScoreStatus;
use crate::db::entity::{game_moderators, games, roles, scores, user_roles, users};
use crate::leaderboard::directory::{GameDirectory, ModeratorAssignments, UserDirectory};
use crate::leaderboard::error::LeaderboardError;
use crate::leaderboard::types::{
    Game, GameId, GameModerator, NewScore, Page, RankedEntry, Role, Score, ScoreId, ScoreReview,
    ScoreValue, StatusFilter, User, UserId,
};

use super::{ScoreStorage, ScoreStorageTxn};

/// Postgres (or SQLite) backed store for scores, users, games and moderator
/// assignments.
#[derive(Clone)]
pub struct SeaOrmLeaderboardStore {
    connection: DatabaseConnection,
}

impl SeaOrmLeaderboardStore {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }
}

pub struct SeaOrmScoreTxn {
    txn: DatabaseTransaction,
}

impl From<scores::Model> for Score {
    fn from(model: scores::Model) -> Self {
        Score {
            id: model.id,
            user_id: model.user_id,
            game_id: model.game_id,
            value: model.value,
            submitted_at: model.submitted_at,
            title: model.title,
            description: model.description,
            status: model.status.into(),
            reviewed_by: model.reviewed_by,
            reviewed_at: model.reviewed_at,
            rejection_reason: model.rejection_reason,
        }
    }
}

impl From<game_moderators::Model> for GameModerator {
    fn from(model: game_moderators::Model) -> Self {
        GameModerator {
            game_id: model.game_id,
            user_id: model.user_id,
            assigned_at: model.assigned_at,
        }
    }
}

fn approved_best_query(game_id: GameId) -> Select<scores::Entity> {
    scores::Entity::find()
        .filter(scores::Column::GameId.eq(game_id))
        .filter(scores::Column::Status.eq(DbScoreStatus::Approved))
}

fn page_oldest_first(select: Select<scores::Entity>, page: Page) -> Select<scores::Entity> {
    select
        .order_by_asc(scores::Column::SubmittedAt)
        .order_by_asc(scores::Column::Id)
        .offset(page.offset)
        .limit(page.limit)
}

fn page_newest_first(select: Select<scores::Entity>, page: Page) -> Select<scores::Entity> {
    select
        .order_by_desc(scores::Column::SubmittedAt)
        .order_by_desc(scores::Column::Id)
        .offset(page.offset)
        .limit(page.limit)
}

fn into_scores(models: Vec<scores::Model>) -> Vec<Score> {
    models.into_iter().map(Score::from).collect()
}

#[async_trait]
impl ScoreStorage for SeaOrmLeaderboardStore {
    async fn begin(&self) -> Result<Box<dyn ScoreStorageTxn>, LeaderboardError> {
        let txn = self.connection.begin().await?;
        Ok(Box::new(SeaOrmScoreTxn { txn }))
    }

    async fn load_score(&self, id: ScoreId) -> Result<Option<Score>, LeaderboardError> {
        let record = scores::Entity::find_by_id(id).one(&self.connection).await?;
        Ok(record.map(Score::from))
    }

    async fn best_approved_by_user(
        &self,
        game_id: GameId,
    ) -> Result<Vec<RankedEntry>, LeaderboardError> {
        let rows: Vec<(UserId, ScoreValue)> = approved_best_query(game_id)
            .select_only()
            .column(scores::Column::UserId)
            .column_as(scores::Column::Value.max(), "best")
            .group_by(scores::Column::UserId)
            .into_tuple()
            .all(&self.connection)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, value)| RankedEntry::new(user_id, value))
            .collect())
    }

    async fn best_approved_for(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<Option<ScoreValue>, LeaderboardError> {
        let best = approved_best_query(game_id)
            .filter(scores::Column::UserId.eq(user_id))
            .order_by_desc(scores::Column::Value)
            .one(&self.connection)
            .await?;
        Ok(best.map(|model| model.value))
    }

    async fn top_approved_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let models = scores::Entity::find()
            .filter(scores::Column::Status.eq(DbScoreStatus::Approved))
            .filter(scores::Column::SubmittedAt.between(start, end))
            .order_by_desc(scores::Column::Value)
            .order_by_asc(scores::Column::SubmittedAt)
            .order_by_asc(scores::Column::Id)
            .limit(limit)
            .all(&self.connection)
            .await?;
        Ok(into_scores(models))
    }

    async fn scores_by_user(
        &self,
        user_id: UserId,
        filter: StatusFilter,
        page: Page,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let mut select = scores::Entity::find().filter(scores::Column::UserId.eq(user_id));
        if filter == StatusFilter::ApprovedOnly {
            select = select.filter(scores::Column::Status.eq(DbScoreStatus::Approved));
        }
        let models = page_newest_first(select, page)
            .all(&self.connection)
            .await?;
        Ok(into_scores(models))
    }

    async fn recent_approved(&self, page: Page) -> Result<Vec<Score>, LeaderboardError> {
        let select =
            scores::Entity::find().filter(scores::Column::Status.eq(DbScoreStatus::Approved));
        let models = page_newest_first(select, page)
            .all(&self.connection)
            .await?;
        Ok(into_scores(models))
    }

    async fn pending_for_game(
        &self,
        game_id: GameId,
        page: Page,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let select = scores::Entity::find()
            .filter(scores::Column::GameId.eq(game_id))
            .filter(scores::Column::Status.eq(DbScoreStatus::Pending));
        let models = page_oldest_first(select, page)
            .all(&self.connection)
            .await?;
        Ok(into_scores(models))
    }

    async fn pending_for_unmoderated_games(
        &self,
        page: Page,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let moderated_games = Query::select()
            .column(game_moderators::Column::GameId)
            .from(game_moderators::Entity)
            .to_owned();
        let select = scores::Entity::find()
            .filter(scores::Column::Status.eq(DbScoreStatus::Pending))
            .filter(scores::Column::GameId.not_in_subquery(moderated_games));
        let models = page_oldest_first(select, page)
            .all(&self.connection)
            .await?;
        Ok(into_scores(models))
    }
}

#[async_trait]
impl ScoreStorageTxn for SeaOrmScoreTxn {
    async fn best_approved_for(
        &mut self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<Option<ScoreValue>, LeaderboardError> {
        let best = approved_best_query(game_id)
            .filter(scores::Column::UserId.eq(user_id))
            .order_by_desc(scores::Column::Value)
            .one(&self.txn)
            .await?;
        Ok(best.map(|model| model.value))
    }

    async fn insert_score(&mut self, score: NewScore) -> Result<Score, LeaderboardError> {
        let model = scores::ActiveModel {
            user_id: Set(score.user_id),
            game_id: Set(score.game_id),
            value: Set(score.value),
            submitted_at: Set(Utc::now()),
            title: Set(score.title),
            description: Set(score.description),
            status: Set(DbScoreStatus::Pending),
            reviewed_by: Set(None),
            reviewed_at: Set(None),
            rejection_reason: Set(None),
            ..Default::default()
        };
        let inserted = model.insert(&self.txn).await?;
        Ok(inserted.into())
    }

    async fn record_review(&mut self, review: ScoreReview) -> Result<Score, LeaderboardError> {
        let current: Score = scores::Entity::find_by_id(review.score_id)
            .one(&self.txn)
            .await?
            .ok_or(LeaderboardError::NotFound("score"))?
            .into();
        let reviewed = current.reviewed(&review)?;

        // Conditional on the row still being pending, so a reviewer that
        // committed in between turns this update into a no-op.
        let changes = scores::ActiveModel {
            status: Set(reviewed.status.into()),
            reviewed_by: Set(reviewed.reviewed_by),
            reviewed_at: Set(reviewed.reviewed_at),
            rejection_reason: Set(reviewed.rejection_reason.clone()),
            ..Default::default()
        };
        let result = scores::Entity::update_many()
            .set(changes)
            .filter(scores::Column::Id.eq(review.score_id))
            .filter(scores::Column::Status.eq(DbScoreStatus::Pending))
            .exec(&self.txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(LeaderboardError::invalid_state(
                "score is no longer pending",
            ));
        }
        Ok(reviewed)
    }

    async fn commit(self: Box<Self>) -> Result<(), LeaderboardError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        let _ = self.txn.rollback().await;
    }
}

#[async_trait]
impl UserDirectory for SeaOrmLeaderboardStore {
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, LeaderboardError> {
        let record = users::Entity::find_by_id(id).one(&self.connection).await?;
        Ok(record.map(|model| User {
            id: model.id,
            username: model.username,
        }))
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, LeaderboardError> {
        let record = users::Entity::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.connection)
            .await?;
        Ok(record.map(|model| User {
            id: model.id,
            username: model.username,
        }))
    }

    async fn usernames(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, LeaderboardError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let records = users::Entity::find()
            .filter(users::Column::Id.is_in(ids.iter().copied()))
            .all(&self.connection)
            .await?;
        Ok(records
            .into_iter()
            .map(|model| (model.id, model.username))
            .collect())
    }
}

#[async_trait]
impl GameDirectory for SeaOrmLeaderboardStore {
    async fn game_by_id(&self, id: GameId) -> Result<Option<Game>, LeaderboardError> {
        let record = games::Entity::find_by_id(id).one(&self.connection).await?;
        Ok(record.map(|model| Game {
            id: model.id,
            name: model.name,
            description: model.description,
        }))
    }
}

#[async_trait]
impl ModeratorAssignments for SeaOrmLeaderboardStore {
    async fn list_moderators(
        &self,
        game_id: GameId,
    ) -> Result<Vec<GameModerator>, LeaderboardError> {
        let records = game_moderators::Entity::find()
            .filter(game_moderators::Column::GameId.eq(game_id))
            .order_by_asc(game_moderators::Column::AssignedAt)
            .all(&self.connection)
            .await?;
        Ok(records.into_iter().map(GameModerator::from).collect())
    }

    async fn games_moderated_by(
        &self,
        user_id: UserId,
    ) -> Result<Vec<GameModerator>, LeaderboardError> {
        let records = game_moderators::Entity::find()
            .filter(game_moderators::Column::UserId.eq(user_id))
            .order_by_asc(game_moderators::Column::GameId)
            .all(&self.connection)
            .await?;
        Ok(records.into_iter().map(GameModerator::from).collect())
    }

    async fn is_assigned(&self, game_id: GameId, user_id: UserId) -> Result<bool, LeaderboardError> {
        let count = game_moderators::Entity::find()
            .filter(game_moderators::Column::GameId.eq(game_id))
            .filter(game_moderators::Column::UserId.eq(user_id))
            .count(&self.connection)
            .await?;
        Ok(count > 0)
    }

    async fn has_assignments(&self, game_id: GameId) -> Result<bool, LeaderboardError> {
        let count = game_moderators::Entity::find()
            .filter(game_moderators::Column::GameId.eq(game_id))
            .count(&self.connection)
            .await?;
        Ok(count > 0)
    }

    async fn user_has_role(&self, user_id: UserId, role: Role) -> Result<bool, LeaderboardError> {
        let count = user_roles::Entity::find()
            .inner_join(roles::Entity)
            .filter(user_roles::Column::UserId.eq(user_id))
            .filter(roles::Column::Name.eq(role.as_str()))
            .count(&self.connection)
            .await?;
        Ok(count > 0)
    }

    async fn insert_assignment(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<GameModerator, LeaderboardError> {
        if self.is_assigned(game_id, user_id).await? {
            return Err(LeaderboardError::invalid_state(
                "user is already a moderator for this game",
            ));
        }
        let model = game_moderators::ActiveModel {
            game_id: Set(game_id),
            user_id: Set(user_id),
            assigned_at: Set(Utc::now()),
            ..Default::default()
        };
        match model.insert(&self.connection).await {
            Ok(inserted) => Ok(inserted.into()),
            Err(err) => match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => Err(
                    LeaderboardError::invalid_state("user is already a moderator for this game"),
                ),
                _ => Err(err.into()),
            },
        }
    }

    async fn delete_assignment(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<bool, LeaderboardError> {
        let result = game_moderators::Entity::delete_many()
            .filter(game_moderators::Column::GameId.eq(game_id))
            .filter(game_moderators::Column::UserId.eq(user_id))
            .exec(&self.connection)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
