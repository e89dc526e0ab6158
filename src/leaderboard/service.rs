use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::LeaderboardConfig;

use super::directory::{GameDirectory, ModeratorAssignments, UserDirectory};
use super::error::LeaderboardError;
use super::moderation::ModerationAuthority;
use super::ranked::{InMemoryRankedIndex, SharedRankedIndex};
use super::storage::{InMemoryLeaderboardStore, ScoreStorage, SeaOrmLeaderboardStore};
use super::types::{
    ApprovalOutcome, CacheSync, GameId, GameModerator, LeaderboardEntry, NewScore, Page,
    RankedEntry, ReviewDecision, Score, ScoreId, ScoreReview, ScoreSubmission, StatusFilter,
    UserId,
};
use super::validation::{
    ensure_date_range, ensure_exceeds_best, normalize_description, resolve_limit, resolve_page,
    resolve_title,
};

const LOG_TARGET: &str = "leaderboard::service";

/// Public contract of the leaderboard engine, wrapped by any transport.
#[async_trait]
pub trait LeaderboardService: Send + Sync {
    async fn submit_score(&self, submission: ScoreSubmission) -> Result<Score, LeaderboardError>;

    async fn approve_score(
        &self,
        score_id: ScoreId,
        moderator_id: UserId,
    ) -> Result<ApprovalOutcome, LeaderboardError>;

    async fn reject_score(
        &self,
        score_id: ScoreId,
        moderator_id: UserId,
        reason: Option<String>,
    ) -> Result<Score, LeaderboardError>;

    async fn leaderboard(
        &self,
        game_id: GameId,
        limit: Option<u64>,
    ) -> Result<Vec<LeaderboardEntry>, LeaderboardError>;

    /// `Ok(None)` when the index is present but does not hold the user.
    async fn rank(&self, game_id: GameId, user_id: UserId)
        -> Result<Option<u64>, LeaderboardError>;

    async fn top_players_across_games(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<u64>,
    ) -> Result<Vec<LeaderboardEntry>, LeaderboardError>;

    async fn score(&self, score_id: ScoreId) -> Result<Score, LeaderboardError>;

    async fn recent_scores(
        &self,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError>;

    async fn scores_by_user(
        &self,
        user_id: UserId,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError>;

    async fn all_scores_by_user(
        &self,
        user_id: UserId,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError>;

    async fn pending_scores_for_game(
        &self,
        game_id: GameId,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError>;

    /// Same as [`Self::pending_scores_for_game`] after checking `moderator_id`
    /// may moderate the game.
    async fn pending_scores_for_game_as(
        &self,
        moderator_id: UserId,
        game_id: GameId,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError>;

    async fn pending_scores_for_moderator(
        &self,
        moderator_id: UserId,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError>;

    async fn assign_moderator(
        &self,
        admin_id: UserId,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<GameModerator, LeaderboardError>;

    async fn remove_moderator(
        &self,
        admin_id: UserId,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<(), LeaderboardError>;

    async fn list_moderators(&self, game_id: GameId)
        -> Result<Vec<GameModerator>, LeaderboardError>;

    async fn games_moderated_by(
        &self,
        user_id: UserId,
    ) -> Result<Vec<GameModerator>, LeaderboardError>;

    async fn can_moderate(&self, game_id: GameId, user_id: UserId)
        -> Result<bool, LeaderboardError>;

    async fn invalidate_leaderboard(&self, game_id: GameId) -> Result<(), LeaderboardError>;
}

/// The collaborators the engine is wired against.
#[derive(Clone)]
pub struct LeaderboardBackend {
    pub scores: Arc<dyn ScoreStorage>,
    pub users: Arc<dyn UserDirectory>,
    pub games: Arc<dyn GameDirectory>,
    pub moderators: Arc<dyn ModeratorAssignments>,
}

impl LeaderboardBackend {
    /// Wires every collaborator to one store implementing all of them.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ScoreStorage + UserDirectory + GameDirectory + ModeratorAssignments + 'static,
    {
        Self {
            scores: store.clone(),
            users: store.clone(),
            games: store.clone(),
            moderators: store,
        }
    }
}

/// What a read found in the ranked index before serving from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IndexState {
    Present,
    Rebuilt,
}

pub struct LeaderboardEngine {
    scores: Arc<dyn ScoreStorage>,
    users: Arc<dyn UserDirectory>,
    games: Arc<dyn GameDirectory>,
    authority: ModerationAuthority,
    index: SharedRankedIndex,
    rebuild_locks: DashMap<GameId, Arc<Mutex<()>>>,
    config: LeaderboardConfig,
}

impl LeaderboardEngine {
    pub fn new(
        backend: LeaderboardBackend,
        index: SharedRankedIndex,
        config: LeaderboardConfig,
    ) -> Self {
        Self {
            scores: backend.scores,
            users: backend.users,
            games: backend.games,
            authority: ModerationAuthority::new(backend.moderators),
            index,
            rebuild_locks: DashMap::new(),
            config,
        }
    }

    pub fn from_sea_orm(connection: DatabaseConnection, config: LeaderboardConfig) -> Self {
        let store = Arc::new(SeaOrmLeaderboardStore::new(connection));
        let index = Arc::new(InMemoryRankedIndex::new()) as SharedRankedIndex;
        Self::new(LeaderboardBackend::from_store(store), index, config)
    }

    pub fn in_memory(store: Arc<InMemoryLeaderboardStore>, config: LeaderboardConfig) -> Self {
        let index = Arc::new(InMemoryRankedIndex::new()) as SharedRankedIndex;
        Self::new(LeaderboardBackend::from_store(store), index, config)
    }

    fn page(&self, limit: Option<u64>, offset: Option<u64>) -> Result<Page, LeaderboardError> {
        resolve_page(
            limit,
            offset,
            self.config.default_page_size,
            self.config.max_page_size,
        )
    }

    fn leaderboard_limit(&self, limit: Option<u64>) -> Result<u64, LeaderboardError> {
        resolve_limit(
            limit,
            self.config.default_leaderboard_limit,
            self.config.max_leaderboard_limit,
        )
    }

    async fn ensure_user(&self, user_id: UserId, what: &'static str) -> Result<(), LeaderboardError> {
        if !self.users.user_exists(user_id).await? {
            return Err(LeaderboardError::NotFound(what));
        }
        Ok(())
    }

    async fn load_score(&self, score_id: ScoreId) -> Result<Score, LeaderboardError> {
        self.scores
            .load_score(score_id)
            .await?
            .ok_or(LeaderboardError::NotFound("score"))
    }

    /// Shared preconditions of approve and reject: the score exists and is
    /// pending, the moderator exists and may review it.
    async fn prepare_review(
        &self,
        score_id: ScoreId,
        moderator_id: UserId,
    ) -> Result<Score, LeaderboardError> {
        let score = self.load_score(score_id).await?;
        self.ensure_user(moderator_id, "moderator").await?;
        if !score.status.is_pending() {
            return Err(LeaderboardError::invalid_state(format!(
                "score {score_id} is already {}",
                score.status
            )));
        }
        self.authority.ensure_can_review(&score, moderator_id).await?;
        Ok(score)
    }

    /// Writes the review in its own transaction; the store re-checks the
    /// pending status at write time.
    async fn commit_review(&self, review: ScoreReview) -> Result<Score, LeaderboardError> {
        let mut txn = self.scores.begin().await?;
        match txn.record_review(review).await {
            Ok(reviewed) => {
                txn.commit().await?;
                Ok(reviewed)
            }
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }

    async fn index_is_populated(&self, game_id: GameId) -> Result<bool, LeaderboardError> {
        Ok(self.index.exists(game_id).await? && self.index.cardinality(game_id).await? > 0)
    }

    /// Cache-aside entry point for reads: serves the present index or rebuilds
    /// it in full from approved scores. Fails with `NotFound` when the game has
    /// no approved score at all.
    async fn ensure_index(&self, game_id: GameId) -> Result<IndexState, LeaderboardError> {
        if self.index_is_populated(game_id).await? {
            debug!(target: LOG_TARGET, game_id, "ranked index hit");
            return Ok(IndexState::Present);
        }
        debug!(target: LOG_TARGET, game_id, "ranked index miss");

        let lock = if self.config.single_flight_rebuild {
            Some(self.rebuild_lock(game_id))
        } else {
            None
        };
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        // Another reader may have rebuilt while this one waited.
        if self.index_is_populated(game_id).await? {
            return Ok(IndexState::Present);
        }
        self.rebuild_index(game_id).await?;
        Ok(IndexState::Rebuilt)
    }

    fn rebuild_lock(&self, game_id: GameId) -> Arc<Mutex<()>> {
        self.rebuild_locks
            .entry(game_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn rebuild_index(&self, game_id: GameId) -> Result<(), LeaderboardError> {
        let entries = self.scores.best_approved_by_user(game_id).await?;
        if entries.is_empty() {
            return Err(LeaderboardError::NotFound("approved scores for game"));
        }
        let count = entries.len();
        self.index.bulk_load(game_id, entries).await?;
        info!(target: LOG_TARGET, game_id, count, "rebuilt ranked index");
        Ok(())
    }

    /// Recomputes the user's best approved value from the durable store and
    /// writes it to the index. An absent index is rebuilt in full rather than
    /// seeded with a single member.
    async fn sync_index_after_approval(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<(), LeaderboardError> {
        let best = self
            .scores
            .best_approved_for(game_id, user_id)
            .await?
            .ok_or(LeaderboardError::NotFound("approved score"))?;
        if self.index.upsert_if_present(game_id, user_id, best).await? {
            return Ok(());
        }
        match self.ensure_index(game_id).await? {
            IndexState::Rebuilt => Ok(()),
            // Rebuilt by a concurrent reader from a payload that may predate
            // this approval.
            IndexState::Present => {
                self.index.upsert_if_present(game_id, user_id, best).await?;
                Ok(())
            }
        }
    }

    async fn resolve_names(
        &self,
        entries: Vec<RankedEntry>,
    ) -> Result<Vec<LeaderboardEntry>, LeaderboardError> {
        let ids: Vec<UserId> = entries.iter().map(|e| e.user_id).collect();
        let names: HashMap<UserId, String> = self.users.usernames(&ids).await?;
        Ok(entries
            .into_iter()
            .map(|entry| LeaderboardEntry {
                user_id: entry.user_id,
                user_name: names.get(&entry.user_id).cloned(),
                score: entry.value,
            })
            .collect())
    }
}

#[async_trait]
impl LeaderboardService for LeaderboardEngine {
    async fn submit_score(&self, submission: ScoreSubmission) -> Result<Score, LeaderboardError> {
        let game = self
            .games
            .game_by_id(submission.game_id)
            .await?
            .ok_or(LeaderboardError::NotFound("game"))?;
        self.ensure_user(submission.user_id, "user").await?;

        let new_score = NewScore {
            user_id: submission.user_id,
            game_id: submission.game_id,
            value: submission.value,
            title: resolve_title(submission.title, &game.name, submission.value),
            description: normalize_description(submission.description),
        };

        let mut txn = self.scores.begin().await?;
        let result = async {
            let best = txn
                .best_approved_for(new_score.game_id, new_score.user_id)
                .await?;
            ensure_exceeds_best(new_score.value, best)?;
            txn.insert_score(new_score).await
        }
        .await;

        match result {
            Ok(score) => {
                txn.commit().await?;
                info!(
                    target: LOG_TARGET,
                    score_id = score.id,
                    user_id = score.user_id,
                    game_id = score.game_id,
                    value = score.value,
                    "score submitted for review"
                );
                Ok(score)
            }
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }

    async fn approve_score(
        &self,
        score_id: ScoreId,
        moderator_id: UserId,
    ) -> Result<ApprovalOutcome, LeaderboardError> {
        self.prepare_review(score_id, moderator_id).await?;
        let approved = self
            .commit_review(ScoreReview {
                score_id,
                reviewer_id: moderator_id,
                reviewed_at: Utc::now(),
                decision: ReviewDecision::Approve,
            })
            .await?;
        info!(
            target: LOG_TARGET,
            score_id,
            moderator_id,
            game_id = approved.game_id,
            user_id = approved.user_id,
            value = approved.value,
            "score approved"
        );

        // The approval is committed; an index failure from here on degrades
        // the outcome instead of failing it.
        let cache = match self
            .sync_index_after_approval(approved.game_id, approved.user_id)
            .await
        {
            Ok(()) => CacheSync::Synced,
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    score_id,
                    game_id = approved.game_id,
                    error = %err,
                    "approval committed but ranked index sync failed"
                );
                CacheSync::Degraded {
                    reason: err.to_string(),
                }
            }
        };

        Ok(ApprovalOutcome {
            score: approved,
            cache,
        })
    }

    async fn reject_score(
        &self,
        score_id: ScoreId,
        moderator_id: UserId,
        reason: Option<String>,
    ) -> Result<Score, LeaderboardError> {
        self.prepare_review(score_id, moderator_id).await?;
        let reason = normalize_description(reason);
        let rejected = self
            .commit_review(ScoreReview {
                score_id,
                reviewer_id: moderator_id,
                reviewed_at: Utc::now(),
                decision: ReviewDecision::Reject { reason },
            })
            .await?;
        info!(
            target: LOG_TARGET,
            score_id,
            moderator_id,
            game_id = rejected.game_id,
            "score rejected"
        );
        Ok(rejected)
    }

    async fn leaderboard(
        &self,
        game_id: GameId,
        limit: Option<u64>,
    ) -> Result<Vec<LeaderboardEntry>, LeaderboardError> {
        let limit = self.leaderboard_limit(limit)?;
        self.ensure_index(game_id).await?;
        let mut top = self.index.top(game_id, limit as usize).await?;
        if top.is_empty() {
            // Invalidated between the check and the read.
            debug!(target: LOG_TARGET, game_id, "ranked index vanished before read");
            self.ensure_index(game_id).await?;
            top = self.index.top(game_id, limit as usize).await?;
        }
        self.resolve_names(top).await
    }

    async fn rank(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<Option<u64>, LeaderboardError> {
        let mut state = self.ensure_index(game_id).await?;
        let mut rank = self.index.rank_of(game_id, user_id).await?;
        if rank.is_none() && !self.index.exists(game_id).await? {
            debug!(target: LOG_TARGET, game_id, "ranked index vanished before read");
            state = self.ensure_index(game_id).await?;
            rank = self.index.rank_of(game_id, user_id).await?;
        }
        match rank {
            Some(rank) => Ok(Some(rank)),
            // A freshly rebuilt index is complete, so absence means the user
            // has no approved score in this game.
            None if state == IndexState::Rebuilt => {
                Err(LeaderboardError::NotFound("approved score for user in game"))
            }
            None => Ok(None),
        }
    }

    async fn top_players_across_games(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<u64>,
    ) -> Result<Vec<LeaderboardEntry>, LeaderboardError> {
        ensure_date_range(start, end)?;
        let limit = self.leaderboard_limit(limit)?;
        let scores = self.scores.top_approved_between(start, end, limit).await?;
        let entries = scores
            .into_iter()
            .map(|score| RankedEntry::new(score.user_id, score.value))
            .collect();
        self.resolve_names(entries).await
    }

    async fn score(&self, score_id: ScoreId) -> Result<Score, LeaderboardError> {
        self.load_score(score_id).await
    }

    async fn recent_scores(
        &self,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let page = self.page(limit, offset)?;
        self.scores.recent_approved(page).await
    }

    async fn scores_by_user(
        &self,
        user_id: UserId,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let page = self.page(limit, offset)?;
        self.ensure_user(user_id, "user").await?;
        self.scores
            .scores_by_user(user_id, StatusFilter::ApprovedOnly, page)
            .await
    }

    async fn all_scores_by_user(
        &self,
        user_id: UserId,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let page = self.page(limit, offset)?;
        self.ensure_user(user_id, "user").await?;
        self.scores
            .scores_by_user(user_id, StatusFilter::Any, page)
            .await
    }

    async fn pending_scores_for_game(
        &self,
        game_id: GameId,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let page = self.page(limit, offset)?;
        self.scores.pending_for_game(game_id, page).await
    }

    async fn pending_scores_for_game_as(
        &self,
        moderator_id: UserId,
        game_id: GameId,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError> {
        self.authority
            .ensure_can_moderate(game_id, moderator_id)
            .await?;
        self.pending_scores_for_game(game_id, limit, offset).await
    }

    async fn pending_scores_for_moderator(
        &self,
        moderator_id: UserId,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let page = self.page(limit, offset)?;
        // Each source is read from the start; the page applies to the union.
        let window = Page::new(page.offset.saturating_add(page.limit), 0);
        let mut pending = Vec::new();
        for assignment in self.authority.games_moderated_by(moderator_id).await? {
            pending.extend(
                self.scores
                    .pending_for_game(assignment.game_id, window)
                    .await?,
            );
        }
        if self.authority.is_global_moderator(moderator_id).await? {
            pending.extend(self.scores.pending_for_unmoderated_games(window).await?);
        }

        pending.sort_by_key(|s| (s.submitted_at, s.id));
        pending.dedup_by_key(|s| s.id);
        Ok(pending
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn assign_moderator(
        &self,
        admin_id: UserId,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<GameModerator, LeaderboardError> {
        self.games
            .game_by_id(game_id)
            .await?
            .ok_or(LeaderboardError::NotFound("game"))?;
        self.ensure_user(user_id, "user").await?;
        self.authority.assign(admin_id, game_id, user_id).await
    }

    async fn remove_moderator(
        &self,
        admin_id: UserId,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<(), LeaderboardError> {
        self.authority.remove(admin_id, game_id, user_id).await
    }

    async fn list_moderators(
        &self,
        game_id: GameId,
    ) -> Result<Vec<GameModerator>, LeaderboardError> {
        self.games
            .game_by_id(game_id)
            .await?
            .ok_or(LeaderboardError::NotFound("game"))?;
        self.authority.moderators_of(game_id).await
    }

    async fn games_moderated_by(
        &self,
        user_id: UserId,
    ) -> Result<Vec<GameModerator>, LeaderboardError> {
        self.authority.games_moderated_by(user_id).await
    }

    async fn can_moderate(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<bool, LeaderboardError> {
        self.authority.can_moderate(game_id, user_id).await
    }

    async fn invalidate_leaderboard(&self, game_id: GameId) -> Result<(), LeaderboardError> {
        self.index.invalidate(game_id).await?;
        debug!(target: LOG_TARGET, game_id, "ranked index invalidated");
        Ok(())
    }
}
