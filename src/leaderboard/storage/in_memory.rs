use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::leaderboard::directory::{GameDirectory, ModeratorAssignments, UserDirectory};
use crate::leaderboard::error::LeaderboardError;
use crate::leaderboard::types::{
    Game, GameId, GameModerator, NewScore, Page, RankedEntry, Role, Score, ScoreId, ScoreReview,
    ScoreStatus, ScoreValue, StatusFilter, User, UserId,
};

use super::{ScoreStorage, ScoreStorageTxn};

struct Inner {
    users: HashMap<UserId, User>,
    user_roles: HashSet<(UserId, Role)>,
    games: HashMap<GameId, Game>,
    moderators: Vec<GameModerator>,
    // Keyed by id, so iteration follows insertion order.
    scores: BTreeMap<ScoreId, Score>,
    next_user_id: UserId,
    next_game_id: GameId,
    next_score_id: ScoreId,
    last_submitted_at: Option<DateTime<Utc>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            users: HashMap::new(),
            user_roles: HashSet::new(),
            games: HashMap::new(),
            moderators: Vec::new(),
            scores: BTreeMap::new(),
            next_user_id: 1,
            next_game_id: 1,
            next_score_id: 1,
            last_submitted_at: None,
        }
    }
}

impl Inner {
    fn next_score_id(&mut self) -> ScoreId {
        let id = self.next_score_id;
        self.next_score_id += 1;
        id
    }

    /// Wall-clock time, nudged forward so insertion order and submission
    /// order never disagree.
    fn next_submitted_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let at = match self.last_submitted_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_submitted_at = Some(at);
        at
    }

    fn best_approved_for(&self, game_id: GameId, user_id: UserId) -> Option<ScoreValue> {
        self.scores
            .values()
            .filter(|s| {
                s.game_id == game_id && s.user_id == user_id && s.status == ScoreStatus::Approved
            })
            .map(|s| s.value)
            .max()
    }

    fn has_assignments(&self, game_id: GameId) -> bool {
        self.moderators.iter().any(|m| m.game_id == game_id)
    }
}

/// Process-local durable store, also serving as user/game directory and
/// moderator assignment store. Used by tests and the demo server.
#[derive(Clone, Default)]
pub struct InMemoryLeaderboardStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryLeaderboardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, username: impl Into<String>, roles: &[Role]) -> User {
        let mut inner = self.inner.write();
        let id = inner.next_user_id;
        inner.next_user_id += 1;
        let user = User {
            id,
            username: username.into(),
        };
        inner.users.insert(id, user.clone());
        for role in roles {
            inner.user_roles.insert((id, *role));
        }
        user
    }

    pub fn rename_user(&self, id: UserId, username: impl Into<String>) -> bool {
        match self.inner.write().users.get_mut(&id) {
            Some(user) => {
                user.username = username.into();
                true
            }
            None => false,
        }
    }

    pub fn insert_game(&self, name: impl Into<String>) -> Game {
        let mut inner = self.inner.write();
        let id = inner.next_game_id;
        inner.next_game_id += 1;
        let game = Game {
            id,
            name: name.into(),
            description: None,
        };
        inner.games.insert(id, game.clone());
        game
    }

    pub fn score_count(&self) -> usize {
        self.inner.read().scores.len()
    }
}

fn paginate<T>(items: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    items
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

fn oldest_first(scores: &mut [Score]) {
    scores.sort_by_key(|s| (s.submitted_at, s.id));
}

fn newest_first(scores: &mut [Score]) {
    scores.sort_by_key(|s| Reverse((s.submitted_at, s.id)));
}

#[async_trait]
impl ScoreStorage for InMemoryLeaderboardStore {
    async fn begin(&self) -> Result<Box<dyn ScoreStorageTxn>, LeaderboardError> {
        Ok(Box::new(InMemoryScoreTxn {
            inner: Arc::clone(&self.inner),
            inserted: Vec::new(),
            reviews: Vec::new(),
        }))
    }

    async fn load_score(&self, id: ScoreId) -> Result<Option<Score>, LeaderboardError> {
        Ok(self.inner.read().scores.get(&id).cloned())
    }

    async fn best_approved_by_user(
        &self,
        game_id: GameId,
    ) -> Result<Vec<RankedEntry>, LeaderboardError> {
        let inner = self.inner.read();
        let mut best: BTreeMap<UserId, ScoreValue> = BTreeMap::new();
        for score in inner
            .scores
            .values()
            .filter(|s| s.game_id == game_id && s.status == ScoreStatus::Approved)
        {
            best.entry(score.user_id)
                .and_modify(|v| *v = (*v).max(score.value))
                .or_insert(score.value);
        }
        Ok(best
            .into_iter()
            .map(|(user_id, value)| RankedEntry::new(user_id, value))
            .collect())
    }

    async fn best_approved_for(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<Option<ScoreValue>, LeaderboardError> {
        Ok(self.inner.read().best_approved_for(game_id, user_id))
    }

    async fn top_approved_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let inner = self.inner.read();
        let mut scores: Vec<Score> = inner
            .scores
            .values()
            .filter(|s| {
                s.status == ScoreStatus::Approved && s.submitted_at >= start && s.submitted_at <= end
            })
            .cloned()
            .collect();
        scores.sort_by_key(|s| (Reverse(s.value), s.submitted_at, s.id));
        scores.truncate(limit as usize);
        Ok(scores)
    }

    async fn scores_by_user(
        &self,
        user_id: UserId,
        filter: StatusFilter,
        page: Page,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let inner = self.inner.read();
        let mut scores: Vec<Score> = inner
            .scores
            .values()
            .filter(|s| s.user_id == user_id && filter.admits(s.status))
            .cloned()
            .collect();
        newest_first(&mut scores);
        Ok(paginate(scores.into_iter(), page))
    }

    async fn recent_approved(&self, page: Page) -> Result<Vec<Score>, LeaderboardError> {
        let inner = self.inner.read();
        let mut scores: Vec<Score> = inner
            .scores
            .values()
            .filter(|s| s.status == ScoreStatus::Approved)
            .cloned()
            .collect();
        newest_first(&mut scores);
        Ok(paginate(scores.into_iter(), page))
    }

    async fn pending_for_game(
        &self,
        game_id: GameId,
        page: Page,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let inner = self.inner.read();
        let mut scores: Vec<Score> = inner
            .scores
            .values()
            .filter(|s| s.game_id == game_id && s.status.is_pending())
            .cloned()
            .collect();
        oldest_first(&mut scores);
        Ok(paginate(scores.into_iter(), page))
    }

    async fn pending_for_unmoderated_games(
        &self,
        page: Page,
    ) -> Result<Vec<Score>, LeaderboardError> {
        let inner = self.inner.read();
        let mut scores: Vec<Score> = inner
            .scores
            .values()
            .filter(|s| s.status.is_pending() && !inner.has_assignments(s.game_id))
            .cloned()
            .collect();
        oldest_first(&mut scores);
        Ok(paginate(scores.into_iter(), page))
    }
}

/// Buffers writes until commit. Reviews are re-validated against the shared
/// state under the write lock, so a concurrent reviewer that committed first
/// makes this commit fail with `InvalidState`.
pub struct InMemoryScoreTxn {
    inner: Arc<RwLock<Inner>>,
    inserted: Vec<Score>,
    reviews: Vec<ScoreReview>,
}

impl InMemoryScoreTxn {
    fn current(&self, id: ScoreId) -> Option<Score> {
        if let Some(score) = self.inserted.iter().rev().find(|s| s.id == id) {
            return Some(score.clone());
        }
        self.inner.read().scores.get(&id).cloned()
    }
}

#[async_trait]
impl ScoreStorageTxn for InMemoryScoreTxn {
    async fn best_approved_for(
        &mut self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<Option<ScoreValue>, LeaderboardError> {
        Ok(self.inner.read().best_approved_for(game_id, user_id))
    }

    async fn insert_score(&mut self, score: NewScore) -> Result<Score, LeaderboardError> {
        let (id, submitted_at) = {
            let mut inner = self.inner.write();
            (inner.next_score_id(), inner.next_submitted_at())
        };
        let stored = Score {
            id,
            user_id: score.user_id,
            game_id: score.game_id,
            value: score.value,
            submitted_at,
            title: score.title,
            description: score.description,
            status: ScoreStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
        };
        self.inserted.push(stored.clone());
        Ok(stored)
    }

    async fn record_review(&mut self, review: ScoreReview) -> Result<Score, LeaderboardError> {
        if self.reviews.iter().any(|r| r.score_id == review.score_id) {
            return Err(LeaderboardError::invalid_state(
                "score already reviewed in this transaction",
            ));
        }
        let current = self
            .current(review.score_id)
            .ok_or(LeaderboardError::NotFound("score"))?;
        let reviewed = current.reviewed(&review)?;
        self.reviews.push(review);
        Ok(reviewed)
    }

    async fn commit(self: Box<Self>) -> Result<(), LeaderboardError> {
        let this = *self;
        let mut inner = this.inner.write();

        for review in &this.reviews {
            let pending_here = this.inserted.iter().any(|s| s.id == review.score_id);
            let pending_there = inner
                .scores
                .get(&review.score_id)
                .map(|s| s.status.is_pending())
                .unwrap_or(false);
            if !pending_here && !pending_there {
                return Err(LeaderboardError::invalid_state(
                    "score is no longer pending",
                ));
            }
        }

        for score in this.inserted {
            inner.scores.insert(score.id, score);
        }
        for review in &this.reviews {
            if let Some(score) = inner.scores.remove(&review.score_id) {
                let reviewed = score.reviewed(review)?;
                inner.scores.insert(reviewed.id, reviewed);
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) {}
}

#[async_trait]
impl UserDirectory for InMemoryLeaderboardStore {
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, LeaderboardError> {
        Ok(self.inner.read().users.get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, LeaderboardError> {
        Ok(self
            .inner
            .read()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn usernames(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, LeaderboardError> {
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.users.get(id).map(|u| (*id, u.username.clone())))
            .collect())
    }
}

#[async_trait]
impl GameDirectory for InMemoryLeaderboardStore {
    async fn game_by_id(&self, id: GameId) -> Result<Option<Game>, LeaderboardError> {
        Ok(self.inner.read().games.get(&id).cloned())
    }
}

#[async_trait]
impl ModeratorAssignments for InMemoryLeaderboardStore {
    async fn list_moderators(
        &self,
        game_id: GameId,
    ) -> Result<Vec<GameModerator>, LeaderboardError> {
        Ok(self
            .inner
            .read()
            .moderators
            .iter()
            .filter(|m| m.game_id == game_id)
            .cloned()
            .collect())
    }

    async fn games_moderated_by(
        &self,
        user_id: UserId,
    ) -> Result<Vec<GameModerator>, LeaderboardError> {
        Ok(self
            .inner
            .read()
            .moderators
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn is_assigned(&self, game_id: GameId, user_id: UserId) -> Result<bool, LeaderboardError> {
        Ok(self
            .inner
            .read()
            .moderators
            .iter()
            .any(|m| m.game_id == game_id && m.user_id == user_id))
    }

    async fn has_assignments(&self, game_id: GameId) -> Result<bool, LeaderboardError> {
        Ok(self.inner.read().has_assignments(game_id))
    }

    async fn user_has_role(&self, user_id: UserId, role: Role) -> Result<bool, LeaderboardError> {
        Ok(self.inner.read().user_roles.contains(&(user_id, role)))
    }

    async fn insert_assignment(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<GameModerator, LeaderboardError> {
        let mut inner = self.inner.write();
        if inner
            .moderators
            .iter()
            .any(|m| m.game_id == game_id && m.user_id == user_id)
        {
            return Err(LeaderboardError::invalid_state(
                "user is already a moderator for this game",
            ));
        }
        let assignment = GameModerator {
            game_id,
            user_id,
            assigned_at: Utc::now(),
        };
        inner.moderators.push(assignment.clone());
        Ok(assignment)
    }

    async fn delete_assignment(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<bool, LeaderboardError> {
        let mut inner = self.inner.write();
        let before = inner.moderators.len();
        inner
            .moderators
            .retain(|m| !(m.game_id == game_id && m.user_id == user_id));
        Ok(inner.moderators.len() != before)
    }
}
