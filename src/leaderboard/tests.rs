use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, EntityTrait, QueryFilter, Set,
};
use tokio::sync::Notify;

use super::ranked::{InMemoryRankedIndex, RankedIndex, RankedIndexError, SharedRankedIndex};
use super::service::{LeaderboardBackend, LeaderboardEngine, LeaderboardService};
use super::storage::{InMemoryLeaderboardStore, SeaOrmLeaderboardStore};
use super::types::{
    CacheSync, Game, GameId, RankedEntry, Role, ScoreId, ScoreStatus, ScoreSubmission,
    ScoreValue, User, UserId,
};
use super::directory::UserDirectory;
use super::LeaderboardError;
use crate::config::LeaderboardConfig;
use crate::db::entity::{games, roles, user_roles, users};
use crate::db::schema::create_schema;

/// Index whose writes can be switched off to simulate an unreachable cache.
#[derive(Default)]
struct FlakyIndex {
    inner: InMemoryRankedIndex,
    fail_writes: AtomicBool,
}

impl FlakyIndex {
    fn check(&self) -> Result<(), RankedIndexError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RankedIndexError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RankedIndex for FlakyIndex {
    async fn upsert(
        &self,
        game_id: GameId,
        user_id: UserId,
        value: ScoreValue,
    ) -> Result<(), RankedIndexError> {
        self.check()?;
        self.inner.upsert(game_id, user_id, value).await
    }

    async fn upsert_if_present(
        &self,
        game_id: GameId,
        user_id: UserId,
        value: ScoreValue,
    ) -> Result<bool, RankedIndexError> {
        self.check()?;
        self.inner.upsert_if_present(game_id, user_id, value).await
    }

    async fn bulk_load(
        &self,
        game_id: GameId,
        entries: Vec<RankedEntry>,
    ) -> Result<(), RankedIndexError> {
        self.check()?;
        self.inner.bulk_load(game_id, entries).await
    }

    async fn rank_of(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<Option<u64>, RankedIndexError> {
        self.inner.rank_of(game_id, user_id).await
    }

    async fn top(&self, game_id: GameId, k: usize) -> Result<Vec<RankedEntry>, RankedIndexError> {
        self.inner.top(game_id, k).await
    }

    async fn cardinality(&self, game_id: GameId) -> Result<usize, RankedIndexError> {
        self.inner.cardinality(game_id).await
    }

    async fn exists(&self, game_id: GameId) -> Result<bool, RankedIndexError> {
        self.inner.exists(game_id).await
    }

    async fn invalidate(&self, game_id: GameId) -> Result<(), RankedIndexError> {
        self.inner.invalidate(game_id).await
    }
}

/// Index that can park the next `bulk_load` until released, or drop a game's
/// entry right before the next read.
#[derive(Default)]
struct GatedIndex {
    inner: InMemoryRankedIndex,
    gate_next_load: AtomicBool,
    loading: Notify,
    release: Notify,
    drop_before_next_read: AtomicBool,
}

impl GatedIndex {
    async fn maybe_drop(&self, game_id: GameId) -> Result<(), RankedIndexError> {
        if self.drop_before_next_read.swap(false, Ordering::SeqCst) {
            self.inner.invalidate(game_id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RankedIndex for GatedIndex {
    async fn upsert(
        &self,
        game_id: GameId,
        user_id: UserId,
        value: ScoreValue,
    ) -> Result<(), RankedIndexError> {
        self.inner.upsert(game_id, user_id, value).await
    }

    async fn upsert_if_present(
        &self,
        game_id: GameId,
        user_id: UserId,
        value: ScoreValue,
    ) -> Result<bool, RankedIndexError> {
        self.inner.upsert_if_present(game_id, user_id, value).await
    }

    async fn bulk_load(
        &self,
        game_id: GameId,
        entries: Vec<RankedEntry>,
    ) -> Result<(), RankedIndexError> {
        if self.gate_next_load.swap(false, Ordering::SeqCst) {
            self.loading.notify_one();
            self.release.notified().await;
        }
        self.inner.bulk_load(game_id, entries).await
    }

    async fn rank_of(
        &self,
        game_id: GameId,
        user_id: UserId,
    ) -> Result<Option<u64>, RankedIndexError> {
        self.maybe_drop(game_id).await?;
        self.inner.rank_of(game_id, user_id).await
    }

    async fn top(&self, game_id: GameId, k: usize) -> Result<Vec<RankedEntry>, RankedIndexError> {
        self.maybe_drop(game_id).await?;
        self.inner.top(game_id, k).await
    }

    async fn cardinality(&self, game_id: GameId) -> Result<usize, RankedIndexError> {
        self.inner.cardinality(game_id).await
    }

    async fn exists(&self, game_id: GameId) -> Result<bool, RankedIndexError> {
        self.inner.exists(game_id).await
    }

    async fn invalidate(&self, game_id: GameId) -> Result<(), RankedIndexError> {
        self.inner.invalidate(game_id).await
    }
}

fn gated_engine(
    store: &Arc<InMemoryLeaderboardStore>,
    index: &Arc<GatedIndex>,
    single_flight_rebuild: bool,
) -> Arc<LeaderboardEngine> {
    let config = LeaderboardConfig {
        single_flight_rebuild,
        ..LeaderboardConfig::default()
    };
    Arc::new(LeaderboardEngine::new(
        LeaderboardBackend::from_store(store.clone()),
        index.clone() as SharedRankedIndex,
        config,
    ))
}

struct Fixture {
    store: Arc<InMemoryLeaderboardStore>,
    index: Arc<InMemoryRankedIndex>,
    engine: Arc<LeaderboardEngine>,
    admin: User,
    global: User,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(InMemoryLeaderboardStore::new());
        let index = Arc::new(InMemoryRankedIndex::new());
        let engine = Arc::new(LeaderboardEngine::new(
            LeaderboardBackend::from_store(store.clone()),
            index.clone() as SharedRankedIndex,
            LeaderboardConfig::default(),
        ));
        let admin = store.insert_user("admin", &[Role::Admin]);
        let global = store.insert_user("global-mod", &[Role::Moderator]);
        Self {
            store,
            index,
            engine,
            admin,
            global,
        }
    }

    fn player(&self, name: &str) -> User {
        self.store.insert_user(name, &[])
    }

    fn game(&self, name: &str) -> Game {
        self.store.insert_game(name)
    }

    async fn submit(&self, user: &User, game: &Game, value: ScoreValue) -> Result<ScoreId> {
        let score = self
            .engine
            .submit_score(submission(user.id, game.id, value))
            .await?;
        Ok(score.id)
    }

    async fn submit_approved(&self, user: &User, game: &Game, value: ScoreValue) -> Result<()> {
        let id = self.submit(user, game, value).await?;
        self.engine.approve_score(id, self.global.id).await?;
        Ok(())
    }
}

fn submission(user_id: UserId, game_id: GameId, value: ScoreValue) -> ScoreSubmission {
    ScoreSubmission {
        user_id,
        game_id,
        value,
        title: None,
        description: None,
    }
}

fn pairs(entries: &[super::types::LeaderboardEntry]) -> Vec<(UserId, ScoreValue)> {
    entries.iter().map(|e| (e.user_id, e.score)).collect()
}

#[tokio::test]
async fn submission_defaults_title_and_starts_pending() -> Result<()> {
    let fx = Fixture::new();
    let alice = fx.player("alice");
    let game = fx.game("Tetris");

    let mut request = submission(alice.id, game.id, 1200);
    request.description = Some("  first try  ".into());
    let score = fx.engine.submit_score(request).await?;

    assert_eq!(score.status, ScoreStatus::Pending);
    assert_eq!(score.title, "Tetris - 1200");
    assert_eq!(score.description.as_deref(), Some("first try"));
    assert_eq!(score.reviewed_by, None);
    Ok(())
}

#[tokio::test]
async fn submission_requires_known_user_and_game() -> Result<()> {
    let fx = Fixture::new();
    let alice = fx.player("alice");
    let game = fx.game("Tetris");

    let missing_game = fx.engine.submit_score(submission(alice.id, 999, 10)).await;
    assert!(matches!(missing_game, Err(LeaderboardError::NotFound("game"))));
    let missing_user = fx.engine.submit_score(submission(999, game.id, 10)).await;
    assert!(matches!(missing_user, Err(LeaderboardError::NotFound("user"))));
    assert_eq!(fx.store.score_count(), 0);
    Ok(())
}

#[tokio::test]
async fn submissions_must_beat_best_approved_score() -> Result<()> {
    let fx = Fixture::new();
    let alice = fx.player("alice");
    let game = fx.game("Tetris");

    fx.submit_approved(&alice, &game, 100).await?;
    for value in [50, 100] {
        let result = fx.engine.submit_score(submission(alice.id, game.id, value)).await;
        assert!(matches!(result, Err(LeaderboardError::Validation(_))));
    }
    let accepted = fx
        .engine
        .submit_score(submission(alice.id, game.id, 101))
        .await?;
    assert_eq!(accepted.status, ScoreStatus::Pending);

    // Pending and rejected scores do not raise the bar.
    fx.engine.submit_score(submission(alice.id, game.id, 102)).await?;
    Ok(())
}

#[tokio::test]
async fn reviews_only_leave_pending() -> Result<()> {
    let fx = Fixture::new();
    let alice = fx.player("alice");
    let game = fx.game("Tetris");

    let first = fx.submit(&alice, &game, 10).await?;
    fx.engine.approve_score(first, fx.global.id).await?;
    assert!(matches!(
        fx.engine.approve_score(first, fx.global.id).await,
        Err(LeaderboardError::InvalidState(_))
    ));
    assert!(matches!(
        fx.engine.reject_score(first, fx.global.id, None).await,
        Err(LeaderboardError::InvalidState(_))
    ));

    let second = fx.submit(&alice, &game, 20).await?;
    let rejected = fx
        .engine
        .reject_score(second, fx.global.id, Some("video cuts out".into()))
        .await?;
    assert_eq!(rejected.status, ScoreStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("video cuts out"));
    assert_eq!(rejected.reviewed_by, Some(fx.global.id));
    assert!(matches!(
        fx.engine.approve_score(second, fx.global.id).await,
        Err(LeaderboardError::InvalidState(_))
    ));
    Ok(())
}

#[tokio::test]
async fn review_requires_known_score_and_moderator() -> Result<()> {
    let fx = Fixture::new();
    let alice = fx.player("alice");
    let game = fx.game("Tetris");
    let id = fx.submit(&alice, &game, 10).await?;

    assert!(matches!(
        fx.engine.approve_score(999, fx.global.id).await,
        Err(LeaderboardError::NotFound("score"))
    ));
    assert!(matches!(
        fx.engine.approve_score(id, 999).await,
        Err(LeaderboardError::NotFound("moderator"))
    ));
    Ok(())
}

#[tokio::test]
async fn moderators_cannot_review_their_own_scores() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    let own = fx.submit(&fx.global, &game, 10).await?;

    assert!(matches!(
        fx.engine.approve_score(own, fx.global.id).await,
        Err(LeaderboardError::Forbidden(_))
    ));
    assert!(matches!(
        fx.engine.reject_score(own, fx.global.id, None).await,
        Err(LeaderboardError::Forbidden(_))
    ));

    // Self-review is refused even with an explicit assignment.
    fx.engine
        .assign_moderator(fx.admin.id, game.id, fx.global.id)
        .await?;
    assert!(matches!(
        fx.engine.approve_score(own, fx.global.id).await,
        Err(LeaderboardError::Forbidden(_))
    ));
    Ok(())
}

#[tokio::test]
async fn players_without_authority_cannot_review() -> Result<()> {
    let fx = Fixture::new();
    let alice = fx.player("alice");
    let bob = fx.player("bob");
    let game = fx.game("Tetris");
    let id = fx.submit(&alice, &game, 10).await?;

    assert!(matches!(
        fx.engine.approve_score(id, bob.id).await,
        Err(LeaderboardError::Forbidden(_))
    ));
    let score = fx.engine.score(id).await?;
    assert_eq!(score.status, ScoreStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn first_approval_scenario_keeps_single_entry_per_user() -> Result<()> {
    let fx = Fixture::new();
    let alice = fx.player("alice");
    let moderator = fx.player("mod");
    let game = fx.game("Galaga");
    fx.engine
        .assign_moderator(fx.admin.id, game.id, moderator.id)
        .await?;

    let first = fx.submit(&alice, &game, 100).await?;
    let outcome = fx.engine.approve_score(first, moderator.id).await?;
    assert_eq!(outcome.cache, CacheSync::Synced);
    assert_eq!(outcome.score.status, ScoreStatus::Approved);

    let board = fx.engine.leaderboard(game.id, Some(10)).await?;
    assert_eq!(pairs(&board), vec![(alice.id, 100)]);
    assert_eq!(board[0].user_name.as_deref(), Some("alice"));
    assert_eq!(fx.engine.rank(game.id, alice.id).await?, Some(1));

    assert!(matches!(
        fx.engine.submit_score(submission(alice.id, game.id, 50)).await,
        Err(LeaderboardError::Validation(_))
    ));

    let second = fx.submit(&alice, &game, 150).await?;
    fx.engine.approve_score(second, moderator.id).await?;
    let board = fx.engine.leaderboard(game.id, Some(10)).await?;
    assert_eq!(pairs(&board), vec![(alice.id, 150)]);
    assert_eq!(fx.engine.rank(game.id, alice.id).await?, Some(1));
    Ok(())
}

#[tokio::test]
async fn assignment_closes_game_to_global_moderators() -> Result<()> {
    let fx = Fixture::new();
    let alice = fx.player("alice");
    let local = fx.player("local-mod");
    let game = fx.game("Pac-Man");

    let first = fx.submit(&alice, &game, 10).await?;
    fx.engine.approve_score(first, fx.global.id).await?;

    fx.engine
        .assign_moderator(fx.admin.id, game.id, local.id)
        .await?;
    let second = fx.submit(&alice, &game, 20).await?;
    assert!(matches!(
        fx.engine.approve_score(second, fx.global.id).await,
        Err(LeaderboardError::Forbidden(_))
    ));
    assert!(!fx.engine.can_moderate(game.id, fx.global.id).await?);
    assert!(fx.engine.can_moderate(game.id, local.id).await?);
    fx.engine.approve_score(second, local.id).await?;
    Ok(())
}

#[tokio::test]
async fn leaderboard_is_descending_and_limited() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    let values = [40, 90, 65, 10, 75];
    let mut users = Vec::new();
    for (i, value) in values.iter().enumerate() {
        let user = fx.player(&format!("p{i}"));
        fx.submit_approved(&user, &game, *value).await?;
        users.push(user);
    }

    let board = fx.engine.leaderboard(game.id, Some(3)).await?;
    assert_eq!(
        board.iter().map(|e| e.score).collect::<Vec<_>>(),
        vec![90, 75, 65]
    );
    let all = fx.engine.leaderboard(game.id, Some(50)).await?;
    assert_eq!(all.len(), values.len());
    assert!(all.windows(2).all(|w| w[0].score >= w[1].score));

    assert!(matches!(
        fx.engine.leaderboard(game.id, Some(0)).await,
        Err(LeaderboardError::Validation(_))
    ));
    Ok(())
}

#[tokio::test]
async fn leaderboard_reads_are_idempotent() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    for (name, value) in [("a", 30), ("b", 30), ("c", 70)] {
        let user = fx.player(name);
        fx.submit_approved(&user, &game, value).await?;
    }
    fx.engine.invalidate_leaderboard(game.id).await?;

    let first = fx.engine.leaderboard(game.id, None).await?;
    assert!(fx.index.exists(game.id).await?);
    let second = fx.engine.leaderboard(game.id, None).await?;
    assert_eq!(pairs(&first), pairs(&second));
    Ok(())
}

#[tokio::test]
async fn rebuild_after_invalidation_matches_previous_index() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    for (name, value) in [("a", 30), ("b", 55), ("c", 70), ("d", 12)] {
        let user = fx.player(name);
        fx.submit_approved(&user, &game, value).await?;
    }
    let before = fx.engine.leaderboard(game.id, Some(100)).await?;

    fx.engine.invalidate_leaderboard(game.id).await?;
    assert!(!fx.index.exists(game.id).await?);

    let after = fx.engine.leaderboard(game.id, Some(100)).await?;
    let mut before = pairs(&before);
    let mut after = pairs(&after);
    before.sort();
    after.sort();
    assert_eq!(before, after);
    Ok(())
}

#[tokio::test]
async fn leaderboard_without_approved_scores_is_not_found() -> Result<()> {
    let fx = Fixture::new();
    let alice = fx.player("alice");
    let game = fx.game("Tetris");
    fx.submit(&alice, &game, 10).await?;

    assert!(matches!(
        fx.engine.leaderboard(game.id, None).await,
        Err(LeaderboardError::NotFound(_))
    ));
    assert!(!fx.index.exists(game.id).await?);
    Ok(())
}

#[tokio::test]
async fn rank_rebuilds_the_whole_game_on_a_cold_index() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    let alice = fx.player("alice");
    let bob = fx.player("bob");
    let carol = fx.player("carol");
    fx.submit_approved(&alice, &game, 10).await?;
    fx.submit_approved(&bob, &game, 30).await?;
    fx.submit_approved(&carol, &game, 30).await?;
    fx.engine.invalidate_leaderboard(game.id).await?;

    assert_eq!(fx.engine.rank(game.id, alice.id).await?, Some(3));
    assert_eq!(fx.index.cardinality(game.id).await?, 3);
    assert_eq!(fx.engine.rank(game.id, bob.id).await?, Some(1));
    assert_eq!(fx.engine.rank(game.id, carol.id).await?, Some(1));
    Ok(())
}

#[tokio::test]
async fn rank_of_user_without_approved_score() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    let alice = fx.player("alice");
    let dave = fx.player("dave");
    fx.submit_approved(&alice, &game, 10).await?;

    // Warm index: the user is simply absent.
    assert_eq!(fx.engine.rank(game.id, dave.id).await?, None);

    fx.engine.invalidate_leaderboard(game.id).await?;
    assert!(matches!(
        fx.engine.rank(game.id, dave.id).await,
        Err(LeaderboardError::NotFound(_))
    ));

    let empty = fx.game("Empty");
    assert!(matches!(
        fx.engine.rank(empty.id, alice.id).await,
        Err(LeaderboardError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn approval_into_cold_index_rebuilds_every_user() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    let alice = fx.player("alice");
    let bob = fx.player("bob");
    fx.submit_approved(&alice, &game, 40).await?;
    fx.engine.invalidate_leaderboard(game.id).await?;

    let id = fx.submit(&bob, &game, 25).await?;
    let outcome = fx.engine.approve_score(id, fx.global.id).await?;
    assert!(outcome.cache.is_synced());

    let mut cached = fx.index.snapshot(game.id).unwrap_or_default();
    cached.sort_by_key(|e| e.user_id);
    assert_eq!(
        cached,
        vec![RankedEntry::new(alice.id, 40), RankedEntry::new(bob.id, 25)]
    );
    Ok(())
}

#[tokio::test]
async fn approval_survives_cache_failure() -> Result<()> {
    let store = Arc::new(InMemoryLeaderboardStore::new());
    let index = Arc::new(FlakyIndex::default());
    let engine = LeaderboardEngine::new(
        LeaderboardBackend::from_store(store.clone()),
        index.clone() as SharedRankedIndex,
        LeaderboardConfig::default(),
    );
    let moderator = store.insert_user("mod", &[Role::Moderator]);
    let alice = store.insert_user("alice", &[]);
    let game = store.insert_game("Tetris");

    let id = engine
        .submit_score(submission(alice.id, game.id, 500))
        .await?
        .id;
    index.fail_writes.store(true, Ordering::SeqCst);
    let outcome = engine.approve_score(id, moderator.id).await?;
    assert!(matches!(outcome.cache, CacheSync::Degraded { .. }));
    assert_eq!(engine.score(id).await?.status, ScoreStatus::Approved);

    // The next read-miss heals the index from the durable store.
    index.fail_writes.store(false, Ordering::SeqCst);
    let board = engine.leaderboard(game.id, None).await?;
    assert_eq!(pairs(&board), vec![(alice.id, 500)]);
    Ok(())
}

#[tokio::test]
async fn concurrent_approvals_commit_once() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    let alice = fx.player("alice");
    let second_mod = fx.store.insert_user("second-mod", &[Role::Moderator]);
    let id = fx.submit(&alice, &game, 70).await?;

    let a = {
        let engine = fx.engine.clone();
        let moderator = fx.global.id;
        tokio::spawn(async move { engine.approve_score(id, moderator).await })
    };
    let b = {
        let engine = fx.engine.clone();
        let moderator = second_mod.id;
        tokio::spawn(async move { engine.approve_score(id, moderator).await })
    };
    let results = [a.await?, b.await?];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(LeaderboardError::InvalidState(_)))));
    Ok(())
}

#[tokio::test]
async fn concurrent_cold_reads_agree() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    for (name, value) in [("a", 5), ("b", 15), ("c", 25)] {
        let user = fx.player(name);
        fx.submit_approved(&user, &game, value).await?;
    }
    fx.engine.invalidate_leaderboard(game.id).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = fx.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.leaderboard(game.id, None).await
        }));
    }
    for handle in handles {
        let board = handle.await??;
        assert_eq!(
            board.iter().map(|e| e.score).collect::<Vec<_>>(),
            vec![25, 15, 5]
        );
    }
    assert_eq!(fx.index.cardinality(game.id).await?, 3);
    Ok(())
}

/// A cold reader reads its payload, then parks inside `bulk_load` while bob's
/// approval commits and syncs the index.
async fn approval_racing_cold_read(single_flight_rebuild: bool) -> Result<()> {
    let store = Arc::new(InMemoryLeaderboardStore::new());
    let index = Arc::new(GatedIndex::default());
    let engine = gated_engine(&store, &index, single_flight_rebuild);
    let moderator = store.insert_user("global-mod", &[Role::Moderator]);
    let alice = store.insert_user("alice", &[]);
    let bob = store.insert_user("bob", &[]);
    let game = store.insert_game("Tetris");

    let first = engine.submit_score(submission(alice.id, game.id, 10)).await?;
    engine.approve_score(first.id, moderator.id).await?;
    let pending = engine.submit_score(submission(bob.id, game.id, 99)).await?;
    engine.invalidate_leaderboard(game.id).await?;
    index.gate_next_load.store(true, Ordering::SeqCst);

    let reader = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.leaderboard(game.id, None).await })
    };
    index.loading.notified().await;

    let approval = {
        let engine = engine.clone();
        let (score_id, moderator_id) = (pending.id, moderator.id);
        tokio::spawn(async move { engine.approve_score(score_id, moderator_id).await })
    };
    let outcome = if single_flight_rebuild {
        // The approval waits on the reader's rebuild lock once committed.
        while engine.score(pending.id).await?.status != ScoreStatus::Approved {
            tokio::task::yield_now().await;
        }
        index.release.notify_one();
        approval.await??
    } else {
        // The approval rebuilds on its own before the stale payload lands.
        let outcome = approval.await??;
        index.release.notify_one();
        outcome
    };
    assert_eq!(outcome.cache, CacheSync::Synced);

    let early = reader.await??;
    assert!(early.iter().any(|e| e.user_id == alice.id));

    let board = engine.leaderboard(game.id, None).await?;
    assert_eq!(pairs(&board), vec![(bob.id, 99), (alice.id, 10)]);
    assert_eq!(engine.rank(game.id, bob.id).await?, Some(1));
    assert_eq!(engine.rank(game.id, alice.id).await?, Some(2));
    Ok(())
}

#[tokio::test]
async fn approval_racing_cold_read_with_single_flight() -> Result<()> {
    approval_racing_cold_read(true).await
}

#[tokio::test]
async fn approval_racing_cold_read_without_single_flight() -> Result<()> {
    approval_racing_cold_read(false).await
}

#[tokio::test]
async fn reads_recover_when_index_is_dropped_mid_read() -> Result<()> {
    let store = Arc::new(InMemoryLeaderboardStore::new());
    let index = Arc::new(GatedIndex::default());
    let engine = gated_engine(&store, &index, true);
    let moderator = store.insert_user("global-mod", &[Role::Moderator]);
    let alice = store.insert_user("alice", &[]);
    let bob = store.insert_user("bob", &[]);
    let game = store.insert_game("Tetris");
    for (user, value) in [(&alice, 40), (&bob, 70)] {
        let score = engine.submit_score(submission(user.id, game.id, value)).await?;
        engine.approve_score(score.id, moderator.id).await?;
    }
    engine.leaderboard(game.id, None).await?;

    index.drop_before_next_read.store(true, Ordering::SeqCst);
    let board = engine.leaderboard(game.id, None).await?;
    assert_eq!(pairs(&board), vec![(bob.id, 70), (alice.id, 40)]);

    index.drop_before_next_read.store(true, Ordering::SeqCst);
    assert_eq!(engine.rank(game.id, alice.id).await?, Some(2));
    Ok(())
}

#[tokio::test]
async fn display_names_follow_renames() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    let alice = fx.player("alice");
    fx.submit_approved(&alice, &game, 10).await?;
    fx.store.rename_user(alice.id, "alice2");

    let board = fx.engine.leaderboard(game.id, None).await?;
    assert_eq!(board[0].user_name.as_deref(), Some("alice2"));
    Ok(())
}

#[tokio::test]
async fn top_players_across_games_keeps_every_approved_row() -> Result<()> {
    let fx = Fixture::new();
    let tetris = fx.game("Tetris");
    let galaga = fx.game("Galaga");
    let alice = fx.player("alice");
    let bob = fx.player("bob");
    fx.submit_approved(&alice, &tetris, 100).await?;
    fx.submit_approved(&alice, &tetris, 300).await?;
    fx.submit_approved(&alice, &galaga, 200).await?;
    fx.submit_approved(&bob, &galaga, 250).await?;
    fx.submit(&bob, &tetris, 999).await?;

    let start = Utc::now() - Duration::hours(1);
    let end = Utc::now() + Duration::hours(1);
    let top = fx
        .engine
        .top_players_across_games(start, end, Some(10))
        .await?;
    assert_eq!(
        pairs(&top),
        vec![
            (alice.id, 300),
            (bob.id, 250),
            (alice.id, 200),
            (alice.id, 100)
        ]
    );

    let limited = fx
        .engine
        .top_players_across_games(start, end, Some(2))
        .await?;
    assert_eq!(limited.len(), 2);

    assert!(matches!(
        fx.engine.top_players_across_games(end, start, None).await,
        Err(LeaderboardError::Validation(_))
    ));
    let future = fx
        .engine
        .top_players_across_games(end, end + Duration::hours(1), None)
        .await?;
    assert!(future.is_empty());
    Ok(())
}

#[tokio::test]
async fn user_score_listings() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    let alice = fx.player("alice");
    fx.submit_approved(&alice, &game, 10).await?;
    fx.submit_approved(&alice, &game, 20).await?;
    let pending = fx.submit(&alice, &game, 30).await?;

    let approved = fx.engine.scores_by_user(alice.id, None, None).await?;
    assert_eq!(
        approved.iter().map(|s| s.value).collect::<Vec<_>>(),
        vec![20, 10]
    );

    let all = fx.engine.all_scores_by_user(alice.id, None, None).await?;
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, pending);

    let paged = fx.engine.all_scores_by_user(alice.id, Some(1), Some(1)).await?;
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].value, 20);

    assert!(matches!(
        fx.engine.scores_by_user(999, None, None).await,
        Err(LeaderboardError::NotFound("user"))
    ));

    let recent = fx.engine.recent_scores(Some(5), None).await?;
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|s| s.status == ScoreStatus::Approved));
    Ok(())
}

#[tokio::test]
async fn pending_queues() -> Result<()> {
    let fx = Fixture::new();
    let open = fx.game("Open");
    let assigned = fx.game("Assigned");
    let alice = fx.player("alice");
    let local = fx.player("local-mod");
    fx.engine
        .assign_moderator(fx.admin.id, assigned.id, local.id)
        .await?;

    let open_first = fx.submit(&alice, &open, 1).await?;
    let assigned_score = fx.submit(&alice, &assigned, 2).await?;
    let open_second = fx.submit(&alice, &open, 3).await?;

    let queue = fx.engine.pending_scores_for_game(open.id, None, None).await?;
    assert_eq!(
        queue.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![open_first, open_second]
    );

    let global_queue = fx
        .engine
        .pending_scores_for_moderator(fx.global.id, None, None)
        .await?;
    assert_eq!(
        global_queue.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![open_first, open_second]
    );
    let local_queue = fx
        .engine
        .pending_scores_for_moderator(local.id, None, None)
        .await?;
    assert_eq!(
        local_queue.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![assigned_score]
    );

    assert!(matches!(
        fx.engine
            .pending_scores_for_game_as(fx.global.id, assigned.id, None, None)
            .await,
        Err(LeaderboardError::Forbidden(_))
    ));
    let as_local = fx
        .engine
        .pending_scores_for_game_as(local.id, assigned.id, None, None)
        .await?;
    assert_eq!(as_local.len(), 1);
    Ok(())
}

#[tokio::test]
async fn moderator_management() -> Result<()> {
    let fx = Fixture::new();
    let game = fx.game("Tetris");
    let local = fx.player("local-mod");

    assert!(matches!(
        fx.engine.assign_moderator(local.id, game.id, local.id).await,
        Err(LeaderboardError::Forbidden(_))
    ));
    assert!(matches!(
        fx.engine.assign_moderator(fx.admin.id, 999, local.id).await,
        Err(LeaderboardError::NotFound("game"))
    ));

    fx.engine
        .assign_moderator(fx.admin.id, game.id, local.id)
        .await?;
    let listed = fx.engine.list_moderators(game.id).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].user_id, local.id);
    assert_eq!(fx.engine.games_moderated_by(local.id).await?.len(), 1);

    fx.engine
        .remove_moderator(fx.admin.id, game.id, local.id)
        .await?;
    assert!(fx.engine.list_moderators(game.id).await?.is_empty());
    assert!(matches!(
        fx.engine.list_moderators(999).await,
        Err(LeaderboardError::NotFound("game"))
    ));
    Ok(())
}

async fn setup_sqlite_engine() -> Result<(LeaderboardEngine, sea_orm::DatabaseConnection)> {
    let mut opts = ConnectOptions::new("sqlite::memory:".to_owned());
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let conn = Database::connect(opts).await?;
    create_schema(&conn).await?;

    let store = Arc::new(SeaOrmLeaderboardStore::new(conn.clone()));
    let engine = LeaderboardEngine::new(
        LeaderboardBackend::from_store(store),
        Arc::new(InMemoryRankedIndex::new()) as SharedRankedIndex,
        LeaderboardConfig::default(),
    );
    Ok((engine, conn))
}

async fn seed_user(
    conn: &sea_orm::DatabaseConnection,
    username: &str,
    role: Option<Role>,
) -> Result<UserId> {
    let user = users::ActiveModel {
        username: Set(username.to_owned()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    if let Some(role) = role {
        let role = roles::Entity::find()
            .filter(roles::Column::Name.eq(role.as_str()))
            .one(conn)
            .await?
            .ok_or_else(|| anyhow::anyhow!("role {} missing", role.as_str()))?;
        user_roles::ActiveModel {
            user_id: Set(user.id),
            role_id: Set(role.id),
        }
        .insert(conn)
        .await?;
    }
    Ok(user.id)
}

async fn seed_game(conn: &sea_orm::DatabaseConnection, name: &str) -> Result<GameId> {
    let game = games::ActiveModel {
        name: Set(name.to_owned()),
        description: Set(None),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(game.id)
}

#[tokio::test]
async fn sea_orm_submission_and_approval_flow() -> Result<()> {
    let (engine, conn) = setup_sqlite_engine().await?;
    let moderator = seed_user(&conn, "mod", Some(Role::Moderator)).await?;
    let alice = seed_user(&conn, "alice", None).await?;
    let bob = seed_user(&conn, "bob", None).await?;
    let game = seed_game(&conn, "Galaga").await?;

    let first = engine.submit_score(submission(alice, game, 100)).await?;
    assert_eq!(first.title, "Galaga - 100");
    engine.approve_score(first.id, moderator).await?;
    let rival = engine.submit_score(submission(bob, game, 120)).await?;
    engine.approve_score(rival.id, moderator).await?;

    assert!(matches!(
        engine.submit_score(submission(alice, game, 90)).await,
        Err(LeaderboardError::Validation(_))
    ));
    let better = engine.submit_score(submission(alice, game, 150)).await?;
    engine.approve_score(better.id, moderator).await?;
    assert!(matches!(
        engine.approve_score(better.id, moderator).await,
        Err(LeaderboardError::InvalidState(_))
    ));

    let board = engine.leaderboard(game, None).await?;
    assert_eq!(pairs(&board), vec![(alice, 150), (bob, 120)]);
    assert_eq!(board[1].user_name.as_deref(), Some("bob"));

    engine.invalidate_leaderboard(game).await?;
    assert_eq!(engine.rank(game, bob).await?, Some(2));
    Ok(())
}

#[tokio::test]
async fn sea_orm_moderation_rules() -> Result<()> {
    let (engine, conn) = setup_sqlite_engine().await?;
    let admin = seed_user(&conn, "admin", Some(Role::Admin)).await?;
    let global = seed_user(&conn, "global", Some(Role::Moderator)).await?;
    let local = seed_user(&conn, "local", None).await?;
    let alice = seed_user(&conn, "alice", None).await?;
    let game = seed_game(&conn, "Pac-Man").await?;

    let first = engine.submit_score(submission(alice, game, 10)).await?;
    engine.approve_score(first.id, global).await?;

    engine.assign_moderator(admin, game, local).await?;
    assert!(matches!(
        engine.assign_moderator(admin, game, local).await,
        Err(LeaderboardError::InvalidState(_))
    ));

    let second = engine.submit_score(submission(alice, game, 20)).await?;
    assert!(matches!(
        engine.approve_score(second.id, global).await,
        Err(LeaderboardError::Forbidden(_))
    ));
    assert!(engine
        .pending_scores_for_moderator(global, None, None)
        .await?
        .is_empty());
    assert_eq!(
        engine
            .pending_scores_for_moderator(local, None, None)
            .await?
            .len(),
        1
    );

    let rejected = engine
        .reject_score(second.id, local, Some("spliced".into()))
        .await?;
    assert_eq!(rejected.status, ScoreStatus::Rejected);
    let stored = engine.score(second.id).await?;
    assert_eq!(stored.rejection_reason.as_deref(), Some("spliced"));
    assert_eq!(stored.reviewed_by, Some(local));
    Ok(())
}

#[tokio::test]
async fn users_are_found_by_username() -> Result<()> {
    let fx = Fixture::new();
    let alice = fx.player("alice");
    assert_eq!(fx.store.user_by_username("alice").await?, Some(alice));
    assert_eq!(fx.store.user_by_username("nobody").await?, None);

    let (_engine, conn) = setup_sqlite_engine().await?;
    let bob = seed_user(&conn, "bob", None).await?;
    let store = SeaOrmLeaderboardStore::new(conn);
    let found = store.user_by_username("bob").await?;
    assert_eq!(found.map(|user| user.id), Some(bob));
    assert!(store.user_by_username("alice").await?.is_none());
    Ok(())
}
