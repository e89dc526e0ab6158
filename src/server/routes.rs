use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Path, Query};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};

use crate::leaderboard::{
    GameId, GameModerator, LeaderboardEntry, LeaderboardService, Score, ScoreId, UserId,
};

use super::dto::{
    ApprovalResponse, CanModerateResponse, LimitQuery, PageQuery, RankResponse,
    RejectScoreRequest, SubmitScoreRequest, SubmitScoreResponse, TopPlayersQuery,
};
use super::error::ApiError;
use super::logging::log_requests;

/// Header carrying the acting user's id. Authentication happens upstream.
pub const PRINCIPAL_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct ServerContext {
    pub service: Arc<dyn LeaderboardService>,
}

/// The acting user of a request.
#[derive(Debug, Clone, Copy)]
pub struct Principal(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .ok_or_else(|| ApiError::unauthorized(format!("missing {PRINCIPAL_HEADER} header")))?;
        raw.to_str()
            .ok()
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .map(Principal)
            .ok_or_else(|| ApiError::unauthorized(format!("invalid {PRINCIPAL_HEADER} header")))
    }
}

pub struct LeaderboardServer {
    router: Router,
}

impl LeaderboardServer {
    pub fn new(service: Arc<dyn LeaderboardService>) -> Self {
        let context = Arc::new(ServerContext { service });

        let router = Router::new()
            .route("/scores", post(submit_score))
            .route("/scores/recent", get(recent_scores))
            .route("/scores/:score_id", get(get_score))
            .route("/users/:user_id/scores", get(user_scores))
            .route("/users/:user_id/scores/all", get(all_user_scores))
            .route("/leaderboard/top", get(top_players))
            .route("/leaderboard/:game_id", get(game_leaderboard))
            .route("/leaderboard/:game_id/rank/:user_id", get(user_rank))
            .route("/moderation/pending", get(moderator_pending))
            .route("/moderation/scores/:score_id/approve", post(approve_score))
            .route("/moderation/scores/:score_id/reject", post(reject_score))
            .route("/moderation/games/:game_id/pending", get(game_pending))
            .route("/moderation/games/:game_id/moderators", get(list_moderators))
            .route(
                "/moderation/games/:game_id/moderators/:user_id",
                post(assign_moderator).delete(remove_moderator),
            )
            .route(
                "/moderation/games/:game_id/can-moderate",
                get(can_moderate),
            )
            .layer(Extension(context))
            .layer(middleware::from_fn(log_requests));

        Self { router }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

type Ctx = Extension<Arc<ServerContext>>;

/// POST /scores - Submit a score for review as the principal
async fn submit_score(
    Extension(ctx): Ctx,
    Principal(user_id): Principal,
    Json(request): Json<SubmitScoreRequest>,
) -> Result<(StatusCode, Json<SubmitScoreResponse>), ApiError> {
    let score = ctx
        .service
        .submit_score(request.into_submission(user_id))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitScoreResponse {
            score_id: score.id,
            score,
        }),
    ))
}

async fn get_score(
    Extension(ctx): Ctx,
    Path(score_id): Path<ScoreId>,
) -> Result<Json<Score>, ApiError> {
    Ok(Json(ctx.service.score(score_id).await?))
}

async fn recent_scores(
    Extension(ctx): Ctx,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Score>>, ApiError> {
    let scores = ctx.service.recent_scores(page.limit, page.offset).await?;
    Ok(Json(scores))
}

/// GET /users/:user_id/scores - Approved scores only
async fn user_scores(
    Extension(ctx): Ctx,
    Path(user_id): Path<UserId>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Score>>, ApiError> {
    let scores = ctx
        .service
        .scores_by_user(user_id, page.limit, page.offset)
        .await?;
    Ok(Json(scores))
}

/// GET /users/:user_id/scores/all - Every status, visible to the owner only
async fn all_user_scores(
    Extension(ctx): Ctx,
    Principal(principal): Principal,
    Path(user_id): Path<UserId>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Score>>, ApiError> {
    if principal != user_id {
        return Err(ApiError::forbidden("scores of other users are not visible"));
    }
    let scores = ctx
        .service
        .all_scores_by_user(user_id, page.limit, page.offset)
        .await?;
    Ok(Json(scores))
}

async fn game_leaderboard(
    Extension(ctx): Ctx,
    Path(game_id): Path<GameId>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    Ok(Json(ctx.service.leaderboard(game_id, query.limit).await?))
}

async fn user_rank(
    Extension(ctx): Ctx,
    Path((game_id, user_id)): Path<(GameId, UserId)>,
) -> Result<Json<RankResponse>, ApiError> {
    let rank = ctx.service.rank(game_id, user_id).await?;
    Ok(Json(RankResponse {
        game_id,
        user_id,
        rank,
    }))
}

async fn top_players(
    Extension(ctx): Ctx,
    Query(query): Query<TopPlayersQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let entries = ctx
        .service
        .top_players_across_games(query.start, query.end, query.limit)
        .await?;
    Ok(Json(entries))
}

async fn approve_score(
    Extension(ctx): Ctx,
    Principal(moderator_id): Principal,
    Path(score_id): Path<ScoreId>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let outcome = ctx.service.approve_score(score_id, moderator_id).await?;
    Ok(Json(outcome.into()))
}

/// POST /moderation/scores/:score_id/reject - Body with a reason is optional
async fn reject_score(
    Extension(ctx): Ctx,
    Principal(moderator_id): Principal,
    Path(score_id): Path<ScoreId>,
    body: Option<Json<RejectScoreRequest>>,
) -> Result<Json<Score>, ApiError> {
    let reason = body.and_then(|Json(request)| request.reason);
    let score = ctx
        .service
        .reject_score(score_id, moderator_id, reason)
        .await?;
    Ok(Json(score))
}

async fn game_pending(
    Extension(ctx): Ctx,
    Principal(moderator_id): Principal,
    Path(game_id): Path<GameId>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Score>>, ApiError> {
    let scores = ctx
        .service
        .pending_scores_for_game_as(moderator_id, game_id, page.limit, page.offset)
        .await?;
    Ok(Json(scores))
}

/// GET /moderation/pending - Everything the principal may review
async fn moderator_pending(
    Extension(ctx): Ctx,
    Principal(moderator_id): Principal,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Score>>, ApiError> {
    let scores = ctx
        .service
        .pending_scores_for_moderator(moderator_id, page.limit, page.offset)
        .await?;
    Ok(Json(scores))
}

async fn list_moderators(
    Extension(ctx): Ctx,
    Path(game_id): Path<GameId>,
) -> Result<Json<Vec<GameModerator>>, ApiError> {
    Ok(Json(ctx.service.list_moderators(game_id).await?))
}

async fn assign_moderator(
    Extension(ctx): Ctx,
    Principal(admin_id): Principal,
    Path((game_id, user_id)): Path<(GameId, UserId)>,
) -> Result<(StatusCode, Json<GameModerator>), ApiError> {
    let assignment = ctx
        .service
        .assign_moderator(admin_id, game_id, user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

async fn remove_moderator(
    Extension(ctx): Ctx,
    Principal(admin_id): Principal,
    Path((game_id, user_id)): Path<(GameId, UserId)>,
) -> Result<StatusCode, ApiError> {
    ctx.service
        .remove_moderator(admin_id, game_id, user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn can_moderate(
    Extension(ctx): Ctx,
    Principal(user_id): Principal,
    Path(game_id): Path<GameId>,
) -> Result<Json<CanModerateResponse>, ApiError> {
    let can_moderate = ctx.service.can_moderate(game_id, user_id).await?;
    Ok(Json(CanModerateResponse {
        game_id,
        user_id,
        can_moderate,
    }))
}
