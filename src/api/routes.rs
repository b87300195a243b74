use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::ApiState;
use crate::auth::{MaybeSession, Session};
use crate::comments::CommentNode;
use crate::config::MAX_MARKETS_PER_USER;
use crate::consensus::Consensus;
use crate::db::models::{MarketRow, UserRow};
use crate::error::AppError;
use crate::types::{MarketDetail, MarketSummary, NewMarket, ProbabilityView, VoteTally};

/// JSON surface under `/api`. Same operations as the HTML actions.
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/api/markets", get(list_markets).post(create_market))
        .route("/api/markets/:id", get(get_market).delete(delete_market))
        .route("/api/markets/:id/upvote", post(upvote_market))
        .route("/api/markets/:id/downvote", post(downvote_market))
        .route("/api/markets/:id/comments", post(add_comment))
        .route("/api/markets/:id/probability", get(get_probability))
        .route("/api/markets/:id/prediction", put(assign_probability))
        .route("/api/me", get(get_me))
        .route("/api/me/username", put(set_username))
        .route("/api/auth/magic-link", post(send_magic_link))
        .route("/api/auth/verify", post(verify_magic_link))
        .route("/api/auth/signout", post(sign_out))
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct NewComment {
    pub content: String,
    #[serde(default, alias = "parentId")]
    pub parent_id: Option<String>,
}

#[derive(Deserialize)]
pub struct PredictionBody {
    pub probability: f64,
}

#[derive(Deserialize)]
pub struct UsernameBody {
    pub username: String,
}

#[derive(Deserialize)]
pub struct MagicLinkBody {
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyBody {
    pub token: String,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct MeResponse {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
    pub auth_providers: Vec<String>,
    pub created_at: i64,
    pub markets_created: i64,
    pub markets_remaining: i64,
}

impl MeResponse {
    async fn load(state: &ApiState, user: UserRow, session: &Session) -> Result<Self, AppError> {
        let markets_created = state.store.count_markets_by_author(&user.id).await?;
        Ok(Self {
            id: user.id,
            email: user.email,
            username: user.username,
            auth_providers: session.user.auth_providers.clone(),
            created_at: user.created_at,
            markets_created,
            markets_remaining: (MAX_MARKETS_PER_USER - markets_created).max(0),
        })
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_markets(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
) -> Result<Json<Vec<MarketSummary>>, AppError> {
    Ok(Json(state.actions.list_markets(&session).await?))
}

async fn create_market(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Json(body): Json<NewMarket>,
) -> Result<(StatusCode, Json<MarketRow>), AppError> {
    let market = state.actions.create_market(&session, body).await?;
    Ok((StatusCode::CREATED, Json(market)))
}

async fn get_market(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
) -> Result<Json<MarketDetail>, AppError> {
    Ok(Json(state.actions.get_market_by_id(&session, &market_id).await?))
}

async fn delete_market(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.actions.delete_market(&session, &market_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upvote_market(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
) -> Result<Json<VoteTally>, AppError> {
    Ok(Json(state.actions.upvote_market(&session, &market_id).await?))
}

async fn downvote_market(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
) -> Result<Json<VoteTally>, AppError> {
    Ok(Json(state.actions.downvote_market(&session, &market_id).await?))
}

async fn add_comment(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
    Json(body): Json<NewComment>,
) -> Result<(StatusCode, Json<CommentNode>), AppError> {
    let comment = state
        .actions
        .add_comment(&session, &market_id, &body.content, body.parent_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(comment.into())))
}

async fn get_probability(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
) -> Result<Json<ProbabilityView>, AppError> {
    Ok(Json(state.actions.get_market_probability(&session, &market_id).await?))
}

async fn assign_probability(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
    Json(body): Json<PredictionBody>,
) -> Result<Json<Consensus>, AppError> {
    let consensus = state
        .actions
        .assign_probability(&session, &market_id, body.probability)
        .await?;
    Ok(Json(consensus))
}

async fn get_me(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
) -> Result<Json<MeResponse>, AppError> {
    let user = state.actions.current_user(&session).await?;
    Ok(Json(MeResponse::load(&state, user, &session).await?))
}

async fn set_username(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Json(body): Json<UsernameBody>,
) -> Result<Json<MeResponse>, AppError> {
    let user = state.actions.set_username(&session, &body.username).await?;
    Ok(Json(MeResponse::load(&state, user, &session).await?))
}

async fn send_magic_link(
    State(state): State<ApiState>,
    Json(body): Json<MagicLinkBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    state.sessions.send_magic_link(&body.email).await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "sent": true }))))
}

/// Token exchange for API clients; the returned `sessionKey` is used as a
/// bearer token.
async fn verify_magic_link(
    State(state): State<ApiState>,
    Json(body): Json<VerifyBody>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.sessions.verify_magic_link(&body.token).await?))
}

async fn sign_out(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
) -> Result<StatusCode, AppError> {
    if session.is_authenticated() {
        state.sessions.sign_out(&session.session_key).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
