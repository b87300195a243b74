//! Form posts from the HTML pages. Each runs one action, then redirects with
//! 303 on success or renders an alert page on failure.

use axum::{
    extract::{Path, State},
    response::Redirect,
    Form,
};
use serde::Deserialize;

use crate::actions::{market_path, probability_path, MARKETS_PATH};
use crate::api::ApiState;
use crate::auth::MaybeSession;
use crate::error::AppError;
use crate::presentation::PageError;
use crate::types::NewMarket;

type FormResult = Result<Redirect, PageError>;

#[derive(Deserialize)]
pub struct BackForm {
    #[serde(default)]
    pub back: String,
}

#[derive(Deserialize)]
pub struct CommentForm {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Probability as a percentage, as typed into the page.
#[derive(Deserialize)]
pub struct PredictionForm {
    pub probability: String,
}

#[derive(Deserialize)]
pub struct UsernameForm {
    pub username: String,
    #[serde(default)]
    pub back: String,
}

/// Only same-site absolute paths are followed.
fn local_path(back: &str, fallback: &str) -> String {
    if back.starts_with('/') && !back.starts_with("//") {
        back.to_string()
    } else {
        fallback.to_string()
    }
}

pub async fn create_market(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Form(input): Form<NewMarket>,
) -> FormResult {
    let market = state.actions.create_market(&session, input).await?;
    Ok(Redirect::to(&market_path(&market.id)))
}

pub async fn delete_market(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
) -> FormResult {
    state.actions.delete_market(&session, &market_id).await?;
    Ok(Redirect::to(MARKETS_PATH))
}

pub async fn upvote_market(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
    Form(form): Form<BackForm>,
) -> FormResult {
    let back = local_path(&form.back, MARKETS_PATH);
    state
        .actions
        .upvote_market(&session, &market_id)
        .await
        .map_err(|e| PageError::new(e, back.as_str()))?;
    Ok(Redirect::to(&back))
}

pub async fn downvote_market(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
    Form(form): Form<BackForm>,
) -> FormResult {
    let back = local_path(&form.back, MARKETS_PATH);
    state
        .actions
        .downvote_market(&session, &market_id)
        .await
        .map_err(|e| PageError::new(e, back.as_str()))?;
    Ok(Redirect::to(&back))
}

pub async fn add_comment(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
    Form(form): Form<CommentForm>,
) -> FormResult {
    let path = market_path(&market_id);
    let comment = state
        .actions
        .add_comment(&session, &market_id, &form.content, form.parent_id.as_deref())
        .await
        .map_err(|e| PageError::new(e, path.as_str()))?;
    Ok(Redirect::to(&format!("{path}#comment-{}", comment.id)))
}

pub async fn assign_probability(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
    Form(form): Form<PredictionForm>,
) -> FormResult {
    let path = probability_path(&market_id);
    let percent: f64 = form.probability.trim().parse().map_err(|_| {
        PageError::new(
            AppError::Validation("Probability must be a number between 0 and 100".to_string()),
            path.as_str(),
        )
    })?;
    state
        .actions
        .assign_probability(&session, &market_id, percent / 100.0)
        .await
        .map_err(|e| PageError::new(e, path.as_str()))?;
    Ok(Redirect::to(&path))
}

pub async fn set_username(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Form(form): Form<UsernameForm>,
) -> FormResult {
    let back = local_path(&form.back, MARKETS_PATH);
    state
        .actions
        .set_username(&session, &form.username)
        .await
        .map_err(|e| PageError::new(e, back.as_str()))?;
    Ok(Redirect::to(&back))
}
