use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::actions::{market_path, probability_path, MARKETS_PATH};
use crate::api::ApiState;
use crate::auth::session::{removal_cookie, session_cookie};
use crate::auth::{MaybeSession, Session, SessionKey, SessionOptions};
use crate::db::models::UserRow;
use crate::error::{AppError, Result};
use crate::presentation::{gate, html, PageError, SIGNIN_PATH};
use crate::types::now_ns;

/// The signed-in user's row, for the nav bar.
async fn viewer(state: &ApiState, session: &Session) -> Result<Option<UserRow>> {
    match session.user_id() {
        Some(id) => state.store.find_user(id).await,
        None => Ok(None),
    }
}

pub async fn index() -> Redirect {
    Redirect::to(MARKETS_PATH)
}

pub async fn markets(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
) -> std::result::Result<Html<String>, PageError> {
    if let Some(cached) = state.cache.get(MARKETS_PATH, &session.user.id) {
        return Ok(Html(cached));
    }
    let viewer = viewer(&state, &session).await?;
    let markets = state.actions.list_markets(&session).await?;
    let page = html::market_list(&markets, viewer.as_ref());
    state.cache.insert(MARKETS_PATH, &session.user.id, page.clone());
    Ok(Html(page))
}

pub async fn market(
    State(state): State<ApiState>,
    MaybeSession(session): MaybeSession,
    Path(market_id): Path<String>,
) -> std::result::Result<Html<String>, PageError> {
    let path = market_path(&market_id);
    if let Some(cached) = state.cache.get(&path, &session.user.id) {
        return Ok(Html(cached));
    }
    let viewer = viewer(&state, &session).await?;
    let detail = state.actions.get_market_by_id(&session, &market_id).await?;
    let invite_url = format!("{}{path}", state.public_url);
    let page = html::market_detail(&detail, viewer.as_ref(), &invite_url);
    state.cache.insert(&path, &session.user.id, page.clone());
    Ok(Html(page))
}

/// Closed before the start date; sign-in required afterwards.
pub async fn probabilities(
    State(state): State<ApiState>,
    SessionKey(key): SessionKey,
    Path(market_id): Path<String>,
) -> std::result::Result<Response, PageError> {
    if !gate::probabilities_open(now_ns()) {
        return Ok(Redirect::to(MARKETS_PATH).into_response());
    }
    let session = state
        .sessions
        .get_session(key.as_deref(), SessionOptions::default())
        .await?;

    let path = probability_path(&market_id);
    if let Some(cached) = state.cache.get(&path, &session.user.id) {
        return Ok(Html(cached).into_response());
    }
    let viewer = viewer(&state, &session).await?;
    let view = state.actions.get_market_probability(&session, &market_id).await?;
    let page = html::probability_page(&view, viewer.as_ref());
    state.cache.insert(&path, &session.user.id, page.clone());
    Ok(Html(page).into_response())
}

// ---------------------------------------------------------------------------
// Sign-in
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SigninForm {
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyQuery {
    pub token: String,
}

pub async fn signin_form() -> Html<String> {
    Html(html::signin_page(None))
}

pub async fn signin(
    State(state): State<ApiState>,
    Form(form): Form<SigninForm>,
) -> std::result::Result<Response, PageError> {
    match state.sessions.send_magic_link(&form.email).await {
        Ok(()) => Ok(Html(html::check_email_page(form.email.trim())).into_response()),
        Err(AppError::Validation(msg)) => {
            Ok((StatusCode::BAD_REQUEST, Html(html::signin_page(Some(&msg)))).into_response())
        }
        Err(e) => Err(PageError::new(e, SIGNIN_PATH)),
    }
}

/// Landing point of the emailed link: sets the session cookie and sends the
/// user to the market list.
pub async fn verify(
    State(state): State<ApiState>,
    jar: CookieJar,
    Query(query): Query<VerifyQuery>,
) -> std::result::Result<Response, PageError> {
    let session = state
        .sessions
        .verify_magic_link(&query.token)
        .await
        .map_err(|e| PageError::new(e, SIGNIN_PATH))?;
    Ok((jar.add(session_cookie(&session.session_key)), Redirect::to(MARKETS_PATH)).into_response())
}

pub async fn signout(
    State(state): State<ApiState>,
    jar: CookieJar,
    SessionKey(key): SessionKey,
) -> std::result::Result<Response, PageError> {
    if let Some(key) = key {
        state.sessions.sign_out(&key).await?;
    }
    Ok((jar.remove(removal_cookie()), Redirect::to(SIGNIN_PATH)).into_response())
}
