//! Server-rendered pages and the form actions behind them.

pub mod forms;
pub mod gate;
pub mod html;
pub mod pages;

use axum::{
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use tracing::error;

use crate::actions::MARKETS_PATH;
use crate::api::ApiState;
use crate::error::AppError;

pub const SIGNIN_PATH: &str = "/auth/signin";

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/", get(pages::index))
        .route("/markets", get(pages::markets))
        .route("/markets/:id", get(pages::market))
        .route("/probabilities/:id", get(pages::probabilities))
        .route(SIGNIN_PATH, get(pages::signin_form).post(pages::signin))
        .route("/auth/verify", get(pages::verify))
        .route("/auth/signout", post(pages::signout))
        .route("/actions/markets", post(forms::create_market))
        .route("/actions/markets/:id/delete", post(forms::delete_market))
        .route("/actions/markets/:id/upvote", post(forms::upvote_market))
        .route("/actions/markets/:id/downvote", post(forms::downvote_market))
        .route("/actions/markets/:id/comments", post(forms::add_comment))
        .route("/actions/markets/:id/prediction", post(forms::assign_probability))
        .route("/actions/username", post(forms::set_username))
}

/// An error surfaced to a browser. Anonymous callers are sent to sign in;
/// everything else becomes an alert page linking back to `back`.
#[derive(Debug)]
pub struct PageError {
    error: AppError,
    back: String,
}

impl PageError {
    pub fn new(error: AppError, back: impl Into<String>) -> Self {
        Self { error, back: back.into() }
    }
}

impl From<AppError> for PageError {
    fn from(error: AppError) -> Self {
        Self::new(error, MARKETS_PATH)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        if matches!(self.error, AppError::Unauthorized) {
            return Redirect::to(SIGNIN_PATH).into_response();
        }
        let status = self.error.status();
        if status.is_server_error() {
            error!(error = %self.error, "page request failed");
        }
        let page = html::alert_page(&self.error.public_message(), &self.back, None);
        (status, Html(page)).into_response()
    }
}
