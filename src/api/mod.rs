pub mod health;
pub mod latency;
pub mod routes;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use crate::actions::Actions;
use crate::auth::{Mailer, SessionProvider};
use crate::db::Store;
use crate::presentation;
use crate::state::ViewCache;

use self::health::HealthState;
use self::latency::LatencyStats;

/// Shared by every handler. Cheap to clone; everything inside is a handle.
#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub actions: Actions,
    pub sessions: SessionProvider,
    pub cache: Arc<ViewCache>,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
    /// Externally reachable base URL, without a trailing slash.
    pub public_url: Arc<str>,
}

impl ApiState {
    pub fn new(pool: SqlitePool, mailer: Mailer, public_url: String) -> Self {
        let store = Store::new(pool);
        let cache = ViewCache::new();
        Self {
            actions: Actions::new(store.clone(), Arc::clone(&cache)),
            sessions: SessionProvider::new(store.clone(), Arc::new(mailer), public_url.clone()),
            public_url: Arc::from(public_url.trim_end_matches('/')),
            store,
            cache,
            latency: Arc::new(LatencyStats::new()),
            health: Arc::new(HealthState::new()),
        }
    }
}

/// HTML pages, form actions, the JSON API and the ops endpoints on one router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .merge(presentation::router())
        .merge(routes::router())
        .route("/health", get(health::get_health))
        .route("/stats/latency", get(latency::get_latency))
        .layer(middleware::from_fn_with_state(state.clone(), latency::track))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) async fn test_state() -> ApiState {
    let pool = crate::db::connect_in_memory().await.expect("in-memory db");
    ApiState::new(pool, Mailer::Log, "http://localhost:3000".to_string())
}
