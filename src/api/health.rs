//! Shared health state for the /health endpoint.
//! Updated by the request-tracking middleware.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::api::ApiState;
use crate::types::{now_ns, NANOS_PER_SEC};

/// Shared health metrics. Updated by middleware, read by API.
pub struct HealthState {
    /// Nanosecond timestamp of process start.
    started_at_ns: i64,
    /// Requests answered, any status.
    requests_served: AtomicU64,
    /// Requests answered with a 5xx status.
    server_errors: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at_ns: now_ns(),
            requests_served: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
        }
    }

    pub fn record_response(&self, status: StatusCode) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
        if status.is_server_error() {
            self.server_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    pub fn server_errors(&self) -> u64 {
        self.server_errors.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> i64 {
        (now_ns() - self.started_at_ns) / NANOS_PER_SEC
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub db_ok: bool,
    pub uptime_secs: i64,
    pub requests_served: u64,
    pub server_errors: u64,
    pub cached_views: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub async fn get_health(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let db_ok = sqlx::query("SELECT 1")
        .execute(state.store.pool())
        .await
        .is_ok();
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            db_ok,
            uptime_secs: state.health.uptime_secs(),
            requests_served: state.health.requests_served(),
            server_errors: state.health.server_errors(),
            cached_views: state.cache.cached_views(),
            cache_hits: state.cache.hits(),
            cache_misses: state.cache.misses(),
        }),
    )
}
