use chrono::{DateTime, Utc};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror the /api JSON shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorResponse {
    pub email: String,
    pub username: Option<String>,
}

impl AuthorResponse {
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketResponse {
    pub id: String,
    pub title: String,
    pub author: AuthorResponse,
    pub created_at: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub comment_count: i64,
    pub viewer_vote: String,
    pub is_new: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentResponse {
    pub content: String,
    pub author: AuthorResponse,
    pub replies: Vec<CommentResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDetailResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub resolution_criteria: String,
    pub author: AuthorResponse,
    pub created_at: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub viewer_vote: String,
    pub comments: Vec<CommentResponse>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConsensusResponse {
    pub user_prediction: Option<f64>,
    pub average_probability: Option<f64>,
    pub prediction_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbabilityResponse {
    pub consensus: ConsensusResponse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoteTallyResponse {
    pub state: String,
    pub upvotes: i64,
    pub downvotes: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LatencyResponse {
    pub p99_ms: Option<f64>,
    pub sample_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorResponse {
    error: String,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

/// The market open in the right pane.
#[derive(Debug, Clone)]
pub struct DetailState {
    pub market: MarketDetailResponse,
    pub consensus: Option<ConsensusResponse>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub markets: Vec<MarketResponse>,
    pub detail: Option<DetailState>,
    pub latency: LatencyResponse,
    /// Result of the last vote, shown in the footer.
    pub flash: Option<String>,
    pub base_url: String,
    pub session_key: Option<String>,
}

impl AppState {
    pub fn new(base_url: String, session_key: Option<String>) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            markets: Vec::new(),
            detail: None,
            latency: LatencyResponse::default(),
            flash: None,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_key: session_key.filter(|k| !k.is_empty()),
        }
    }

    fn get(&self, client: &reqwest::Client, path: &str) -> reqwest::RequestBuilder {
        self.authorize(client.get(format!("{}{}", self.base_url, path)))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let (markets_res, latency_res) = tokio::join!(
            self.get(client, "/api/markets").send(),
            client.get(format!("{}/stats/latency", self.base_url)).send(),
        );

        let markets = match markets_res {
            Ok(resp) => resp.json::<Vec<MarketResponse>>().await,
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        };
        match markets {
            Ok(m) => {
                self.markets = m;
                self.status = ConnectionStatus::Connected;
            }
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("parse error: {e}"));
                return;
            }
        }

        if let Ok(l) = latency_res {
            if let Ok(latency) = l.json::<LatencyResponse>().await {
                self.latency = latency;
            }
        }

        if let Some(id) = self.detail.as_ref().map(|d| d.market.id.clone()) {
            self.open_detail(client, &id).await;
        }
    }

    /// Load a market and its consensus into the detail pane. The consensus
    /// needs no sign-in but is left empty if the request fails.
    pub async fn open_detail(&mut self, client: &reqwest::Client, market_id: &str) {
        let (detail_res, probability_res) = tokio::join!(
            self.get(client, &format!("/api/markets/{market_id}")).send(),
            self.get(client, &format!("/api/markets/{market_id}/probability")).send(),
        );

        let market = match detail_res {
            Ok(resp) if resp.status().is_success() => resp.json::<MarketDetailResponse>().await.ok(),
            _ => None,
        };
        let Some(market) = market else {
            self.detail = None;
            return;
        };

        let consensus = match probability_res {
            Ok(resp) if resp.status().is_success() => resp
                .json::<ProbabilityResponse>()
                .await
                .ok()
                .map(|p| p.consensus),
            _ => None,
        };
        self.detail = Some(DetailState { market, consensus });
    }

    pub fn close_detail(&mut self) {
        self.detail = None;
    }

    /// Toggle a vote on `market_id`; `up` selects upvote or downvote.
    pub async fn vote(&mut self, client: &reqwest::Client, market_id: &str, up: bool) {
        if self.session_key.is_none() {
            self.flash = Some("Set SESSION_KEY to vote".to_string());
            return;
        }
        let action = if up { "upvote" } else { "downvote" };
        let url = format!("{}/api/markets/{market_id}/{action}", self.base_url);
        let res = self.authorize(client.post(url)).send().await;

        self.flash = Some(match res {
            Ok(resp) if resp.status().is_success() => match resp.json::<VoteTallyResponse>().await {
                Ok(t) => format!("vote: {} (↑{} ↓{})", t.state, t.upvotes, t.downvotes),
                Err(e) => format!("parse error: {e}"),
            },
            Ok(resp) => {
                let status = resp.status();
                resp.json::<ErrorResponse>()
                    .await
                    .map(|e| e.error)
                    .unwrap_or_else(|_| status.to_string())
            }
            Err(e) => format!("{e}"),
        });
        self.refresh(client).await;
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

pub fn format_percent(p: Option<f64>) -> String {
    p.map_or("—".to_string(), |v| format!("{:.1}%", v * 100.0))
}

/// Server p99 and how many requests it covers.
pub fn format_latency(latency: &LatencyResponse) -> String {
    match latency.p99_ms {
        Some(v) => format!("p99 {:.1}ms / {} req", v, latency.sample_count),
        None => "p99 —".to_string(),
    }
}

/// Nanosecond epoch timestamp as "Jan 21, 2025".
pub fn format_date_ns(ns: i64) -> String {
    DateTime::<Utc>::from_timestamp(ns.div_euclid(1_000_000_000), 0)
        .map(|dt| dt.format("%b %-d, %Y").to_string())
        .unwrap_or_default()
}

/// Comment threads as indented lines, parents before their replies.
pub fn comment_lines(comments: &[CommentResponse]) -> Vec<String> {
    let mut out = Vec::new();
    push_comments(&mut out, comments, 0);
    out
}

fn push_comments(out: &mut Vec<String>, comments: &[CommentResponse], depth: usize) {
    for c in comments {
        out.push(format!("{}{}: {}", "  ".repeat(depth), c.author.display_name(), c.content));
        push_comments(out, &c.replies, depth + 1);
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
