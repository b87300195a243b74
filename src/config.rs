use crate::error::{AppError, Result};

/// Maximum markets a single author may own at once.
pub const MAX_MARKETS_PER_USER: i64 = 10;

/// Probability pages open at 2025-01-20 midnight EST (2025-01-21T05:00:00Z).
/// Before this instant the page redirects to the market list.
pub const PROBABILITIES_START_DATE_SECS: i64 = 1_737_435_600;

/// Levels of comments assembled for a market page: roots plus two reply levels.
pub const COMMENT_TREE_MAX_DEPTH: usize = 3;

/// Lifetime of an unused magic link (seconds).
pub const MAGIC_LINK_TTL_SECS: i64 = 15 * 60;

/// Lifetime of a signed-in session (seconds).
pub const SESSION_TTL_SECS: i64 = 30 * 24 * 3_600;

/// Markets younger than this carry the NEW badge (seconds).
pub const NEW_MARKET_WINDOW_SECS: i64 = 24 * 3_600;

/// Longest accepted username.
pub const MAX_USERNAME_LEN: usize = 32;

pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:3000";
pub const DEFAULT_MAIL_FROM: &str = "noreply@mmxxv.local";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Base URL used when building magic links (PUBLIC_URL)
    pub public_url: String,
    /// HTTP endpoint that accepts outgoing mail as JSON (MAIL_RELAY_URL).
    /// When unset, magic links are written to the log instead.
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "mmxxv.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            public_url: std::env::var("PUBLIC_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_PUBLIC_URL.to_string()),
            mail_relay_url: std::env::var("MAIL_RELAY_URL")
                .ok()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            mail_from: std::env::var("MAIL_FROM").unwrap_or_else(|_| DEFAULT_MAIL_FROM.to_string()),
        })
    }
}
