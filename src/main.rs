mod actions;
mod api;
mod auth;
mod comments;
mod config;
mod consensus;
mod db;
mod error;
mod presentation;
mod state;
mod types;
mod votes;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState};
use crate::auth::Mailer;
use crate::config::Config;
use crate::error::Result;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Mail delivery ---
    let mailer = Mailer::from_config(&cfg)?;
    match &cfg.mail_relay_url {
        Some(url) => info!("Magic links will be sent through {url}"),
        None => info!("MAIL_RELAY_URL not set; magic links will be written to the log"),
    }

    // --- HTTP server ---
    let app = router(ApiState::new(pool, mailer, cfg.public_url.clone()));
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {bind_addr} (public URL {})", cfg.public_url);

    axum::serve(listener, app).await?;

    Ok(())
}
