use std::process::ExitCode;

use anyhow::Context;

mod app;
mod auth;
mod clock;
mod config;
mod error;
mod mail;
mod state;
#[cfg(test)]
mod testing;
mod users;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    // Every failure that escapes request handling ends up here.
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "fatal error, shutting down");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "natours=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("load configuration")?;
    let app_state = AppState::init(config).await?;
    let app = app::build_app(app_state);
    app::serve(app).await
}
