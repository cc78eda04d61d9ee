mod bot;
mod commands;
mod config;
mod delivery;
mod platform;
mod remote;
mod status;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::Config;
use crate::platform::telegram::TelegramGateway;
use crate::platform::{Resilient, RetryPolicy};
use crate::remote::http::HttpFetcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Owner: {}", config.telegram.owner_user_id);
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);
    info!("  Commands: {}", config.commands.len());
    info!(
        "  Downloader: {}",
        config.downloader.as_ref().is_some_and(|d| d.enabled)
    );
    info!("  Temp dir: {}", config.delivery.temp_dir().display());

    let fetcher = HttpFetcher::new(&config.http)?;
    let bot = Bot::new(&config.telegram.bot_token);
    let gateway = Resilient::new(
        TelegramGateway::new(bot.clone()),
        RetryPolicy::from(&config.retry),
    );

    // Create shared state
    let state = Arc::new(AppState::new(config, Arc::new(fetcher), Arc::new(gateway))?);

    // Run the Telegram bot
    info!("Bot is starting...");
    platform::telegram::run(state, bot).await?;

    Ok(())
}
