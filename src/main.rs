mod admission;
mod config;
mod idle;
mod llm;
mod platform;
mod relay;
mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admission::{AdmissionEngine, AdmissionState};
use crate::config::Config;
use crate::idle::IdleSpeaker;
use crate::llm::LlmClient;
use crate::relay::Relay;
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,woofrelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = match Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
    {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return Err(e);
        }
    };

    info!("Configuration loaded successfully");
    info!("  Provider: {} ({})", config.llm.provider, config.llm.model);
    info!(
        "  Reply probability: {}, cooldown: {:?}",
        config.admission.reply_probability,
        config.admission.cooldown()
    );
    info!(
        "  Idle speaker: enabled={} every {:?}, p={}",
        config.idle.enabled,
        config.idle.interval(),
        config.idle.probability
    );

    let bot = Bot::new(&config.telegram.bot_token);
    let identity = platform::telegram::resolve_identity(&bot).await;

    // Shared between the reply path and the idle speaker
    let state = Arc::new(Mutex::new(AdmissionState::default()));

    let relay = Arc::new(Relay::new(
        AdmissionEngine::new(config.admission.clone(), identity),
        state.clone(),
        Arc::new(LlmClient::new(config.llm.clone())),
        Arc::new(bot.clone()),
        config.llm.system_prompt.clone(),
        &config.admission,
    ));

    let mut scheduler = Scheduler::new().await?;
    if config.idle.enabled {
        let speaker = Arc::new(IdleSpeaker::new(
            config.idle.clone(),
            state,
            Arc::new(bot.clone()),
        ));
        scheduler::tasks::register_idle_speaker(&scheduler, speaker, config.idle.interval())
            .await?;
    }
    scheduler.start().await?;

    info!("Bot is starting...");
    platform::telegram::run(relay, bot).await?;

    scheduler.shutdown().await?;
    info!("Bot stopped");

    Ok(())
}
