mod config;
mod error;
mod media;
mod pipeline;
mod platform;
mod rules;
mod scheduler;
mod translate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::media::MediaTransfer;
use crate::pipeline::{ForwardSettings, Forwarder};
use crate::platform::discord::DiscordAdapter;
use crate::platform::kook::KookAdapter;
use crate::platform::ChatAdapter;
use crate::rules::ForwardRuleTable;
use crate::scheduler::cleanup::CleanupSweeper;
use crate::scheduler::Scheduler;
use crate::translate::Translator;

const EVENT_QUEUE_SIZE: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Read the env file before the subscriber so RUST_LOG from it applies
    let env_file = std::env::args().nth(1).map(PathBuf::from);
    let env_loaded = match &env_file {
        Some(path) => dotenvy::from_path(path).map(|_| Some(path.clone())),
        None => Ok(dotenvy::dotenv().ok()),
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chatbridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match env_loaded.context("Failed to read env file")? {
        Some(path) => info!("Loaded environment from: {}", path.display()),
        None => info!("No .env file found, using process environment"),
    }

    let config = Config::from_env().context("Failed to load configuration")?;

    let rules = ForwardRuleTable::parse(&config.forward.rules);
    let translator = match Translator::from_config(
        &config.translation,
        translate::http_client().context("Failed to build translation client")?,
    ) {
        Ok(translator) => translator,
        Err(e) => {
            error!("Translation disabled: {}", e);
            None
        }
    };

    info!("Configuration loaded successfully");
    info!("  Discord: {}", config.discord_token.is_some());
    info!("  KOOK: {}", config.kook_token.is_some());
    info!("  Forward rules: {}", rules.len());
    if rules.is_empty() {
        warn!("No forward rules configured, nothing will be forwarded");
    }
    for rule in rules.iter() {
        info!("    {} -> {}", rule.source_channel_id, rule.dest_channel_id);
    }
    info!("  Forward bot messages: {}", config.forward.forward_bot_messages);
    match &translator {
        Some(t) => info!(
            "  Translation: {} -> {}",
            t.backend_kind(),
            t.target_language()
        ),
        None => info!("  Translation: off"),
    }
    let media = MediaTransfer::new(&config.cleanup.download_dir)?;
    media.ensure_directories().await?;
    info!(
        "  Media: {} (sweep every {}h, max age {}h)",
        media.root().display(),
        config.cleanup.interval_hours,
        config.cleanup.max_file_age_hours
    );

    let mut adapters: Vec<Arc<dyn ChatAdapter>> = Vec::new();
    if let Some(token) = &config.discord_token {
        adapters.push(Arc::new(DiscordAdapter::new(token.clone())));
    }
    if let Some(token) = &config.kook_token {
        adapters.push(Arc::new(
            KookAdapter::new(token.clone()).context("Failed to create KOOK client")?,
        ));
    }

    let forwarder = adapters.iter().fold(
        Forwarder::new(
            rules,
            ForwardSettings::from(&config.forward),
            translator,
            media,
        ),
        |forwarder, adapter| forwarder.with_adapter(Arc::clone(adapter)),
    );
    let forwarder = Arc::new(forwarder);

    let mut scheduler = Scheduler::new().await?;
    let sweeper = Arc::new(CleanupSweeper::new(
        &config.cleanup.download_dir,
        config.cleanup.max_file_age(),
    ));
    sweeper
        .schedule(&scheduler, config.cleanup.interval())
        .await?;
    scheduler.start().await?;

    let mut listeners = JoinSet::new();
    for adapter in adapters {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        tokio::spawn(Arc::clone(&forwarder).dispatch(rx));
        listeners.spawn(async move {
            let platform = adapter.platform();
            info!("Starting {} listener...", platform);
            match adapter.listen(tx).await {
                Ok(()) => info!("{} listener finished", platform),
                Err(e) => error!("{} listener stopped: {:#}", platform, e),
            }
        });
    }

    info!("Bridge is running");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
        _ = async { while listeners.join_next().await.is_some() {} } => {
            warn!("All listeners have stopped, shutting down");
        }
    }

    if let Err(e) = scheduler.shutdown().await {
        warn!("{:#}", e);
    }
    Ok(())
}
