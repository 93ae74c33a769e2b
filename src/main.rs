use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use social_autopilot::args::Args;
use social_autopilot::config::AppConfig;
use social_autopilot::media::footage::{FootageProvider, PexelsClient};
use social_autopilot::notify::TelegramNotifier;
use social_autopilot::pipeline::{Collaborators, Pipeline, RunOutcome};
use social_autopilot::publish::{AyrshareClient, Publisher};
use social_autopilot::script::{GeminiClient, ScriptGenerator};
use social_autopilot::store::JsonFileStore;
use social_autopilot::tts::PiperSynthesizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut config = AppConfig::load(&args.config)?;
    if let Some(profile) = &args.profile {
        config.active_profile = profile.clone();
    }
    config.validate()?;
    let profile = config.profile()?.clone();
    info!(
        profile = %profile.id,
        channel = %profile.channel_name,
        dry_run = args.dry_run,
        "Active profile ready"
    );

    let timeout = config.http.timeout();
    let script: Option<Box<dyn ScriptGenerator>> = match &args.gemini_api_key {
        Some(key) => Some(Box::new(GeminiClient::new(key.clone(), timeout)?)),
        None => {
            warn!("GEMINI_API_KEY not set, scripts will come from backups");
            None
        }
    };
    let footage: Option<Box<dyn FootageProvider>> = match &args.pexels_api_key {
        Some(key) => Some(Box::new(PexelsClient::new(
            key.clone(),
            timeout,
            config.http.upload_timeout(),
        )?)),
        None => {
            warn!("PEXELS_API_KEY not set, using local fallback clips");
            None
        }
    };
    let publisher: Option<Box<dyn Publisher>> = match std::env::var(&profile.publisher_key_env) {
        Ok(key) if !key.is_empty() => Some(Box::new(AyrshareClient::new(
            key,
            config.http.upload_timeout(),
        )?)),
        _ => None,
    };

    let collaborators = Collaborators {
        script,
        voice: Box::new(PiperSynthesizer::new(&config.voice, &config.video)),
        footage,
        publisher,
        notifier: Box::new(TelegramNotifier::new(
            args.telegram_bot_token.clone(),
            args.telegram_chat_id.clone(),
            timeout,
        )?),
    };

    let store = JsonFileStore::new(&config.paths.store_root);
    let pipeline = Pipeline::new(config, store, collaborators, args.dry_run)?;

    // A failed run is already recorded and reported; the process exits cleanly.
    if let RunOutcome::Published(published) = pipeline.run().await {
        info!("Final video: {}", published.video.display());
    }
    Ok(())
}
