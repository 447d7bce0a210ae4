/// Daily Quote Bot
/// 
/// Posts one illustrated quote per day to a Facebook page. Meant to be
/// invoked by an external scheduler; each invocation runs once and exits.
/// 
/// Each run:
/// - Stops early if the kill switch is set, credentials or fonts are missing,
///   the monthly cap is reached, it is outside the posting window, or a post
///   already went out today
/// - Picks a holiday post or a quote and scene that are off cooldown
/// - Generates an image, overlays the quote, and uploads it
/// - Records usage only after a successful upload
/// 
/// Exit codes: 0 posted or nothing to do, 1 generation/publish failure,
/// 2 configuration or state error.

use anyhow::Result;
use chrono::Utc;
use daily_quote_bot::gatekeeper::{self, StaticGate};
use daily_quote_bot::pipeline::{self, RunOutcome};
use daily_quote_bot::{config, state};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[tokio::main]
async fn main() {
    // Initialize logger
    pretty_env_logger::init();

    log::info!("Starting Daily Quote Bot...");

    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            log::error!("Fatal: {:#}", e);
            pipeline::EXIT_FATAL
        }
    };

    std::process::exit(code);
}

async fn run() -> Result<i32> {
    // Load configuration from environment
    let cfg = config::Config::from_env()?;
    if cfg.dry_run {
        log::info!("DRY RUN: no paid calls, no uploads, no state changes");
    }

    let stores = state::StateStores::in_dir(&cfg.state_dir);

    let credentials = match gatekeeper::check_static(&cfg, &stores)? {
        StaticGate::Proceed(credentials) => credentials,
        StaticGate::Rejected(rejection) => {
            log::warn!("Not posting: {}", rejection);
            return Ok(0);
        }
    };

    let now = Utc::now().with_timezone(&cfg.timezone);
    log::info!("Local time: {}", now.format("%Y-%m-%d %H:%M %Z"));

    let bot = pipeline::Bot::from_config(cfg, stores, &credentials)?;
    let mut rng = StdRng::from_entropy();
    let outcome = bot.run(now, &mut rng).await?;

    match &outcome {
        RunOutcome::Posted { post_id, quote, scene, holiday } => log::info!(
            "Posted {} ({}{}): {}",
            post_id,
            scene,
            holiday.map(|h| format!(", holiday {}", h)).unwrap_or_default(),
            quote
        ),
        RunOutcome::DryRun { quote, scene, .. } => {
            log::info!("Dry run finished ({}): {}", scene, quote)
        }
        RunOutcome::Skipped(rejection) => log::info!("Nothing posted: {}", rejection),
        RunOutcome::Failed { stage, error } => {
            log::error!("Run failed during {}: {:#}", stage.as_str(), error)
        }
    }

    Ok(outcome.exit_code())
}
