//! Mimicbot - Entry Point
//!
//! Modes:
//! - Default: startup sync, then run the scheduled jobs until Ctrl-C
//! - --once: startup sync plus one run of every job, then exit
//! - --json: JSON logs on stderr

use mimicbot::{Bot, Config, ConfigError, MarkovModeler, MastodonApi, Scheduler};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults first, local overrides on top; real environment wins over both
    dotenvy::from_filename("defaults.env").ok();
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let once_mode = args.iter().any(|a| a == "--once");
    let json_mode = args.iter().any(|a| a == "--json");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Mimicbot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: mimicbot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --once       Sync, run every job once, then exit");
        println!("  --json       Log as JSON to stderr");
        println!("  --help, -h   Show this help");
        println!();
        println!("Environment variables:");
        println!("  BOT_NAME             Account the bot posts as (required)");
        println!("  SOURCE_USERNAME      Account whose posts form the archive (required)");
        println!("  API_BASE_URL         Mastodon-compatible server (required)");
        println!("  ACCESS_TOKEN         API access token (required)");
        println!("  ARCHIVE_PATH         Archive file or directory (default: corpus/<source>.json)");
        println!("  MODEL_PATH           Model file or directory (default: model/<source>.model)");
        println!("  REMOTE_STORE_URL     Remote object store; unset keeps artifacts local-only");
        println!("  REMOTE_STORE_TOKEN   Remote object store bearer token");
        println!("  TWEET_INTERVAL       e.g. 2h (also UPDATE_FOLLOWS_INTERVAL, REFRESH_MODEL_INTERVAL, POLL_INTERVAL)");
        println!("  TWEET_CHANCE         Probability a post tick posts (default: 1.0)");
        println!("  MAX_ERROR_RETRIES    Retries per remote call (default: 3)");
        println!("  TIMEOUT_SLEEP        Cooldown after a timeout (default: 30s)");
        println!("  BLACKLIST            Accounts never answered");
        println!("  BANNED_TERMS         Words obscured in posts");
        return Ok(());
    }

    // RUST_LOG takes full directives, e.g. "mimicbot=debug,reqwest=warn"
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_mode {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(ConfigError::MissingFields(missing)) => {
            for field in &missing {
                error!("Can't run without {}", field);
            }
            std::process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Mimicbot v{} as {}", env!("CARGO_PKG_VERSION"), config.bot_name);

    let api = Arc::new(MastodonApi::from_config(&config)?);
    let bot = Arc::new(Bot::from_config(config, api, Arc::new(MarkovModeler::new()))?);
    bot.startup().await?;

    let mut scheduler = Scheduler::new(bot.clone());
    if once_mode {
        scheduler.run_once().await;
        info!("Done ({})", bot.call_stats().format());
        return Ok(());
    }

    scheduler.start();
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    scheduler.shutdown().await;

    Ok(())
}
