use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::info;
use wger_image_sync::nutrition::{FetchOutcome, ImageSync, PgStore, ReqwestSource, SyncConfig};
use wger_image_sync::util::{db::Db, env, logging};

#[derive(Parser, Debug)]
#[command(name = "wger-sync", version, about = "wger ingredient image sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Download every ingredient image listed by a wger deployment
    DownloadImages {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Deployment to pull from (default: WGER_INSTANCE)
        #[arg(long, value_parser = parse_remote_url)]
        remote_url: Option<String>,
        /// Do not colour the success lines
        #[arg(long, default_value_t = false)]
        plain: bool,
    },
    /// Fetch the image of a single ingredient using DOWNLOAD_INGREDIENT_IMAGES
    FetchImage {
        /// Local ingredient id
        ingredient_id: i64,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Fetch images for Open Food Facts ingredients that have none yet
    FetchMissing {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Maximum number of ingredients to process
        #[arg(long, default_value_t = 100)]
        limit: i64,
        /// Pause between ingredients, in milliseconds
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
    },
}

fn parse_remote_url(raw: &str) -> Result<String, String> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| format!("invalid URL {raw:?}: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw.trim().trim_end_matches('/').to_string()),
        other => Err(format!("unsupported URL scheme {other:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    logging::init_tracing("info,sqlx=warn")?;
    let cli = Cli::parse();

    env::preflight_check(
        "wger-sync",
        &[],
        &[
            "DATABASE_URL",
            "DOWNLOAD_INGREDIENT_IMAGES",
            "WGER_INSTANCE",
            "TESTING",
        ],
    )?;

    match cli.command {
        Commands::DownloadImages {
            db_url,
            remote_url,
            plain,
        } => {
            // the bulk walk never reads the download mode
            let sync = build_engine(db_url, SyncConfig::from_env_lenient()).await?;
            let green = |s: &str| format!("\x1b[32m{s}\x1b[0m");
            let style = if plain {
                None
            } else {
                Some(&green as &dyn Fn(&str) -> String)
            };
            let mut print = |line: &str| println!("{line}");
            sync.download_ingredient_images(&mut print, remote_url.as_deref(), style)
                .await?;
        }
        Commands::FetchImage {
            ingredient_id,
            db_url,
        } => {
            let sync = build_engine(db_url, SyncConfig::from_env()?).await?;
            match sync.fetch_ingredient_image(ingredient_id).await? {
                FetchOutcome::Saved(image) => {
                    println!("saved image {} ({} bytes)", image.uuid, image.size)
                }
                other => println!("no image stored: {other:?}"),
            }
        }
        Commands::FetchMissing {
            db_url,
            limit,
            delay_ms,
        } => {
            let sync = build_engine(db_url, SyncConfig::from_env()?).await?;
            let summary = sync
                .fetch_missing_images(limit, Duration::from_millis(delay_ms))
                .await?;
            println!(
                "attempted={} saved={} not_saved={} failed={}",
                summary.attempted, summary.saved, summary.not_saved, summary.failed
            );
        }
    }
    Ok(())
}

async fn build_engine(
    db_url: Option<String>,
    config: SyncConfig,
) -> Result<ImageSync<PgStore, ReqwestSource>> {
    let database_url = match db_url {
        Some(url) => url,
        None => env::db_url()?,
    };
    let max_conns: u32 = env::env_parse("DB_MAX_CONNS", 5u32);
    let db = Db::connect(&database_url, max_conns)
        .await
        .context("Db::connect failed")?;
    info!(max_conns, mode = ?config.download_mode, "database connected");

    let http = ReqwestSource::new(config.http_timeout_secs)?;
    Ok(ImageSync::new(PgStore::new(db), http, config))
}
