//! roomwatch-agent: polls a social-audio service for live channels, joins
//! them, and monitors each one until it ends.
//!
//! Needs a phone number registered with the service. On first run (or when
//! the saved token has expired) the service sends a verification code,
//! which is read from stdin. Everything observed lands in a SQLite
//! database next to the process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use roomwatch_agent::credentials::{CredentialManager, StdinPrompt, TokenBacking};
use roomwatch_agent::db::Db;
use roomwatch_agent::worker::{Worker, WorkerConfig};
use roomwatch_sdk::client::{ClientConfig, RoomClient};

#[derive(Parser)]
#[command(name = "roomwatch-agent", about = "Audio-room discovery and monitoring agent")]
struct Args {
    /// Phone number registered with the service (E.164).
    #[arg(long, env = "ROOMWATCH_PHONE")]
    phone: String,

    /// Base URL of the service API.
    #[arg(long, default_value = "https://www.clubhouseapi.com/api")]
    api_url: String,

    /// Base URL of the public room pages (end-of-life probe).
    #[arg(long, default_value = "https://www.joinclubhouse.com")]
    web_url: String,

    /// SQLite database path.
    #[arg(long, default_value = "roomwatch.db")]
    db: PathBuf,

    /// Persist the login token to this JSON file instead of the database.
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Device identity sent with every request; generated when omitted.
    #[arg(long, env = "ROOMWATCH_DEVICE_ID")]
    device_id: Option<String>,

    /// Seconds between listing-counter refreshes for known channels.
    #[arg(long, default_value = "3600")]
    refresh_interval: u64,

    /// Attempt budget for a listing call, including credential refreshes.
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Largest participant list persisted per channel.
    #[arg(long, default_value = "500")]
    user_limit: usize,

    /// Shortest wait after a join-class action, seconds.
    #[arg(long, default_value = "5")]
    join_wait_min: u64,

    /// Longest wait after a join-class action, seconds.
    #[arg(long, default_value = "20")]
    join_wait_max: u64,

    /// Shortest wait after a status check, seconds.
    #[arg(long, default_value = "5")]
    check_wait_min: u64,

    /// Longest wait after a status check, seconds.
    #[arg(long, default_value = "10")]
    check_wait_max: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomwatch_agent=info,roomwatch_sdk=info".into()),
        )
        .init();

    let args = Args::parse();

    let db = Arc::new(Db::open(&args.db)?);

    let device_id = args
        .device_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let client = RoomClient::new(ClientConfig {
        api_url: args.api_url.clone(),
        web_url: args.web_url.clone(),
        device_id,
    });

    let backing = match &args.token_file {
        Some(path) => TokenBacking::File(path.clone()),
        None => TokenBacking::Store,
    };
    let credentials = CredentialManager::new(args.phone.clone(), backing, db.clone());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, finishing current action");
                cancel.cancel();
            }
        });
    }

    let config = WorkerConfig {
        refresh_interval: Duration::from_secs(args.refresh_interval),
        max_retries: args.max_retries,
        user_limit: args.user_limit,
        join_wait: (args.join_wait_min, args.join_wait_max),
        check_wait: (args.check_wait_min, args.check_wait_max),
    };

    let mut worker = Worker::new(client, StdinPrompt, db, credentials, config, cancel);
    worker.ensure_authenticated().await?;
    worker.bootstrap()?;
    worker.run().await?;

    Ok(())
}
