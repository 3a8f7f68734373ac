//! Two-party ECDSA server
//!
//! HTTP service hosting the server party (participant 0) of every wallet.

mod custody;
mod routes;

use anyhow::{Context, Result};
use clap::Parser;
use custody::SealedCustodian;
use routes::AppState;
use std::sync::Arc;
use std::time::Duration;
use tecdsa_core::session::Registry;
use tecdsa_core::RegistryConfig;
use tracing::{info, warn, Level};

/// Server CLI arguments
#[derive(Parser, Debug)]
#[command(name = "tecdsa-server")]
#[command(about = "Server party for two-party threshold ECDSA wallets")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Idle session lifetime in seconds
    #[arg(long, env = "SESSION_TTL_SECS", default_value = "300")]
    session_ttl: u64,

    /// Seconds between expired-session sweeps
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value = "30")]
    sweep_interval: u64,

    /// Early payloads a session may queue
    #[arg(long, env = "MAX_QUEUED_MESSAGES", default_value = "4")]
    max_queued: usize,

    /// Largest triple batch (in pairs) per session
    #[arg(long, env = "MAX_TRIPLES_PER_SESSION", default_value = "16")]
    max_triples: usize,

    /// Hex-encoded 32-byte custody master key; random when absent
    #[arg(long, env = "CUSTODY_MASTER_KEY", hide_env_values = true)]
    master_key: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into());
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn custodian(master_key: Option<&str>) -> Result<SealedCustodian> {
    match master_key {
        Some(hex_key) => {
            let bytes = hex::decode(hex_key).context("master key is not hex")?;
            let key: [u8; 32] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("master key must be 32 bytes"))?;
            Ok(SealedCustodian::new(key))
        }
        None => {
            warn!("No master key given; key shares will not survive a restart");
            Ok(SealedCustodian::ephemeral())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!(
        listen = %args.listen,
        session_ttl = args.session_ttl,
        max_queued = args.max_queued,
        "Starting tecdsa server"
    );

    let config = RegistryConfig::new(
        Duration::from_secs(args.session_ttl),
        args.max_queued,
        args.max_triples,
    )?;
    let state = Arc::new(AppState {
        registry: Registry::new(config),
        custodian: custodian(args.master_key.as_deref())?,
    });

    // Spawn sweeper task
    let sweeper = Arc::clone(&state);
    let sweep_every = Duration::from_secs(args.sweep_interval.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            let purged = sweeper.registry.purge_expired();
            if purged > 0 {
                info!(purged, "Expired sessions purged");
            }
        }
    });

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
