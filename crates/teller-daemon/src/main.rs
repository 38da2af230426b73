//! tellerd - guardian pre-configured action daemon.
//!
//! Serves the action protocol (create / validate / execute / list /
//! delete) over a Unix socket, runs the expiry sweeper, and exposes
//! Prometheus metrics over HTTP. The demo ledger is seeded from the
//! `[[account]]` entries in the config file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use clap::Parser;
use teller_core::{FraudPolicy, MemoryLedger};
use teller_daemon::config::TellerConfig;
use teller_daemon::executor::ActionExecutor;
use teller_daemon::metrics::TellerMetrics;
use teller_daemon::protocol::Dispatcher;
use teller_daemon::registry::ActionRegistry;
use teller_daemon::server;
use teller_daemon::store::FileBackedActionStore;
use teller_daemon::sweep::ExpirySweeper;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// tellerd - guardian pre-configured action daemon
#[derive(Parser, Debug)]
#[command(name = "tellerd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "teller.toml")]
    config: PathBuf,

    /// Override the protocol socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Override the action store file
    #[arg(long)]
    store_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = if args.config.exists() {
        TellerConfig::from_file(&args.config)
            .with_context(|| format!("loading config from {}", args.config.display()))?
    } else {
        info!(config = %args.config.display(), "config file not found, using defaults");
        TellerConfig::default()
    };
    if let Some(socket) = args.socket {
        config.daemon.socket = socket;
    }
    if let Some(store_file) = args.store_file {
        config.daemon.store_file = store_file;
    }
    config.validate().context("invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: TellerConfig) -> Result<()> {
    let store = FileBackedActionStore::open(&config.daemon.store_file, Utc::now())
        .with_context(|| {
            format!(
                "opening action store at {}",
                config.daemon.store_file.display()
            )
        })?;
    let registry = Arc::new(ActionRegistry::new(Arc::new(store)));

    let ledger = Arc::new(MemoryLedger::new());
    for account in &config.accounts {
        ledger.upsert_account(
            account.owner_key.clone(),
            account.card_number.clone(),
            account.display_name.clone(),
            account.opening_balance,
            account.approved_recipients.clone(),
        );
    }
    info!(accounts = config.accounts.len(), "demo ledger seeded");

    let metrics = Arc::new(TellerMetrics::new().context("registering metrics")?);
    let executor = Arc::new(ActionExecutor::new(
        Arc::clone(&registry),
        ledger,
        FraudPolicy {
            threshold: config.daemon.fraud_threshold,
        },
        config.daemon.ledger_timeout(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        executor,
        Some(Arc::clone(&metrics)),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = ExpirySweeper::new(
        Arc::clone(&registry),
        config.daemon.sweep_interval(),
        Some(Arc::clone(&metrics)),
        shutdown_rx.clone(),
    );
    let sweeper_handle = tokio::spawn(sweeper.run());

    let metrics_handle = tokio::spawn(serve_metrics(
        config.daemon.metrics_addr.clone(),
        Arc::clone(&metrics),
        shutdown_rx.clone(),
    ));

    let server_handle = tokio::spawn({
        let socket = config.daemon.socket.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move { server::serve(&socket, dispatcher, shutdown_rx).await }
    });

    wait_for_shutdown_signal().await?;
    info!("shutdown signal received");
    shutdown_tx.send(true).ok();

    server_handle.await?.context("protocol server failed")?;
    sweeper_handle.await?;
    metrics_handle.await?;

    if config.daemon.socket.exists() {
        std::fs::remove_file(&config.daemon.socket).ok();
    }
    info!("tellerd stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("installing SIGINT handler")?,
        _ = sigterm.recv() => {},
    }
    Ok(())
}

async fn serve_metrics(
    addr: String,
    metrics: Arc<TellerMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move {
                metrics.encode_text().unwrap_or_else(|error| {
                    warn!(%error, "metrics encoding failed");
                    String::new()
                })
            }
        }),
    );

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            warn!(%error, %addr, "metrics endpoint disabled: bind failed");
            return;
        },
    };
    info!(%addr, "metrics endpoint listening");

    let served = axum::serve(listener, app).with_graceful_shutdown(async move {
        // Either a shutdown broadcast or a dropped sender stops the
        // endpoint.
        let _ = shutdown.wait_for(|stop| *stop).await;
    });
    if let Err(error) = served.await {
        warn!(%error, "metrics endpoint failed");
    }
}
