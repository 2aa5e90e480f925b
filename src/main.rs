//! DomaLend off-chain services.
//!
//! Two subsystems share one process:
//! - Event indexer: back-fills and tail-polls the lending contract's events
//!   into an in-memory projection served over HTTP.
//! - DomaRank broadcaster: periodically scores fractional domain tokens and
//!   writes risk-adjusted valuations to the oracle contract, refreshing
//!   collateral tokens of new loans with near-real-time latency.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use domalend_api::SubgraphClient;
use domalend_chain::{ChainClient, OracleSubmitter};
use domalend_core::{
    AppConfig, BroadcastConfig, Broadcaster, EventStore, Indexer, IndexerConfig,
};
use domalend_server::AppState;

/// Hard deadline for the loops to acknowledge shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,domalend_core=debug,domalend_chain=debug")
        }))
        .init();

    // Exit codes: 0 clean shutdown, 1 configuration error, 2 runtime fault.
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error");
            std::process::exit(1);
        }
    };
    config.log_summary();

    match run(config).await {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(2),
        Err(e) => {
            error!(error = %e, "Startup failed");
            std::process::exit(1);
        }
    }
}

/// Wire the components in dependency order, run until a shutdown signal, and
/// drain. `Ok(false)` means the hard deadline elapsed with loops still alive.
async fn run(config: AppConfig) -> Result<bool> {
    info!("Starting DomaLend off-chain services");

    // Chain client, with a startup reachability probe: an unreachable RPC at
    // startup is a configuration error.
    let chain = Arc::new(ChainClient::new(&config.rpc_url, config.lend_contract)?);
    chain
        .probe()
        .await
        .context("RPC endpoint unreachable at startup")?;

    // Subgraph client and oracle submitter
    let subgraph = Arc::new(SubgraphClient::new(
        &config.subgraph_url,
        &config.subgraph_api_key,
    )?);
    let oracle = Arc::new(
        OracleSubmitter::new(&config.signer_key, &config.rpc_url, config.oracle_contract)
            .await
            .context("failed to initialize oracle submitter")?,
    );

    let store = Arc::new(EventStore::new());
    let shutdown = CancellationToken::new();

    // Indexer
    let (indexer, mut indexer_handle) = Indexer::new(
        chain.clone(),
        store.clone(),
        IndexerConfig {
            start_block: config.start_block,
            poll_interval: config.poll_interval,
            ..Default::default()
        },
    );
    let mut indexer_task = tokio::spawn(indexer.run(shutdown.clone()));

    // HTTP surface, once the indexer has placed its cursor
    indexer_handle.wait_until_started().await;
    let listener = domalend_server::bind(config.http_port).await?;
    let router = domalend_server::router(
        AppState {
            store: store.clone(),
            indexer: indexer_handle.clone(),
        },
        &config.cors_origin,
    )?;
    let mut http_task = tokio::spawn(domalend_server::serve(listener, router, shutdown.clone()));

    // Broadcaster last, subscribed to the indexer's loan notices
    let broadcaster = Arc::new(Broadcaster::new(
        subgraph,
        oracle,
        BroadcastConfig {
            interval: config.broadcast_interval,
            suppression_bps: config.suppression_bps,
            min_signer_balance: config.min_signer_balance,
            ..Default::default()
        },
    ));
    let notices = indexer_handle.subscribe_notices();
    let mut broadcaster_task = tokio::spawn(broadcaster.run(notices, shutdown.clone()));

    // Surface indexer phase transitions (pauses, resumes) in the supervisor log.
    let mut phase_handle = indexer_handle.clone();
    tokio::spawn(async move {
        while let Some(phase) = phase_handle.phase_changed().await {
            info!(phase = phase.as_str(), "Indexer phase transition");
        }
    });

    info!("All components running");

    let (mut indexer_done, mut http_done, mut broadcaster_done) = (false, false, false);

    // A long-lived loop ending on its own is an unrecoverable runtime fault.
    let fault = tokio::select! {
        res = wait_for_shutdown_signal() => {
            match res {
                Ok(()) => {
                    info!("Shutdown signal received; draining");
                    false
                }
                Err(e) => {
                    error!(error = %e, "Signal handler failure");
                    true
                }
            }
        }
        res = &mut indexer_task => {
            indexer_done = true;
            error!(result = ?res, "Indexer task ended unexpectedly");
            true
        }
        res = &mut http_task => {
            http_done = true;
            error!(result = ?res, "HTTP server ended unexpectedly");
            true
        }
        res = &mut broadcaster_task => {
            broadcaster_done = true;
            error!(result = ?res, "Broadcaster task ended unexpectedly");
            true
        }
    };
    shutdown.cancel();

    // Indexer stops at its loop boundary, the broadcaster drains any
    // in-flight submission, the HTTP server finishes open requests.
    let drained = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        if !indexer_done {
            let _ = indexer_task.await;
        }
        if !broadcaster_done {
            let _ = broadcaster_task.await;
        }
        if !http_done {
            let _ = http_task.await;
        }
    })
    .await
    .is_ok();

    if !drained {
        error!(
            deadline_secs = SHUTDOWN_DEADLINE.as_secs(),
            "Shutdown deadline exceeded; exiting regardless"
        );
    } else if !fault {
        info!("Clean shutdown");
    }
    Ok(!fault && drained)
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    ╔╦╗┌─┐┌┬┐┌─┐╦  ┌─┐┌┐┌┌┬┐
     ║║│ ││││├─┤║  ├┤ │││ ││
    ═╩╝└─┘┴ ┴┴ ┴╩═╝└─┘┘└┘─┴┘
    Off-Chain Services v0.1.0
    "#
    );
}
