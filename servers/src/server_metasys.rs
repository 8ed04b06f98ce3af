//! # Building-Automation Telemetry Ingestion Server
//!
//! Logs in to the platform, keeps one event stream open and routes every
//! present-value update to PostgreSQL and the time-series sink, recording the
//! last event id in Redis. A small HTTP API manages subscriptions and exposes
//! the dispatch health.
//!
//! Startup order: configuration, logging, stores, engine, then the HTTP
//! listener. A failed initial login or exhausted reconnects end the process
//! with an error; `/stop` only stops the stream and leaves the API up.

use anyhow::{Context, Result, anyhow};
use lib_ingest::connections::{CacheHandler, Database};
use lib_ingest::core::{
    Checkpoint, DispatchDeps, DispatchHealth, EventDispatcher, PlatformApi, SubscriptionRegistry, Supervisor,
    TokenManager,
};
use lib_ingest::ingestors::MetasysClient;
use lib_ingest::sinks::InfluxSink;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod metasys_logic;
use metasys_logic::{api, config, logger, state};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config().context("failed to load configuration")?;
    let settings = config.resolve().context("invalid configuration")?;
    let _log_guard = logger::setup_logging(&settings.log)?;
    info!(
        config_path = ?config.config_path,
        base_url = %settings.ingest.base_url,
        port = settings.port,
        "Configuration loaded"
    );

    // --- Stores ---
    let database = Database::new(&settings.database_url, settings.db_pool_size)
        .await
        .context("failed to connect to PostgreSQL")?;
    database.ensure_schema().await.context("failed to prepare database schema")?;
    let database = Arc::new(database);

    let cache = CacheHandler::new(&settings.redis_url)
        .await
        .context("failed to connect to Redis")?;

    // --- Engine ---
    let platform: Arc<dyn PlatformApi> =
        Arc::new(MetasysClient::new(&settings.ingest).context("failed to build platform client")?);
    let tokens = Arc::new(TokenManager::new(
        platform.clone(),
        settings.ingest.username.clone(),
        settings.ingest.password.clone(),
        settings.ingest.refresh_window,
    ));
    let registry = Arc::new(SubscriptionRegistry::new(platform.clone(), tokens.clone(), database.clone()));
    let checkpoint = Arc::new(Checkpoint::new(Arc::new(cache)));
    let sink = Arc::new(
        InfluxSink::new(&settings.influx, settings.ingest.http_retries).context("failed to build metrics sink")?,
    );

    let (health_tx, health_rx) = watch::channel(DispatchHealth::default());
    let dispatcher = EventDispatcher::new(
        DispatchDeps {
            api: platform.clone(),
            tokens: tokens.clone(),
            events: database,
            sink,
            checkpoint: checkpoint.clone(),
            keepalive_interval: settings.ingest.keepalive_interval,
            maintenance_tick: settings.ingest.maintenance_tick,
        },
        health_tx,
    );
    let supervisor = Supervisor::new(
        platform,
        tokens,
        registry.clone(),
        checkpoint,
        dispatcher,
        settings.ingest.reconnect.clone(),
    );

    let shutdown = CancellationToken::new();
    let stream_cancel = shutdown.child_token();
    let mut supervisor_task = tokio::spawn(supervisor.run(stream_cancel.clone()));

    // --- HTTP API ---
    let app_state = state::AppState::new(registry, health_rx, stream_cancel);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "Control API listening");

    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, api::router(app_state))
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    let mut supervisor_done = false;
    let outcome = tokio::select! {
        _ = shutdown_signal() => Ok(()),
        joined = &mut supervisor_task => {
            supervisor_done = true;
            match joined {
                Ok(Ok(())) => {
                    info!("Stream supervisor stopped; control API stays up until shutdown");
                    shutdown_signal().await;
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!(kind = e.kind(), error = %e, "Stream supervisor terminated");
                    Err(anyhow::Error::new(e).context("stream supervisor terminated"))
                }
                Err(e) => Err(anyhow!("stream supervisor task failed: {}", e)),
            }
        }
    };

    // Send shutdown signal to all components
    shutdown.cancel();
    if !supervisor_done {
        if let Err(e) = supervisor_task.await {
            warn!(error = %e, "Stream supervisor task did not finish cleanly");
        }
    }
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Control API stopped with an error"),
        Err(e) => warn!(error = %e, "Control API task failed"),
    }

    info!("Shutdown complete.");
    outcome
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("Ctrl-C received, initiating shutdown.");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
                info!("SIGTERM received, initiating shutdown.");
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
