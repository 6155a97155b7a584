//! RTC Coordinator
//!
//! Real-time room, media routing and chat fan-out service.
//!
//! # Servers
//!
//! - HTTP server for the WebSocket session protocol and chat REST API
//!   (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Connect the document store (`RedisChatStore`)
//! 4. Start the media worker and the actor system (`RoomRegistryHandle`)
//! 5. Start the worker supervisor
//! 6. Start the health and API servers
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use common::secret::ExposeSecret;
use rtc_coordinator::actors::{ActorMetrics, RoomRegistryHandle, RoomSettings};
use rtc_coordinator::chat::{ChatService, RedisChatStore};
use rtc_coordinator::config::Config;
use rtc_coordinator::media::supervisor::WORKER_DEATH_EXIT_DELAY;
use rtc_coordinator::media::{
    EngineLauncher, LocalEngineLauncher, SupervisorOutcome, WorkerSupervisor,
};
use rtc_coordinator::observability::metrics::init_metrics_recorder;
use rtc_coordinator::observability::{health_router, HealthState};
use rtc_coordinator::routes::{build_routes, AppState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often store readiness is re-checked.
const STORE_CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first: it decides the log format.
    let config = Config::from_env().context("failed to load configuration")?;

    init_tracing(&config);

    info!("Starting RTC Coordinator");
    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        max_rooms = config.max_rooms,
        max_peers_per_room = config.max_peers_per_room,
        recv_transport_policy = ?config.recv_transport_policy,
        worker_restart_policy = ?config.worker_restart_policy,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(anyhow::Error::msg)?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    info!("Connecting to Redis...");
    let store = RedisChatStore::connect(config.redis_url.expose_secret())
        .await
        .context("failed to connect to Redis")?;
    let chat = Arc::new(ChatService::new(Arc::new(store), config.store_timeout));
    health_state.set_store_ready(chat.store_ready().await);
    info!("Redis connection established");

    info!("Starting media worker...");
    let launcher = Arc::new(LocalEngineLauncher {
        min_port: config.min_port,
        max_port: config.max_port,
    });
    let engine = launcher
        .launch()
        .await
        .context("failed to start media worker")?;

    let actor_metrics = ActorMetrics::new();
    let registry = RoomRegistryHandle::new(
        config.instance_id.clone(),
        Arc::clone(&engine),
        RoomSettings::from_config(&config),
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    // Servers and background tasks stop when the registry's token is cancelled
    let shutdown_token = registry.child_token();

    let supervisor = WorkerSupervisor::new(
        config.worker_restart_policy,
        launcher,
        registry.clone(),
        Arc::clone(&health_state),
        shutdown_token.child_token(),
    );
    tokio::spawn(async move {
        if supervisor.run(engine).await == SupervisorOutcome::Fatal {
            // Let logs and metrics flush, then hand restart to the process supervisor.
            tokio::time::sleep(WORKER_DEATH_EXIT_DELAY).await;
            std::process::exit(1);
        }
    });

    // Store readiness check
    let check_chat = Arc::clone(&chat);
    let check_health = Arc::clone(&health_state);
    let check_token = shutdown_token.child_token();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STORE_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = check_token.cancelled() => break,
                _ = ticker.tick() => {
                    let ready = check_chat.store_ready().await;
                    if !ready {
                        warn!("Document store is not answering");
                    }
                    check_health.set_store_ready(ready);
                }
            }
        }
    });

    // Health server (liveness, readiness, /metrics)
    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .with_context(|| format!("invalid health bind address {}", config.health_bind_address))?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("failed to bind health server to {health_addr}"))?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // API server (WebSocket + chat REST)
    let api_addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address))?;

    let state = Arc::new(AppState {
        registry: registry.clone(),
        chat,
        health: Arc::clone(&health_state),
        metrics: actor_metrics,
    });
    let api_app = build_routes(state, &config.cors_origin);

    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind API server to {api_addr}"))?;
    info!(addr = %api_addr, "API server bound successfully");

    let api_shutdown_token = shutdown_token.child_token();
    let api_server = tokio::spawn(async move {
        let server = axum::serve(api_listener, api_app).with_graceful_shutdown(async move {
            api_shutdown_token.cancelled().await;
            info!("API server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "API server failed");
        }
    });

    info!("RTC Coordinator running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_draining();

    // Stop accepting rooms and close the live ones (peers get room-closed)
    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Room registry shutdown error");
    }

    // Propagates to connections, the supervisor and both servers
    registry.cancel();

    if tokio::time::timeout(Duration::from_secs(30), api_server)
        .await
        .is_err()
    {
        warn!("API server did not stop within 30s");
    }

    info!("RTC Coordinator shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.observability.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(rtc_coordinator::config::DEFAULT_LOG_FILTER));

    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Resolves on Ctrl+C or SIGTERM. A signal that cannot be hooked is logged
/// and ignored; the other one still triggers shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
