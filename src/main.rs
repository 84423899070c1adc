use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bidhouse::api::{self, AppState};
use bidhouse::bus::LocalBus;
use bidhouse::cache::MemoryCache;
use bidhouse::config::Config;
use bidhouse::db::{init_db, AuctionStore};
use bidhouse::engine::lifecycle::spawn_sweeper;
use bidhouse::fabric::LogChatSink;
use bidhouse::TokenManager;

/// Background tasks get this long to observe shutdown before a hard abort.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Configuration error: {}", err);
            std::process::exit(1);
        }
    };

    let pool = match init_db(&config.db_path, config.db_max_connections).await {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("Failed to initialize database: {}", err);
            std::process::exit(1);
        }
    };

    let state = AppState::new(
        Arc::new(AuctionStore::new(pool)),
        Arc::new(MemoryCache::new()),
        Arc::new(LocalBus::new()),
        Arc::new(LogChatSink),
        TokenManager::new(&config.jwt_secret),
        config.chat_enabled,
    );

    // Background tasks: room fan-out, proxy bidding, the lifecycle sweeper.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let tasks = vec![
        state.fabric.hub.spawn(&state.bus, shutdown_rx.clone()),
        state.auto_bids.spawn(&state.bus, shutdown_rx.clone()),
        spawn_sweeper(state.lifecycle.clone(), shutdown_rx.clone()),
    ];

    let app = api::create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("Failed to bind to {}: {}", addr, err);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = serve.await {
        eprintln!("Server error: {}", err);
        std::process::exit(1);
    }

    // Stop background tasks; abort stragglers after the grace period.
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let abort = task.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            tracing::warn!("background task did not stop in time, aborting");
            abort.abort();
        }
    }

    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
