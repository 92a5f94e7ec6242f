//! boletabot - chat-based ticket intake
//!
//! Receives ticket numbers over a chat transport (typed or photographed),
//! walks each sender through registration and confirmation, and persists
//! confirmed batches to sqlite.

mod api;
mod config;
mod db;
mod dispatcher;
mod ocr;
mod state_machine;
mod supervisor;
mod transport;

use api::{create_router, AppState};
use config::Config;
use db::Database;
use dispatcher::Dispatcher;
use ocr::TesseractOcr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use supervisor::ConnectionSupervisor;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{BridgeFactory, ClientSlot};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boletabot=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    let shutdown = CancellationToken::new();
    let slot: ClientSlot = Arc::new(tokio::sync::RwLock::new(None));
    let (inbound_tx, inbound_rx) = mpsc::channel(64);

    // Connection supervisor owns the chat client lifecycle.
    let factory = BridgeFactory::new(config.bridge_addr.clone());
    let sup = ConnectionSupervisor::new(
        factory,
        config.supervisor(),
        Arc::clone(&slot),
        inbound_tx,
        shutdown.clone(),
    );
    let connection = sup.state_handle();
    let supervisor_task = tokio::spawn(sup.run());

    // Dispatcher consumes inbound messages.
    let ocr = Arc::new(TesseractOcr::new(config.tesseract_command.clone()));
    let dispatcher = Dispatcher::new(
        db,
        ocr,
        Arc::clone(&slot),
        inbound_rx,
        shutdown.clone(),
    );
    let dispatcher_task = tokio::spawn(dispatcher.run());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState { slot, connection })
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!("boletabot listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // The HTTP server stopped, make sure the workers stop too.
    shutdown.cancel();
    supervisor_task.await?;
    dispatcher_task.await?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM and cancels the shared token so the
/// supervisor and dispatcher wind down alongside the HTTP server.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
