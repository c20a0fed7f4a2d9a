//! Shelf product detection service
//!
//! Serves YOLO detections over gRPC (and optionally REST), hot-reloading
//! the model whenever its file changes on disk.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tonic::transport::Server as TonicServer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use shelfsight::api::{create_rest_router, AppState, GrpcHandler};
use shelfsight::config::Config;
use shelfsight::engine::{DetectionEngine, ModelWatcher, OpenVinoLoader};
use shelfsight::service::DetectionService;

fn init_logging(config: &Config) {
    let level = if config.debug {
        Level::DEBUG
    } else {
        Level::from_str(&config.log_level).unwrap_or(Level::INFO)
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// Resolves on Ctrl-C or SIGTERM.
async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    // A dropped sender also means shut down.
    let _ = rx.wait_for(|stop| *stop).await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let (config, config_note) = match Config::load_optional(&config_path)? {
        Some(config) => (config, format!("loaded from {}", config_path)),
        None => (Config::default(), format!("defaults ({} not found)", config_path)),
    };
    let config = config.with_env()?;

    init_logging(&config);

    info!("Starting detection service v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration {}:", config_note);
    info!("  gRPC address: {}", config.server.grpc_address());
    info!("  REST address: {}", config.server.rest_address().as_deref().unwrap_or("disabled"));
    info!("  Max workers: {}", config.server.max_workers);
    info!("  Model path: {}", config.model.model_path().display());
    info!("  Watch interval: {}s", config.model.watch_interval);
    info!(
        "  Defaults: confidence {}, iou {}, input {}",
        config.model.default_confidence, config.model.default_iou, config.model.input_size
    );
    info!("  Device: {}", config.inference.device);
    info!(
        "  Catalog: {} every {}s",
        config.catalog.grpc_address, config.catalog.sync_interval
    );

    // Detection engine
    let loader = Arc::new(OpenVinoLoader::new(config.inference.device.clone()));
    let engine = Arc::new(DetectionEngine::new(config.model.clone(), loader));
    let service = Arc::new(DetectionService::new(engine.clone(), config.server.max_workers));

    if !service.reload().await {
        warn!("No model served yet, waiting for {}", engine.model_path().display());
    }

    // Model file watcher
    let watcher = ModelWatcher::new(
        engine.model_path(),
        config.model.watch_interval()?,
    );
    let watched = engine.clone();
    watcher.start(Arc::new(move || Ok::<_, anyhow::Error>(watched.reload())))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Optional REST server
    let rest_task = match config.server.rest_address() {
        Some(addr) => {
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind REST listener on {}", addr))?;
            info!("REST server listening on {}", addr);

            let router = create_rest_router(Arc::new(AppState {
                service: service.clone(),
            }));
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(wait_for(rx))
                    .await
            }))
        }
        None => None,
    };

    // gRPC server
    let grpc_addr: SocketAddr = config
        .server
        .grpc_address()
        .parse()
        .with_context(|| format!("invalid gRPC address {}", config.server.grpc_address()))?;
    info!("gRPC server listening on {}", grpc_addr);

    let grpc = GrpcHandler::new(service.clone()).into_server();
    let mut grpc_task = tokio::spawn(
        TonicServer::builder()
            .add_service(grpc)
            .serve_with_shutdown(grpc_addr, wait_for(shutdown_rx)),
    );

    tokio::select! {
        res = &mut grpc_task => {
            watcher.stop().await;
            res.context("gRPC server task failed")?
                .context("gRPC server stopped")?;
            return Ok(());
        }
        _ = termination_signal() => {}
    }

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    watcher.stop().await;

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    match tokio::time::timeout(grace, grpc_task).await {
        Ok(Ok(Ok(()))) => info!("gRPC server drained"),
        Ok(Ok(Err(e))) => error!("gRPC server error during shutdown: {}", e),
        Ok(Err(e)) => error!("gRPC server task failed: {}", e),
        Err(_) => warn!("In-flight requests still running after {}s, exiting", grace.as_secs()),
    }

    if let Some(task) = rest_task {
        if tokio::time::timeout(grace, task).await.is_err() {
            warn!("REST server did not drain within {}s", grace.as_secs());
        }
    }

    info!("Service stopped");
    Ok(())
}
