#![doc = include_str!("../README.md")]

use anyhow::Context;
use chunkwise_server::server::{
    artifact::FsArtifactStore,
    assembler::Assembler,
    config::{CliArgs, ServerConfig},
    coordinator::UploadCoordinator,
    entity::MemoryEntityStore,
    http::{AppState, router},
    orphans::OrphanLedger,
    registry::SessionRegistry,
    store::FsChunkStore,
    sweeper::Sweeper,
    telemetry::init_telemetry,
};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let chunks = Arc::new(
        FsChunkStore::open(config.chunk_dir())
            .await
            .with_context(|| format!("failed to open chunk store at {:?}", config.chunk_dir()))?,
    );
    tracing::info!("Staging chunks under {:?}", chunks.root());
    let artifacts = Arc::new(
        FsArtifactStore::open(config.artifact_dir())
            .await
            .with_context(|| {
                format!("failed to open artifact store at {:?}", config.artifact_dir())
            })?,
    );
    let registry = Arc::new(SessionRegistry::new());
    let orphans = Arc::new(OrphanLedger::new());
    let assembler = Assembler::new(
        chunks.clone(),
        artifacts,
        Arc::new(MemoryEntityStore::new()),
        orphans.clone(),
    );
    let coordinator = Arc::new(UploadCoordinator::new(
        config.limits,
        registry.clone(),
        chunks.clone(),
        assembler,
    ));

    let shutdown = CancellationToken::new();
    let sweeper = Sweeper::new(registry, chunks, config.session_timeout);
    let sweeper_task = tokio::spawn(sweeper.run(config.sweep_interval, shutdown.clone()));

    let app = router(
        AppState {
            coordinator,
            orphans,
        },
        config.body_limit(),
    );

    let listener = TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;
    log_startup_info(&config);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // The signal handler cancels the token; make sure the sweeper also stops
    // if the server exited on its own.
    shutdown.cancel();
    if tokio::time::timeout(config.shutdown_timeout, sweeper_task)
        .await
        .is_err()
    {
        tracing::warn!("session sweeper did not stop within the shutdown timeout");
    }

    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting upload service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting upload service on {} (data dir {:?})",
            config.server_addr,
            config.data_dir
        );
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    shutdown.cancel();
}
