use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use avatar_prep_core::{
    load_config,
    models::{LocalModelHub, ModelHub, ObjectStoreModelHub, RemoteModelLoader},
    validate_config, ArtifactStore, Config, FfmpegDecoder, FfmpegEncoder, HubBackend,
    InMemoryObjectStore, ModelRegistry, ObjectStore, PipelineOrchestrator, S3ObjectStore,
    StorageBackend,
};

use avatar_prep_server::api::create_router;
use avatar_prep_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("AVATAR_PREP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        "avatar-prep {} starting (config {})",
        VERSION,
        &config_hash[..16]
    );

    // Create object store
    let store: Arc<dyn ObjectStore> = match config.storage.backend {
        StorageBackend::S3 => {
            let s3_config = config
                .storage
                .s3
                .as_ref()
                .context("S3 backend selected but no [storage.s3] section provided")?;
            info!(
                "Using S3 object store (bucket: {}, endpoint: {})",
                s3_config.bucket,
                s3_config.endpoint.as_deref().unwrap_or("aws")
            );
            Arc::new(S3ObjectStore::new(s3_config))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory object store; artifacts are lost on shutdown");
            Arc::new(InMemoryObjectStore::new())
        }
    };

    // Create orchestrator if an inference service is configured
    let orchestrator = match &config.models.inference {
        Some(inference) => {
            info!("Using inference service at {}", inference.url);
            let orchestrator = create_orchestrator(&config, inference, store)?;
            orchestrator.start().await;
            info!("Pipeline orchestrator started");
            Some(Arc::new(orchestrator))
        }
        None => {
            warn!("No [models.inference] configured; job endpoints are disabled");
            None
        }
    };

    // Create app state and router
    let state = Arc::new(AppState::new(config.clone(), orchestrator.clone()));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    if let Some(ref orch) = orchestrator {
        info!("Stopping orchestrator...");
        orch.stop().await;
        info!("Orchestrator stopped");
    }

    Ok(())
}

fn create_orchestrator(
    config: &Config,
    inference: &avatar_prep_core::models::InferenceServiceConfig,
    store: Arc<dyn ObjectStore>,
) -> Result<PipelineOrchestrator> {
    let loader =
        RemoteModelLoader::new(inference).context("Failed to create inference client")?;

    let hub: Arc<dyn ModelHub> = match config.models.hub.backend {
        HubBackend::Local => {
            info!("Resolving models from {:?}", config.models.hub.local_dir);
            Arc::new(LocalModelHub::new(&config.models.hub.local_dir))
        }
        HubBackend::ObjectStore => {
            info!(
                "Resolving models from object store prefix {:?} (cache {:?})",
                config.models.hub.object_prefix, config.models.hub.cache_dir
            );
            Arc::new(ObjectStoreModelHub::new(
                Arc::clone(&store),
                config.models.hub.object_prefix.clone(),
                config.models.hub.cache_dir.clone(),
            ))
        }
    };

    let mut registry = ModelRegistry::new(Arc::new(loader))
        .with_hub(hub)
        .with_max_concurrent_per_model(config.models.max_concurrent_per_model);
    for pinned in &config.models.local_weights {
        info!("Pinning model {} to {:?}", pinned.key, pinned.path);
        registry = registry.with_local_weights(pinned.key.clone(), pinned.path.clone());
    }

    let artifacts = ArtifactStore::new(store, config.storage.retry.clone());

    Ok(PipelineOrchestrator::new(
        config.orchestrator.clone(),
        Arc::new(registry),
        Arc::new(FfmpegDecoder::new(config.media.clone())),
        artifacts,
        Arc::new(FfmpegEncoder::new(config.media.clone())),
    )
    .with_default_job_config(config.pipeline.clone()))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
