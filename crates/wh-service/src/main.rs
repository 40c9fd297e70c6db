//! Webhooks Service
//!
//! Entry point for the webhooks event-delivery service.
//!
//! # Startup Flow
//!
//! 1. Load configuration from the environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect the storage backend and resync the in-memory registries
//! 4. Register configured permanent hooks
//! 5. Wire the event pipeline (normalizer -> processor -> dispatcher)
//! 6. Spawn the mapping cleanup task and the input listener
//! 7. Start the HTTP API server
//! 8. Wait for shutdown signal

#![allow(clippy::too_many_lines)] // startup wiring is one long straight line

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wh_service::api::{self, AppState};
use wh_service::config::{Config, InputSource};
use wh_service::delivery::{DeliverySettings, WebHooksDispatcher};
use wh_service::events::EventNormalizer;
use wh_service::input::{InputListener, RedisPubSubInput};
use wh_service::observability::metrics::init_metrics_recorder;
use wh_service::processor::{EventProcessor, OutputConsumer};
use wh_service::repositories::{HookRepository, IdMappingRepository, UserMappingRepository};
use wh_service::{storage, tasks};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tracing goes first so every later failure is visible
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wh_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Webhooks Service");

    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        server_domain = %config.server_domain,
        key_namespace = %config.key_namespace,
        storage_backend = ?config.storage_backend,
        inbound_channels = config.inbound_channels.len(),
        permanent_urls = config.permanent_urls.len(),
        "Configuration loaded"
    );

    // The recorder has to be in place before anything records a metric
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus recorder");
        e
    })?;
    info!("Prometheus recorder installed");

    // Connect storage and rebuild the in-memory registries
    info!("Connecting storage backend...");
    let store = storage::connect(&config).await.map_err(|e| {
        error!(error = %e, "Failed to connect storage backend");
        e
    })?;
    info!("Storage backend connected");

    let hooks = Arc::new(HookRepository::new(
        Arc::clone(&store),
        &config.key_namespace,
    ));
    let id_mappings = Arc::new(IdMappingRepository::new(
        Arc::clone(&store),
        &config.key_namespace,
    ));
    let user_mappings = Arc::new(UserMappingRepository::new(
        Arc::clone(&store),
        &config.key_namespace,
    ));

    let hook_count = hooks.resync().await.map_err(|e| {
        error!(error = %e, "Failed to resync hooks from storage");
        e
    })?;
    let mapping_count = id_mappings.resync().await.map_err(|e| {
        error!(error = %e, "Failed to resync meeting mappings from storage");
        e
    })?;
    let user_count = user_mappings.resync().await.map_err(|e| {
        error!(error = %e, "Failed to resync user mappings from storage");
        e
    })?;
    info!(
        hook_count,
        mapping_count, user_count, "Registries resynced from storage"
    );

    // Register configured permanent hooks
    let created = hooks
        .ensure_permanent(&config.permanent_urls, config.permanent_get_raw)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to register permanent hooks");
            e
        })?;
    if created > 0 {
        info!(created, "Registered permanent hooks from configuration");
    }

    let shutdown_token = CancellationToken::new();
    tokio::spawn(trigger_shutdown_on_signal(shutdown_token.clone()));

    // Wire the event pipeline
    let dispatcher = WebHooksDispatcher::new(
        Arc::clone(&hooks),
        Arc::clone(&id_mappings),
        DeliverySettings::from_config(&config),
        shutdown_token.child_token(),
    )
    .map_err(|e| {
        error!(error = %e, "Failed to build webhook dispatcher");
        e
    })?;
    let outputs: Vec<Arc<dyn OutputConsumer>> = vec![Arc::new(dispatcher)];

    let normalizer = EventNormalizer::new(Arc::clone(&id_mappings), Arc::clone(&user_mappings));
    let processor = Arc::new(EventProcessor::new(
        normalizer,
        Arc::clone(&id_mappings),
        Arc::clone(&user_mappings),
        outputs,
    ));

    // Spawn the mapping cleanup task
    tokio::spawn(tasks::start_mapping_cleanup(
        Arc::clone(&id_mappings),
        Arc::clone(&user_mappings),
        config.mapping_timeout,
        config.mapping_cleanup_interval,
        shutdown_token.child_token(),
    ));
    info!("Mapping cleanup task started");

    // Spawn the input listener
    match config.input_source {
        InputSource::Redis => {
            let listener = RedisPubSubInput::new(&config, Arc::clone(&processor));
            let input_token = shutdown_token.child_token();
            tokio::spawn(async move {
                if let Err(e) = listener.run(input_token).await {
                    error!(error = %e, "Input listener exited with error");
                }
            });
            info!("Redis pub/sub input listener started");
        }
    }

    // Build the HTTP API
    let state = Arc::new(AppState {
        hooks: Arc::clone(&hooks),
        store: Arc::clone(&store),
        shared_secret: config.shared_secret.clone(),
        permanent_urls: config.permanent_urls.clone(),
        key_namespace: config.key_namespace.clone(),
    });
    let app = api::build_routes(state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        e
    })?;

    // Bind before serving to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind API server");
        e
    })?;
    info!(addr = %addr, "Webhooks API listening");

    let server_token = shutdown_token.child_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("API server shutting down");
        })
        .await
        .map_err(|e| {
            error!(error = %e, "API server failed");
            e
        })?;

    // Give in-flight callback deliveries a moment to observe cancellation
    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Webhooks Service shutdown complete");
    Ok(())
}

/// Cancels `shutdown_token` once SIGINT or SIGTERM arrives.
///
/// Cancellation propagates to every child token: the input listener, the
/// cleanup task, in-flight emitters, and the server's graceful shutdown.
async fn trigger_shutdown_on_signal(shutdown_token: CancellationToken) {
    #[cfg(unix)]
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("SIGTERM received");
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        r = signal::ctrl_c() => match r {
            Ok(()) => info!("SIGINT received"),
            Err(e) => error!(error = %e, "Cannot listen for SIGINT"),
        },
        () = sigterm => {}
    }

    info!("Stopping the service");
    shutdown_token.cancel();
}
