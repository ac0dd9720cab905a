/// Server setup and initialization
///
/// Wires together all components: store, node registry, execution engine, trigger
/// manager and HTTP routes. Provides the application factory used by `main` and by
/// the integration tests.

use crate::{
    api::{create_api_routes, AppState},
    config::Config,
    flow::storage::{FlowStore, JsonFileStore},
    runtime::{capabilities::Capabilities, engine::ExecutionEngine, registry::NodeRegistry},
    service::FlowService,
    triggers::{EventBus, TriggerManager, WebhookRoutes},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// A wired application: the router plus the service behind it
pub struct App {
    pub router: Router,
    pub service: FlowService,
}

/// Build the application from an already-constructed engine
///
/// Starts the trigger manager and registers every enabled flow in the store.
pub async fn build_app(engine: ExecutionEngine, config: &Config) -> Result<App> {
    tracing::info!("⏰ Initializing trigger manager");
    let triggers = TriggerManager::new(
        engine.clone(),
        EventBus::default(),
        Arc::new(WebhookRoutes::new()),
        config.trigger_config(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to initialize trigger manager: {}", e))?;
    let service = FlowService::new(engine, Arc::new(triggers));

    tracing::info!("📥 Registering triggers of stored flows");
    let report = service
        .reload_triggers()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load flows from storage: {}", e))?;
    for error in &report.errors {
        tracing::warn!("⚠️ {}", error);
    }

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let router = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_api_routes())
        .with_state(AppState {
            service: service.clone(),
        });

    tracing::info!("✅ Application initialized ({} flows active)", report.registered.len());
    Ok(App { router, service })
}

/// Create the application with the file store and system capabilities
pub async fn create_app(config: &Config) -> Result<App> {
    tracing::info!("📁 Opening data directory: {}", config.storage.data_dir.display());
    let store: Arc<dyn FlowStore> = Arc::new(
        JsonFileStore::open(&config.storage.data_dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open flow store: {}", e))?,
    );

    tracing::info!("⚙️ Registering built-in node executors");
    let registry = NodeRegistry::with_builtins(Capabilities::system(config.workbook_dir()));
    tracing::debug!("📋 Node types: {}", registry.node_types().join(", "));

    tracing::info!("🚀 Initializing execution engine ({} workers)", config.runtime.workers);
    let engine = ExecutionEngine::new(Arc::new(registry), store, config.engine_config());

    build_app(engine, config).await
}

/// Start the HTTP server with the given configuration
///
/// Runs until Ctrl-C, then shuts the trigger manager down so in-flight executions
/// get their grace period.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowdeck=info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting flowdeck server...");
    let app = create_app(&config).await?;

    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown signal received");
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
