//! Detector Service - Multi-channel RTSP video analytics
//!
//! Main entry point.

use detector_service::{
    alert_sink::AlertSink,
    config_store::ConfigStore,
    detector,
    frame_bus::FrameBus,
    reporter::Reporter,
    rules::SuppressionTable,
    state::{AppConfig, AppState},
    supervisor::{ChannelManager, PipelineContext},
    web_api,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "detector_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Detector Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        alert_dir = %config.alert_dir.display(),
        model_dir = %config.model_dir.display(),
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.alert_dir)?;
    std::fs::create_dir_all(&config.model_dir)?;

    // Media libraries
    ffmpeg_next::init()?;
    detector::init_environment()?;
    tracing::info!("Codec and inference environments initialized");

    // Create database pool
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;
    tracing::info!("Database connected");

    // Initialize components
    let config_store = Arc::new(ConfigStore::new(pool.clone()).await?);
    tracing::info!("ConfigStore initialized");

    let suppression = Arc::new(SuppressionTable::new());
    let reporter = Arc::new(Reporter::new()?);
    let channels = Arc::new(ChannelManager::new());

    let frame_bus = Arc::new(FrameBus::new());
    frame_bus.start(config_store.clone());
    tracing::info!("FrameBus started");

    let alert_sink = Arc::new(AlertSink::new(
        frame_bus.clone(),
        suppression.clone(),
        config_store.service().clone(),
        config_store.clone(),
        reporter.clone(),
        tokio::runtime::Handle::current(),
        config.alert_dir.clone(),
    ));

    let state = AppState {
        pool,
        config,
        config_store,
        frame_bus,
        suppression,
        alert_sink,
        reporter,
        channels,
    };

    // Restore supervisors for channels that were enabled
    let ctx = PipelineContext {
        config_store: state.config_store.clone(),
        service: state.config_store.service().clone(),
        frame_bus: state.frame_bus.clone(),
        suppression: state.suppression.clone(),
        alert_sink: state.alert_sink.clone(),
        runtime: tokio::runtime::Handle::current(),
        model_dir: state.config.model_dir.clone(),
    };
    for channel in state.config_store.cached_channels().await {
        if channel.enabled {
            let channel_id = channel.id;
            if let Err(e) = state.channels.start(ctx.clone(), channel) {
                tracing::error!(channel_id, error = %e, "Channel restore failed");
            }
        }
    }
    tracing::info!(
        running = state.channels.running_count(),
        "Enabled channels restored"
    );

    // Create router with static file serving
    let static_dir = state.config.static_dir.clone();
    let serve_dir = ServeDir::new(&static_dir)
        .not_found_service(ServeFile::new(static_dir.join("index.html")));

    let app = web_api::create_router(state.clone())
        .fallback_service(serve_dir)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    state.channels.stop_all();
    state.frame_bus.stop();
    state.reporter.teardown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Shutdown signal handler failed");
    }
}
