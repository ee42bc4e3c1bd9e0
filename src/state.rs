//! Application state
//!
//! Holds all shared components and state

use crate::alert_sink::AlertSink;
use crate::config_store::ConfigStore;
use crate::frame_bus::FrameBus;
use crate::reporter::Reporter;
use crate::rules::SuppressionTable;
use crate::supervisor::ChannelManager;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Directory for full-quality alert snapshots
    pub alert_dir: PathBuf,
    /// Directory holding ONNX model files
    pub model_dir: PathBuf,
    /// Bundled web UI directory
    pub static_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://detector.db?mode=rwc".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            alert_dir: std::env::var("ALERT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("alerts")),
            model_dir: std::env::var("MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            static_dir: std::env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static")),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database pool
    pub pool: SqlitePool,
    /// Application config
    pub config: AppConfig,
    /// ConfigStore (SSoT for channels, algorithm configs, stream/report config)
    pub config_store: Arc<ConfigStore>,
    /// FrameBus (WebSocket frame + alert fan-out)
    pub frame_bus: Arc<FrameBus>,
    /// Alert suppression windows
    pub suppression: Arc<SuppressionTable>,
    /// AlertSink (preview fan-out + persistence)
    pub alert_sink: Arc<AlertSink>,
    /// Reporter (HTTP/MQTT alert reporting)
    pub reporter: Arc<Reporter>,
    /// ChannelManager (per-channel pipeline threads)
    pub channels: Arc<ChannelManager>,
}
