//! ConfigStore - Single Source of Truth (SSoT)
//!
//! ## Responsibilities
//!
//! - Channel inventory and lifecycle flags
//! - Per-channel algorithm configs (ROIs, alert rules)
//! - Global stream / push / GB28181 / report configuration
//! - Alert record persistence
//!
//! ## Design Principles
//!
//! - SSoT: all configuration reads/writes go through here
//! - Supervisor threads read the in-memory cache each loop iteration;
//!   REST mutations replace cached rows whole, so readers never observe
//!   a half-applied update

mod repository;
mod service;
mod types;

pub use repository::ConfigRepository;
pub use service::ConfigService;
pub use types::*;

use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// ConfigStore instance
pub struct ConfigStore {
    service: ConfigService,
    /// In-memory cache for frequent reads
    cache: Arc<RwLock<ConfigCache>>,
}

impl ConfigStore {
    /// Create new ConfigStore, initializing the schema
    pub async fn new(pool: SqlitePool) -> crate::Result<Self> {
        let repo = ConfigRepository::new(pool);
        let service = ConfigService::new(repo);
        service.init_schema().await?;

        let cache = Arc::new(RwLock::new(ConfigCache::default()));

        let store = Self { service, cache };

        // Initial cache load
        store.refresh_cache().await?;

        Ok(store)
    }

    /// Get service reference
    pub fn service(&self) -> &ConfigService {
        &self.service
    }

    /// Refresh in-memory cache from the database
    pub async fn refresh_cache(&self) -> crate::Result<()> {
        let channels = self.service.list_channels().await?;

        let mut algorithm_configs = HashMap::new();
        for channel in &channels {
            let config = self.service.get_algorithm_config(channel.id).await?;
            algorithm_configs.insert(channel.id, config);
        }

        let stream_config = self.service.get_stream_config().await?;
        let push_stream_config = self.service.get_push_stream_config().await?;
        let gb28181_config = self.service.get_gb28181_config().await?;
        let report_config = self.service.get_report_config().await?;

        let mut cache = self.cache.write().await;
        cache.channels = channels;
        cache.algorithm_configs = algorithm_configs;
        cache.stream_config = stream_config;
        cache.push_stream_config = push_stream_config;
        cache.gb28181_config = gb28181_config;
        cache.report_config = report_config;

        tracing::info!(
            channels = cache.channels.len(),
            "ConfigStore cache refreshed"
        );

        Ok(())
    }

    /// Get cached channels (fast read)
    pub async fn cached_channels(&self) -> Vec<Channel> {
        self.cache.read().await.channels.clone()
    }

    /// Get cached channel by id
    pub async fn cached_channel(&self, channel_id: i64) -> Option<Channel> {
        self.cache
            .read()
            .await
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .cloned()
    }

    /// Blocking variant for supervisor threads (outside the runtime)
    pub fn cached_channel_blocking(&self, channel_id: i64) -> Option<Channel> {
        self.cache
            .blocking_read()
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .cloned()
    }

    /// Get cached algorithm config (default when none persisted)
    pub async fn cached_algorithm_config(&self, channel_id: i64) -> AlgorithmConfig {
        self.cache
            .read()
            .await
            .algorithm_configs
            .get(&channel_id)
            .cloned()
            .unwrap_or_else(|| AlgorithmConfig::default_for(channel_id))
    }

    /// Blocking variant for supervisor threads
    pub fn cached_algorithm_config_blocking(&self, channel_id: i64) -> AlgorithmConfig {
        self.cache
            .blocking_read()
            .algorithm_configs
            .get(&channel_id)
            .cloned()
            .unwrap_or_else(|| AlgorithmConfig::default_for(channel_id))
    }

    /// Get cached stream config
    pub async fn cached_stream_config(&self) -> StreamConfig {
        self.cache.read().await.stream_config.clone()
    }

    /// Blocking variant for supervisor threads
    pub fn cached_stream_config_blocking(&self) -> StreamConfig {
        self.cache.blocking_read().stream_config.clone()
    }

    /// Get cached push-stream overrides
    pub fn cached_push_stream_config_blocking(&self) -> PushStreamConfig {
        self.cache.blocking_read().push_stream_config.clone()
    }

    /// Get cached GB28181 config
    pub async fn cached_gb28181_config(&self) -> Gb28181Config {
        self.cache.read().await.gb28181_config.clone()
    }

    /// Blocking variant for supervisor threads
    pub fn cached_gb28181_config_blocking(&self) -> Gb28181Config {
        self.cache.blocking_read().gb28181_config.clone()
    }

    /// Get cached report config
    pub async fn cached_report_config(&self) -> ReportConfig {
        self.cache.read().await.report_config.clone()
    }
}

/// In-memory cache for ConfigStore
#[derive(Default)]
struct ConfigCache {
    channels: Vec<Channel>,
    algorithm_configs: HashMap<i64, AlgorithmConfig>,
    stream_config: StreamConfig,
    push_stream_config: PushStreamConfig,
    gb28181_config: Gb28181Config,
    report_config: ReportConfig,
}
