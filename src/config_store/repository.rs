//! ConfigStore Repository
//!
//! Database access layer for ConfigStore

use super::types::*;
use crate::error::Result;
use sqlx::{FromRow, SqlitePool};

/// ConfigStore repository for database operations
#[derive(Clone)]
pub struct ConfigRepository {
    pool: SqlitePool,
}

/// Raw algorithm_configs row; JSON columns parsed on read
#[derive(FromRow)]
struct AlgorithmConfigRow {
    channel_id: i64,
    model_path: String,
    conf_threshold: f64,
    nms_threshold: f64,
    input_width: i64,
    input_height: i64,
    detection_interval: i64,
    enabled_classes: String,
    rois: String,
    alert_rules: String,
}

impl AlgorithmConfigRow {
    fn into_config(self) -> Result<AlgorithmConfig> {
        Ok(AlgorithmConfig {
            channel_id: self.channel_id,
            model_path: self.model_path,
            conf_threshold: self.conf_threshold as f32,
            nms_threshold: self.nms_threshold as f32,
            input_width: self.input_width,
            input_height: self.input_height,
            detection_interval: self.detection_interval.max(1) as u32,
            enabled_classes: serde_json::from_str(&self.enabled_classes)?,
            rois: serde_json::from_str(&self.rois)?,
            alert_rules: serde_json::from_str(&self.alert_rules)?,
        })
    }
}

impl ConfigRepository {
    /// Create new repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables if absent
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                source_url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'idle',
                enabled INTEGER NOT NULL DEFAULT 0,
                push_enabled INTEGER NOT NULL DEFAULT 0,
                report_enabled INTEGER NOT NULL DEFAULT 0,
                width INTEGER NOT NULL DEFAULT 1920,
                height INTEGER NOT NULL DEFAULT 1080,
                fps INTEGER NOT NULL DEFAULT 25,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS algorithm_configs (
                channel_id INTEGER PRIMARY KEY,
                model_path TEXT NOT NULL,
                conf_threshold REAL NOT NULL,
                nms_threshold REAL NOT NULL,
                input_width INTEGER NOT NULL,
                input_height INTEGER NOT NULL,
                detection_interval INTEGER NOT NULL,
                enabled_classes TEXT NOT NULL DEFAULT '[]',
                rois TEXT NOT NULL DEFAULT '[]',
                alert_rules TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id INTEGER NOT NULL,
                channel_name TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                alert_rule_id INTEGER NOT NULL DEFAULT 0,
                alert_rule_name TEXT NOT NULL DEFAULT '',
                image_path TEXT NOT NULL DEFAULT '',
                image_data TEXT NOT NULL DEFAULT '',
                confidence REAL NOT NULL DEFAULT 0,
                detected_objects TEXT NOT NULL DEFAULT '[]',
                bbox_x REAL NOT NULL DEFAULT 0,
                bbox_y REAL NOT NULL DEFAULT 0,
                bbox_w REAL NOT NULL DEFAULT 0,
                bbox_h REAL NOT NULL DEFAULT 0,
                report_status TEXT NOT NULL DEFAULT 'pending',
                report_url TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_alerts_channel
            ON alerts (channel_id, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                setting_key TEXT PRIMARY KEY,
                setting_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================
    // Channel CRUD
    // ========================================

    const CHANNEL_COLUMNS: &'static str = r#"
        id, name, source_url, status, enabled, push_enabled, report_enabled,
        width, height, fps, created_at, updated_at
    "#;

    /// Get all channels
    pub async fn get_all_channels(&self) -> Result<Vec<Channel>> {
        let query = format!(
            "SELECT {} FROM channels ORDER BY id",
            Self::CHANNEL_COLUMNS
        );
        let channels = sqlx::query_as::<_, Channel>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(channels)
    }

    /// Get channel by id
    pub async fn get_channel(&self, channel_id: i64) -> Result<Option<Channel>> {
        let query = format!(
            "SELECT {} FROM channels WHERE id = ?",
            Self::CHANNEL_COLUMNS
        );
        let channel = sqlx::query_as::<_, Channel>(&query)
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(channel)
    }

    /// Create channel, returning the stored row
    pub async fn create_channel(&self, req: &CreateChannelRequest) -> Result<Channel> {
        let now = chrono::Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO channels (
                name, source_url, status,
                enabled, push_enabled, report_enabled,
                width, height, fps,
                created_at, updated_at
            ) VALUES (?, ?, 'idle', ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.name)
        .bind(&req.source_url)
        .bind(req.enabled.unwrap_or(false))
        .bind(req.push_enabled.unwrap_or(false))
        .bind(req.report_enabled.unwrap_or(false))
        .bind(req.width.unwrap_or(1920))
        .bind(req.height.unwrap_or(1080))
        .bind(req.fps.unwrap_or(25))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_channel(id)
            .await?
            .ok_or_else(|| crate::Error::Database("created channel row not found".to_string()))
    }

    /// Persist a full channel row (status included)
    pub async fn update_channel(&self, channel: &Channel) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE channels SET
                name = ?, source_url = ?, status = ?,
                enabled = ?, push_enabled = ?, report_enabled = ?,
                width = ?, height = ?, fps = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&channel.name)
        .bind(&channel.source_url)
        .bind(&channel.status)
        .bind(channel.enabled)
        .bind(channel.push_enabled)
        .bind(channel.report_enabled)
        .bind(channel.width)
        .bind(channel.height)
        .bind(channel.fps)
        .bind(chrono::Utc::now())
        .bind(channel.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update status only (supervisor transitions)
    pub async fn update_channel_status(
        &self,
        channel_id: i64,
        status: ChannelStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE channels SET status = ?, updated_at = ? WHERE id = ?")
            .bind(String::from(status))
            .bind(chrono::Utc::now())
            .bind(channel_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete channel row
    pub async fn delete_channel(&self, channel_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(channel_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================
    // AlgorithmConfig
    // ========================================

    /// Get algorithm config for a channel
    pub async fn get_algorithm_config(&self, channel_id: i64) -> Result<Option<AlgorithmConfig>> {
        let row = sqlx::query_as::<_, AlgorithmConfigRow>(
            r#"
            SELECT channel_id, model_path, conf_threshold, nms_threshold,
                   input_width, input_height, detection_interval,
                   enabled_classes, rois, alert_rules
            FROM algorithm_configs WHERE channel_id = ?
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AlgorithmConfigRow::into_config).transpose()
    }

    /// Insert or replace algorithm config
    pub async fn upsert_algorithm_config(&self, config: &AlgorithmConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO algorithm_configs (
                channel_id, model_path, conf_threshold, nms_threshold,
                input_width, input_height, detection_interval,
                enabled_classes, rois, alert_rules
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(channel_id) DO UPDATE SET
                model_path = excluded.model_path,
                conf_threshold = excluded.conf_threshold,
                nms_threshold = excluded.nms_threshold,
                input_width = excluded.input_width,
                input_height = excluded.input_height,
                detection_interval = excluded.detection_interval,
                enabled_classes = excluded.enabled_classes,
                rois = excluded.rois,
                alert_rules = excluded.alert_rules
            "#,
        )
        .bind(config.channel_id)
        .bind(&config.model_path)
        .bind(config.conf_threshold as f64)
        .bind(config.nms_threshold as f64)
        .bind(config.input_width)
        .bind(config.input_height)
        .bind(config.detection_interval as i64)
        .bind(serde_json::to_string(&config.enabled_classes)?)
        .bind(serde_json::to_string(&config.rois)?)
        .bind(serde_json::to_string(&config.alert_rules)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete algorithm config, reverting the channel to defaults
    pub async fn delete_algorithm_config(&self, channel_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM algorithm_configs WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================
    // Alerts
    // ========================================

    const ALERT_COLUMNS: &'static str = r#"
        id, channel_id, channel_name, alert_type, alert_rule_id, alert_rule_name,
        image_path, image_data, confidence, detected_objects,
        bbox_x, bbox_y, bbox_w, bbox_h, report_status, report_url, created_at
    "#;

    /// Insert alert record, returning its id
    pub async fn insert_alert(&self, alert: &AlertRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (
                channel_id, channel_name, alert_type, alert_rule_id, alert_rule_name,
                image_path, image_data, confidence, detected_objects,
                bbox_x, bbox_y, bbox_w, bbox_h, report_status, report_url, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.channel_id)
        .bind(&alert.channel_name)
        .bind(&alert.alert_type)
        .bind(alert.alert_rule_id)
        .bind(&alert.alert_rule_name)
        .bind(&alert.image_path)
        .bind(&alert.image_data)
        .bind(alert.confidence)
        .bind(&alert.detected_objects)
        .bind(alert.bbox_x)
        .bind(alert.bbox_y)
        .bind(alert.bbox_w)
        .bind(alert.bbox_h)
        .bind(&alert.report_status)
        .bind(&alert.report_url)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// List alerts, newest first
    pub async fn get_alerts(&self, limit: i64, offset: i64) -> Result<Vec<AlertRecord>> {
        let query = format!(
            "SELECT {} FROM alerts ORDER BY created_at DESC LIMIT ? OFFSET ?",
            Self::ALERT_COLUMNS
        );
        let alerts = sqlx::query_as::<_, AlertRecord>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(alerts)
    }

    /// List alerts for one channel, newest first
    pub async fn get_alerts_by_channel(
        &self,
        channel_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AlertRecord>> {
        let query = format!(
            "SELECT {} FROM alerts WHERE channel_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
            Self::ALERT_COLUMNS
        );
        let alerts = sqlx::query_as::<_, AlertRecord>(&query)
            .bind(channel_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(alerts)
    }

    /// Get one alert
    pub async fn get_alert(&self, alert_id: i64) -> Result<Option<AlertRecord>> {
        let query = format!("SELECT {} FROM alerts WHERE id = ?", Self::ALERT_COLUMNS);
        let alert = sqlx::query_as::<_, AlertRecord>(&query)
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(alert)
    }

    /// Delete one alert
    pub async fn delete_alert(&self, alert_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = ?")
            .bind(alert_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete all alerts of a channel (channel deletion cleanup)
    pub async fn delete_alerts_by_channel(&self, channel_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM alerts WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete alerts older than `days`
    pub async fn cleanup_old_alerts(&self, days: i64) -> Result<u64> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
        let result = sqlx::query("DELETE FROM alerts WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Report worker outcome
    pub async fn update_report_status(
        &self,
        alert_id: i64,
        status: ReportStatus,
        report_url: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE alerts SET report_status = ?, report_url = ? WHERE id = ?")
            .bind(String::from(status))
            .bind(report_url)
            .bind(alert_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========================================
    // Settings (global config blobs)
    // ========================================

    /// Get setting JSON by key
    pub async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT setting_json FROM settings WHERE setting_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(json,)| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    /// Upsert setting JSON
    pub async fn put_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (setting_key, setting_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(setting_key) DO UPDATE SET
                setting_json = excluded.setting_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
