//! Alert materialization
//!
//! ## Responsibilities
//!
//! - Fast path, on the pipeline thread: low-quality preview encode and
//!   WebSocket broadcast, suppression recording
//! - Slow path, detached onto the runtime: full-quality image file,
//!   database row, north-bound report with status tracking
//!
//! The pipeline never waits on disk or network; everything past the
//! broadcast runs on deep copies.

use crate::config_store::{Channel, ConfigService, ConfigStore, ReportStatus};
use crate::frame_bus::{encode_jpeg_base64, AlertNotification, FrameBus};
use crate::models::Detection;
use crate::reporter::Reporter;
use crate::rules::{FiredRule, SuppressionTable};
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

const PREVIEW_JPEG_QUALITY: i32 = 50;
const FILE_JPEG_QUALITY: i32 = 90;

pub struct AlertSink {
    frame_bus: Arc<FrameBus>,
    suppression: Arc<SuppressionTable>,
    service: ConfigService,
    config_store: Arc<ConfigStore>,
    reporter: Arc<Reporter>,
    runtime: tokio::runtime::Handle,
    alert_dir: PathBuf,
}

impl AlertSink {
    pub fn new(
        frame_bus: Arc<FrameBus>,
        suppression: Arc<SuppressionTable>,
        service: ConfigService,
        config_store: Arc<ConfigStore>,
        reporter: Arc<Reporter>,
        runtime: tokio::runtime::Handle,
        alert_dir: PathBuf,
    ) -> Self {
        Self {
            frame_bus,
            suppression,
            service,
            config_store,
            reporter,
            runtime,
            alert_dir,
        }
    }

    /// Handle one fired rule. Suppression has already been checked by
    /// the caller; the fire is recorded here so bursts arriving before
    /// the slow path lands cannot double-fire.
    pub fn handle_fired(&self, channel: &Channel, fired: &FiredRule, frame: &Mat) {
        self.suppression.record_fire(channel.id, fired.rule.id);

        let preview = match encode_jpeg_base64(frame, PREVIEW_JPEG_QUALITY) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(
                    channel_id = channel.id,
                    rule_id = fired.rule.id,
                    error = %e,
                    "Alert preview encode failed"
                );
                return;
            }
        };

        let representative = fired.representative().cloned();
        let confidence = representative.as_ref().map(|d| d.confidence).unwrap_or(0.0);
        let detected_objects = serde_json::to_value(&fired.matched)
            .unwrap_or_else(|_| serde_json::Value::Array(Vec::new()));
        let alert_type = fired.alert_type();

        let notification = AlertNotification {
            message_type: "alert".to_string(),
            channel_id: channel.id,
            channel_name: channel.name.clone(),
            alert_type: alert_type.clone(),
            image_base64: preview.clone(),
            confidence,
            detected_objects: detected_objects.clone(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        self.frame_bus.broadcast_alert(&notification);

        let frame_copy = match frame.try_clone() {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(channel_id = channel.id, error = %e, "Alert frame copy failed");
                return;
            }
        };

        let task = SlowPathTask {
            channel: channel.clone(),
            rule_id: fired.rule.id,
            rule_name: fired.rule.name.clone(),
            alert_type,
            preview,
            confidence,
            detected_objects,
            representative,
            frame: frame_copy,
            service: self.service.clone(),
            config_store: Arc::clone(&self.config_store),
            reporter: Arc::clone(&self.reporter),
            alert_dir: self.alert_dir.clone(),
        };
        self.runtime.spawn(task.run());
    }
}

/// Everything the detached persistence task needs, owned
struct SlowPathTask {
    channel: Channel,
    rule_id: i64,
    rule_name: String,
    alert_type: String,
    preview: String,
    confidence: f32,
    detected_objects: serde_json::Value,
    representative: Option<Detection>,
    frame: Mat,
    service: ConfigService,
    config_store: Arc<ConfigStore>,
    reporter: Arc<Reporter>,
    alert_dir: PathBuf,
}

impl SlowPathTask {
    async fn run(self) {
        if let Err(e) = self.persist_and_report().await {
            tracing::error!(
                channel_id = self.channel.id,
                rule_id = self.rule_id,
                error = %e,
                "Alert persistence failed"
            );
        }
    }

    async fn persist_and_report(&self) -> crate::Result<()> {
        let unix = chrono::Utc::now().timestamp();
        let filename = format!("alert_{}_{}_{}.jpg", self.channel.id, self.rule_id, unix);
        let path = self.alert_dir.join(&filename);

        self.write_image(&path).await?;

        let bbox = self
            .representative
            .as_ref()
            .map(|d| d.bbox)
            .unwrap_or_default();

        let record = crate::config_store::AlertRecord {
            id: 0,
            channel_id: self.channel.id,
            channel_name: self.channel.name.clone(),
            alert_type: self.alert_type.clone(),
            alert_rule_id: self.rule_id,
            alert_rule_name: self.rule_name.clone(),
            image_path: path.to_string_lossy().into_owned(),
            image_data: self.preview.clone(),
            confidence: self.confidence as f64,
            detected_objects: self.detected_objects.to_string(),
            bbox_x: bbox.x as f64,
            bbox_y: bbox.y as f64,
            bbox_w: bbox.width as f64,
            bbox_h: bbox.height as f64,
            report_status: String::from(ReportStatus::Pending),
            report_url: None,
            created_at: chrono::Utc::now(),
        };

        let alert_id = self.service.insert_alert(&record).await?;
        tracing::info!(
            alert_id,
            channel_id = self.channel.id,
            rule = %self.rule_name,
            "Alert stored"
        );

        if !self.channel.report_enabled {
            return Ok(());
        }
        let report_config = self.config_store.cached_report_config().await;
        if !report_config.enabled {
            return Ok(());
        }

        let mut stored = record;
        stored.id = alert_id;
        match self.reporter.deliver(&report_config, &stored).await {
            Ok(url) => {
                self.service
                    .update_report_status(alert_id, ReportStatus::Success, Some(&url))
                    .await?;
            }
            Err(e) => {
                tracing::warn!(alert_id, error = %e, "Alert report delivery failed");
                self.service
                    .update_report_status(alert_id, ReportStatus::Failed, None)
                    .await?;
            }
        }
        Ok(())
    }

    async fn write_image(&self, path: &std::path::Path) -> crate::Result<()> {
        let path_str = path.to_string_lossy().into_owned();
        let frame = self.frame.try_clone()?;
        let written = tokio::task::spawn_blocking(move || -> crate::Result<bool> {
            let mut params = Vector::<i32>::new();
            params.push(imgcodecs::IMWRITE_JPEG_QUALITY);
            params.push(FILE_JPEG_QUALITY);
            Ok(imgcodecs::imwrite(&path_str, &frame, &params)?)
        })
        .await
        .map_err(|e| crate::Error::Internal(format!("image write task failed: {e}")))??;

        if !written {
            return Err(crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("imwrite refused {}", path.display()),
            )));
        }
        Ok(())
    }
}
