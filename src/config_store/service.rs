//! ConfigStore Service
//!
//! Business logic layer: validation, ROI coordinate normalization,
//! and typed access to the global config blobs

use super::repository::ConfigRepository;
use super::types::*;
use crate::error::Result;

const SETTING_STREAM: &str = "stream_config";
const SETTING_PUSH_STREAM: &str = "push_stream_config";
const SETTING_GB28181: &str = "gb28181_config";
const SETTING_REPORT: &str = "report_config";

/// ConfigStore service for business logic
#[derive(Clone)]
pub struct ConfigService {
    repo: ConfigRepository,
}

impl ConfigService {
    /// Create new service
    pub fn new(repo: ConfigRepository) -> Self {
        Self { repo }
    }

    /// Create tables
    pub async fn init_schema(&self) -> Result<()> {
        self.repo.init_schema().await
    }

    // ========================================
    // Channel Operations
    // ========================================

    /// List all channels
    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        self.repo.get_all_channels().await
    }

    /// Get channel by id
    pub async fn get_channel(&self, channel_id: i64) -> Result<Option<Channel>> {
        self.repo.get_channel(channel_id).await
    }

    /// Create channel
    pub async fn create_channel(&self, req: CreateChannelRequest) -> Result<Channel> {
        if req.name.is_empty() {
            return Err(crate::Error::Validation("name must not be empty".to_string()));
        }
        validate_source_url(&req.source_url)?;
        if let Some(fps) = req.fps {
            if fps < 1 {
                return Err(crate::Error::Validation("fps must be >= 1".to_string()));
            }
        }
        if req.width.map_or(false, |w| w < 1) || req.height.map_or(false, |h| h < 1) {
            return Err(crate::Error::Validation(
                "width/height must be >= 1".to_string(),
            ));
        }

        self.repo.create_channel(&req).await
    }

    /// Apply a partial update, returning the persisted row
    pub async fn update_channel(
        &self,
        channel_id: i64,
        req: UpdateChannelRequest,
    ) -> Result<Channel> {
        let mut channel = self
            .repo
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("Channel {} not found", channel_id)))?;

        if let Some(url) = &req.source_url {
            validate_source_url(url)?;
        }
        if req.fps.map_or(false, |f| f < 1) {
            return Err(crate::Error::Validation("fps must be >= 1".to_string()));
        }
        if req.width.map_or(false, |w| w < 1) || req.height.map_or(false, |h| h < 1) {
            return Err(crate::Error::Validation(
                "width/height must be >= 1".to_string(),
            ));
        }

        if let Some(name) = req.name {
            channel.name = name;
        }
        if let Some(url) = req.source_url {
            channel.source_url = url;
        }
        if let Some(enabled) = req.enabled {
            channel.enabled = enabled;
        }
        if let Some(push) = req.push_enabled {
            channel.push_enabled = push;
        }
        if let Some(report) = req.report_enabled {
            channel.report_enabled = report;
        }
        if let Some(width) = req.width {
            channel.width = width;
        }
        if let Some(height) = req.height {
            channel.height = height;
        }
        if let Some(fps) = req.fps {
            channel.fps = fps;
        }

        self.repo.update_channel(&channel).await?;
        Ok(channel)
    }

    /// Supervisor-side status transition
    pub async fn update_channel_status(
        &self,
        channel_id: i64,
        status: ChannelStatus,
    ) -> Result<()> {
        self.repo.update_channel_status(channel_id, status).await
    }

    /// Delete channel and its config/alerts
    pub async fn delete_channel(&self, channel_id: i64) -> Result<()> {
        if self.repo.get_channel(channel_id).await?.is_none() {
            return Err(crate::Error::NotFound(format!(
                "Channel {} not found",
                channel_id
            )));
        }

        self.repo.delete_alerts_by_channel(channel_id).await?;
        self.repo.delete_algorithm_config(channel_id).await?;
        self.repo.delete_channel(channel_id).await?;
        Ok(())
    }

    // ========================================
    // AlgorithmConfig Operations
    // ========================================

    /// Get algorithm config, falling back to the well-known default
    pub async fn get_algorithm_config(&self, channel_id: i64) -> Result<AlgorithmConfig> {
        Ok(self
            .repo
            .get_algorithm_config(channel_id)
            .await?
            .unwrap_or_else(|| AlgorithmConfig::default_for(channel_id)))
    }

    /// Validate and persist an algorithm config. ROI points are normalized
    /// to [0,1] against (input_width, input_height) before storage.
    pub async fn put_algorithm_config(&self, mut config: AlgorithmConfig) -> Result<()> {
        validate_algorithm_config(&config)?;

        for roi in &mut config.rois {
            normalize_roi(roi, config.input_width as f64, config.input_height as f64)?;
        }

        self.repo.upsert_algorithm_config(&config).await
    }

    /// Delete algorithm config (channel reverts to defaults)
    pub async fn delete_algorithm_config(&self, channel_id: i64) -> Result<bool> {
        self.repo.delete_algorithm_config(channel_id).await
    }

    // ========================================
    // Alert Operations
    // ========================================

    pub async fn insert_alert(&self, alert: &AlertRecord) -> Result<i64> {
        self.repo.insert_alert(alert).await
    }

    pub async fn list_alerts(&self, limit: i64, offset: i64) -> Result<Vec<AlertRecord>> {
        self.repo.get_alerts(limit.clamp(1, 1000), offset.max(0)).await
    }

    pub async fn list_alerts_by_channel(
        &self,
        channel_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AlertRecord>> {
        self.repo
            .get_alerts_by_channel(channel_id, limit.clamp(1, 1000), offset.max(0))
            .await
    }

    pub async fn get_alert(&self, alert_id: i64) -> Result<Option<AlertRecord>> {
        self.repo.get_alert(alert_id).await
    }

    pub async fn delete_alert(&self, alert_id: i64) -> Result<bool> {
        self.repo.delete_alert(alert_id).await
    }

    pub async fn cleanup_old_alerts(&self, days: i64) -> Result<u64> {
        if days < 1 {
            return Err(crate::Error::Validation("days must be >= 1".to_string()));
        }
        self.repo.cleanup_old_alerts(days).await
    }

    pub async fn update_report_status(
        &self,
        alert_id: i64,
        status: ReportStatus,
        report_url: Option<&str>,
    ) -> Result<()> {
        self.repo
            .update_report_status(alert_id, status, report_url)
            .await
    }

    // ========================================
    // Global config blobs
    // ========================================

    pub async fn get_stream_config(&self) -> Result<StreamConfig> {
        match self.repo.get_setting(SETTING_STREAM).await? {
            Some(json) => Ok(serde_json::from_value(json)?),
            None => Ok(StreamConfig::default()),
        }
    }

    pub async fn put_stream_config(&self, config: &StreamConfig) -> Result<()> {
        if config.width < 1 || config.height < 1 || config.fps < 1 {
            return Err(crate::Error::Validation(
                "stream width/height/fps must be >= 1".to_string(),
            ));
        }
        self.repo
            .put_setting(SETTING_STREAM, &serde_json::to_value(config)?)
            .await
    }

    pub async fn get_push_stream_config(&self) -> Result<PushStreamConfig> {
        match self.repo.get_setting(SETTING_PUSH_STREAM).await? {
            Some(json) => Ok(serde_json::from_value(json)?),
            None => Ok(PushStreamConfig::default()),
        }
    }

    pub async fn put_push_stream_config(&self, config: &PushStreamConfig) -> Result<()> {
        if config.width.map_or(false, |w| w < 1)
            || config.height.map_or(false, |h| h < 1)
            || config.fps.map_or(false, |f| f < 1)
        {
            return Err(crate::Error::Validation(
                "push stream width/height/fps must be >= 1".to_string(),
            ));
        }
        self.repo
            .put_setting(SETTING_PUSH_STREAM, &serde_json::to_value(config)?)
            .await
    }

    pub async fn get_gb28181_config(&self) -> Result<Gb28181Config> {
        match self.repo.get_setting(SETTING_GB28181).await? {
            Some(json) => Ok(serde_json::from_value(json)?),
            None => Ok(Gb28181Config::default()),
        }
    }

    pub async fn put_gb28181_config(&self, config: &Gb28181Config) -> Result<()> {
        if config.enabled && config.device_id.len() != 20 {
            return Err(crate::Error::Validation(
                "device_id must be a 20-digit code".to_string(),
            ));
        }
        if config.stream_mode != "PS" && config.stream_mode != "H264" {
            return Err(crate::Error::Validation(
                "stream_mode must be PS or H264".to_string(),
            ));
        }
        self.repo
            .put_setting(SETTING_GB28181, &serde_json::to_value(config)?)
            .await
    }

    pub async fn get_report_config(&self) -> Result<ReportConfig> {
        match self.repo.get_setting(SETTING_REPORT).await? {
            Some(json) => Ok(serde_json::from_value(json)?),
            None => Ok(ReportConfig::default()),
        }
    }

    pub async fn put_report_config(&self, config: &ReportConfig) -> Result<()> {
        if config.enabled {
            match config.report_type {
                ReportType::Http if config.http_url.is_empty() => {
                    return Err(crate::Error::Validation(
                        "http_url required for HTTP reporting".to_string(),
                    ));
                }
                ReportType::Mqtt if config.mqtt_broker.is_empty() => {
                    return Err(crate::Error::Validation(
                        "mqtt_broker required for MQTT reporting".to_string(),
                    ));
                }
                _ => {}
            }
        }
        self.repo
            .put_setting(SETTING_REPORT, &serde_json::to_value(config)?)
            .await
    }
}

fn validate_source_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(crate::Error::Validation(
            "source_url must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_algorithm_config(config: &AlgorithmConfig) -> Result<()> {
    if config.model_path.is_empty() {
        return Err(crate::Error::Validation(
            "model_path must not be empty".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.conf_threshold) {
        return Err(crate::Error::Validation(
            "conf_threshold must be in [0,1]".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.nms_threshold) {
        return Err(crate::Error::Validation(
            "nms_threshold must be in [0,1]".to_string(),
        ));
    }
    if config.input_width < 1 || config.input_height < 1 {
        return Err(crate::Error::Validation(
            "input dimensions must be >= 1".to_string(),
        ));
    }
    if config.detection_interval < 1 {
        return Err(crate::Error::Validation(
            "detection_interval must be >= 1".to_string(),
        ));
    }

    for roi in &config.rois {
        match roi.roi_type {
            RoiType::Rectangle if roi.points.len() < 2 => {
                return Err(crate::Error::Validation(format!(
                    "ROI {}: rectangle needs at least 2 points",
                    roi.id
                )));
            }
            RoiType::Polygon if roi.points.len() < 3 => {
                return Err(crate::Error::Validation(format!(
                    "ROI {}: polygon needs at least 3 points",
                    roi.id
                )));
            }
            _ => {}
        }
    }

    for rule in &config.alert_rules {
        if !(0.0..=1.0).contains(&rule.min_confidence) {
            return Err(crate::Error::Validation(format!(
                "rule {}: min_confidence must be in [0,1]",
                rule.id
            )));
        }
        if rule.min_count < 1 {
            return Err(crate::Error::Validation(format!(
                "rule {}: min_count must be >= 1",
                rule.id
            )));
        }
    }

    Ok(())
}

/// Bring ROI points into normalized [0,1] space.
///
/// An explicit `coordinate_space` wins; without it, any point with
/// `x > 1 || y > 1` marks the whole ROI as pixel-space.
fn normalize_roi(roi: &mut Roi, ref_width: f64, ref_height: f64) -> Result<()> {
    let pixel_space = match roi.coordinate_space {
        Some(CoordinateSpace::Pixel) => true,
        Some(CoordinateSpace::Normalized) => false,
        None => roi.points.iter().any(|p| p.x > 1.0 || p.y > 1.0),
    };

    for p in &mut roi.points {
        if pixel_space {
            p.x /= ref_width;
            p.y /= ref_height;
        }
        p.x = p.x.clamp(0.0, 1.0);
        p.y = p.y.clamp(0.0, 1.0);
    }

    roi.coordinate_space = Some(CoordinateSpace::Normalized);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roi(points: Vec<RoiPoint>, space: Option<CoordinateSpace>) -> Roi {
        Roi {
            id: 1,
            roi_type: RoiType::Rectangle,
            name: "test".to_string(),
            enabled: true,
            points,
            coordinate_space: space,
        }
    }

    #[test]
    fn test_normalize_pixel_points_by_heuristic() {
        let mut r = roi(
            vec![
                RoiPoint { x: 320.0, y: 240.0 },
                RoiPoint { x: 640.0, y: 480.0 },
            ],
            None,
        );
        normalize_roi(&mut r, 640.0, 480.0).unwrap();

        assert!((r.points[0].x - 0.5).abs() < 1e-9);
        assert!((r.points[0].y - 0.5).abs() < 1e-9);
        assert!((r.points[1].x - 1.0).abs() < 1e-9);
        assert_eq!(r.coordinate_space, Some(CoordinateSpace::Normalized));
    }

    #[test]
    fn test_normalized_points_left_alone() {
        let mut r = roi(
            vec![
                RoiPoint { x: 0.25, y: 0.25 },
                RoiPoint { x: 0.75, y: 0.75 },
            ],
            None,
        );
        normalize_roi(&mut r, 1920.0, 1080.0).unwrap();

        assert!((r.points[0].x - 0.25).abs() < 1e-9);
        assert!((r.points[1].y - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_coordinate_space_overrides_heuristic() {
        // x slightly over 1.0 due to a client rounding bug; explicit
        // normalized tag keeps it from being divided by the frame size
        let mut r = roi(
            vec![
                RoiPoint { x: 1.0001, y: 0.5 },
                RoiPoint { x: 0.9, y: 0.9 },
            ],
            Some(CoordinateSpace::Normalized),
        );
        normalize_roi(&mut r, 640.0, 480.0).unwrap();

        assert!((r.points[0].x - 1.0).abs() < 1e-9); // clamped, not divided
    }

    #[test]
    fn test_roundtrip_within_tolerance() {
        let w = 1920.0;
        let h = 1080.0;
        let mut r = roi(
            vec![
                RoiPoint { x: 123.0, y: 456.0 },
                RoiPoint { x: 1700.0, y: 900.0 },
            ],
            None,
        );
        normalize_roi(&mut r, w, h).unwrap();

        // back to pixels with the same reference size
        let px = r.points[0].x * w;
        let py = r.points[0].y * h;
        assert!((px - 123.0).abs() <= 1.0);
        assert!((py - 456.0).abs() <= 1.0);
        for p in &r.points {
            assert!((0.0..=1.0).contains(&p.x));
            assert!((0.0..=1.0).contains(&p.y));
        }
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = AlgorithmConfig::default_for(1);
        config.conf_threshold = 1.5;
        assert!(validate_algorithm_config(&config).is_err());

        let mut config = AlgorithmConfig::default_for(1);
        config.detection_interval = 0;
        assert!(validate_algorithm_config(&config).is_err());

        let mut config = AlgorithmConfig::default_for(1);
        config.rois.push(Roi {
            id: 1,
            roi_type: RoiType::Polygon,
            name: "p".to_string(),
            enabled: true,
            points: vec![RoiPoint { x: 0.1, y: 0.1 }, RoiPoint { x: 0.2, y: 0.2 }],
            coordinate_space: None,
        });
        assert!(validate_algorithm_config(&config).is_err());
    }
}
