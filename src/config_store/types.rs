//! ConfigStore data types
//!
//! SSoT data structures for channels, algorithm configs, alerts,
//! and global stream/report configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Channel lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Idle,
    Running,
    Error,
    Stopped,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl From<&str> for ChannelStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "error" => Self::Error,
            "stopped" => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

impl From<String> for ChannelStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<ChannelStatus> for String {
    fn from(s: ChannelStatus) -> Self {
        match s {
            ChannelStatus::Idle => "idle".to_string(),
            ChannelStatus::Running => "running".to_string(),
            ChannelStatus::Error => "error".to_string(),
            ChannelStatus::Stopped => "stopped".to_string(),
        }
    }
}

/// Channel entity (SSoT)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub source_url: String,
    /// Stored as TEXT, converted to/from ChannelStatus
    pub status: String,
    pub enabled: bool,
    pub push_enabled: bool,
    pub report_enabled: bool,
    pub width: i64,
    pub height: i64,
    pub fps: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Channel creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    pub source_url: String,
    pub enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub report_enabled: Option<bool>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<i64>,
}

/// Channel update request (all fields optional, only present fields applied)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateChannelRequest {
    pub name: Option<String>,
    pub source_url: Option<String>,
    pub enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub report_enabled: Option<bool>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<i64>,
}

/// ROI shape kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoiType {
    Rectangle,
    Polygon,
}

/// Coordinate space of ROI points on the wire.
///
/// `pixel` points are divided by the reference dimensions on ingress.
/// When absent, points with `x > 1 || y > 1` are treated as pixels
/// (legacy heuristic kept for old clients).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    Normalized,
    Pixel,
}

/// A single ROI point, normalized to [0,1] once persisted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RoiPoint {
    pub x: f64,
    pub y: f64,
}

/// Region of interest gating alert rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roi {
    pub id: i64,
    #[serde(rename = "type")]
    pub roi_type: RoiType,
    pub name: String,
    pub enabled: bool,
    pub points: Vec<RoiPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinate_space: Option<CoordinateSpace>,
}

/// User-defined alert rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    /// Class names; empty matches any class
    #[serde(default)]
    pub target_classes: Vec<String>,
    pub min_confidence: f32,
    pub min_count: u32,
    /// 0 = no upper bound; counts above it also fire
    pub max_count: u32,
    pub suppression_window_seconds: u64,
    /// ROI ids; empty = whole frame
    #[serde(default)]
    pub roi_ids: Vec<i64>,
}

impl Default for AlertRule {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            enabled: true,
            target_classes: Vec::new(),
            min_confidence: 0.5,
            min_count: 1,
            max_count: 0,
            suppression_window_seconds: 60,
            roi_ids: Vec::new(),
        }
    }
}

/// Per-channel detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub channel_id: i64,
    pub model_path: String,
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    pub input_width: i64,
    pub input_height: i64,
    pub detection_interval: u32,
    /// Class ids passed to the detector; empty = all
    #[serde(default)]
    pub enabled_classes: Vec<i64>,
    #[serde(default)]
    pub rois: Vec<Roi>,
    #[serde(default)]
    pub alert_rules: Vec<AlertRule>,
}

impl AlgorithmConfig {
    /// Well-known default used when a channel has no persisted config
    pub fn default_for(channel_id: i64) -> Self {
        Self {
            channel_id,
            model_path: "yolov11n.onnx".to_string(),
            conf_threshold: 0.65,
            nms_threshold: 0.45,
            input_width: 640,
            input_height: 640,
            detection_interval: 3,
            enabled_classes: Vec::new(),
            rois: Vec::new(),
            alert_rules: Vec::new(),
        }
    }
}

/// Off-box report delivery status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Success,
    Failed,
}

impl From<ReportStatus> for String {
    fn from(s: ReportStatus) -> Self {
        match s {
            ReportStatus::Pending => "pending".to_string(),
            ReportStatus::Success => "success".to_string(),
            ReportStatus::Failed => "failed".to_string(),
        }
    }
}

/// Persisted alert
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertRecord {
    pub id: i64,
    pub channel_id: i64,
    pub channel_name: String,
    pub alert_type: String,
    pub alert_rule_id: i64,
    pub alert_rule_name: String,
    pub image_path: String,
    /// base64-encoded preview JPEG
    pub image_data: String,
    pub confidence: f64,
    /// JSON array of detections
    pub detected_objects: String,
    pub bbox_x: f64,
    pub bbox_y: f64,
    pub bbox_w: f64,
    pub bbox_h: f64,
    /// pending | success | failed, mutated by the report worker
    pub report_status: String,
    pub report_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Global outbound RTMP stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub rtmp_url: String,
    pub width: i64,
    pub height: i64,
    pub fps: i64,
    pub bitrate: i64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            rtmp_url: String::new(),
            width: 1920,
            height: 1080,
            fps: 25,
            bitrate: 2_000_000,
        }
    }
}

/// Push-stream overrides; None falls back to the channel's own geometry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PushStreamConfig {
    pub rtmp_url: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<i64>,
    pub bitrate: Option<i64>,
}

/// Report delivery transport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Http,
    Mqtt,
}

/// Off-box alert reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub http_url: String,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    pub mqtt_username: String,
    pub mqtt_password: String,
    pub mqtt_client_id: String,
    pub enabled: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            report_type: ReportType::Http,
            http_url: String::new(),
            mqtt_broker: String::new(),
            mqtt_port: 1883,
            mqtt_topic: String::new(),
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            mqtt_client_id: "detector_service".to_string(),
            enabled: false,
        }
    }
}

/// GB28181 device-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gb28181Config {
    pub enabled: bool,
    pub sip_server_ip: String,
    pub sip_server_port: u16,
    /// 20-digit national-standard code of the SIP server
    pub sip_server_id: String,
    pub sip_server_domain: String,
    /// 20-digit national-standard code of this device
    pub device_id: String,
    pub device_password: String,
    pub device_name: String,
    pub manufacturer: String,
    pub model: String,
    pub local_sip_port: u16,
    pub rtp_port_start: u16,
    pub rtp_port_end: u16,
    pub heartbeat_interval: u32,
    pub heartbeat_count: u32,
    pub register_expires: u32,
    /// "PS" or "H264"
    pub stream_mode: String,
    pub max_channels: u32,
}

impl Default for Gb28181Config {
    fn default() -> Self {
        Self {
            enabled: false,
            sip_server_ip: String::new(),
            sip_server_port: 5060,
            sip_server_id: String::new(),
            sip_server_domain: String::new(),
            device_id: String::new(),
            device_password: String::new(),
            device_name: String::new(),
            manufacturer: String::new(),
            model: String::new(),
            local_sip_port: 5061,
            rtp_port_start: 30000,
            rtp_port_end: 30100,
            heartbeat_interval: 60,
            heartbeat_count: 3,
            register_expires: 3600,
            stream_mode: "PS".to_string(),
            max_channels: 32,
        }
    }
}
