//! Shared models and types
//!
//! Types shared across multiple modules to avoid circular dependencies.

use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub db_connected: bool,
    pub channels_running: usize,
}

/// Integer pixel rectangle in frame coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "w")]
    pub width: i32,
    #[serde(rename = "h")]
    pub height: i32,
}

impl BBox {
    /// Center of the box in floating-point pixel coordinates
    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    /// Clamp the box to frame bounds, keeping width/height >= 1
    pub fn clamped(&self, frame_width: i32, frame_height: i32) -> BBox {
        let x = self.x.clamp(0, frame_width.saturating_sub(1));
        let y = self.y.clamp(0, frame_height.saturating_sub(1));
        let width = self.width.clamp(1, frame_width - x);
        let height = self.height.clamp(1, frame_height - y);
        BBox {
            x,
            y,
            width,
            height,
        }
    }
}

/// A single detection in the decoded frame's pixel coordinate space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: i64,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
}
