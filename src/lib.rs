//! Detector Service Library
//!
//! Multi-channel RTSP video analytics with rule-based alerting and
//! RTMP/GB28181 re-streaming.
//!
//! ## Architecture
//!
//! 1. ConfigStore - SSoT for channels, algorithm configs, stream/report config
//! 2. RtspDecoder - per-channel RTSP ingest (OpenCV/FFmpeg)
//! 3. Detector - ONNX object detection with frame cadencing
//! 4. Rules - alert rule evaluation + time-windowed suppression
//! 5. AlertSink - preview fan-out, snapshot persistence, report enqueue
//! 6. FrameBus - WebSocket frame/alert distribution
//! 7. Encoder/Muxer - H.264 re-encode and RTMP/RTP push
//! 8. ChannelSupervisor - one pipeline thread per channel
//! 9. GB28181 - national-standard session handling
//! 10. Reporter - HTTP/MQTT alert delivery
//! 11. WebAPI - REST endpoints + WebSocket upgrade
//!
//! ## Design Principles
//!
//! - SSoT: ConfigStore is the single source of truth
//! - Blocking video pipelines on dedicated OS threads, async everywhere else
//! - Leaf-level locks, never held across I/O

pub mod alert_sink;
pub mod config_store;
pub mod decoder;
pub mod detector;
pub mod encoder;
pub mod error;
pub mod frame_bus;
pub mod gb28181;
pub mod models;
pub mod muxer;
pub mod reporter;
pub mod rules;
pub mod state;
pub mod supervisor;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
