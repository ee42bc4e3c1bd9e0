//! Channel supervision
//!
//! ## Responsibilities
//!
//! - One OS thread per enabled channel running the blocking pipeline:
//!   decode, resize, cadenced detect, annotate, fan out, evaluate
//!   rules, push
//! - ChannelManager: start/stop/restart, at most one supervisor per
//!   channel, RTP session routing for GB28181 commands
//! - Status persistence through the async runtime

use crate::alert_sink::AlertSink;
use crate::config_store::{
    AlgorithmConfig, Channel, ChannelStatus, ConfigService, ConfigStore, PushStreamConfig,
    StreamConfig,
};
use crate::decoder::{PollOutcome, RtspDecoder, StatusSink};
use crate::detector::{self, Detector, FrameCadencer, YoloDetector};
use crate::error::Result;
use crate::frame_bus::FrameBus;
use crate::models::Detection;
use crate::muxer::{PushSession, PushTarget};
use crate::rules::{self, SuppressionTable};
use opencv::core::{Mat, Point, Rect, Scalar, Size};
use opencv::imgproc;
use opencv::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Wait between failed push opens
const PUSH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Idle wait when the decoder produced nothing
const EMPTY_POLL_DELAY: Duration = Duration::from_millis(100);

/// Everything a supervisor thread needs, cheap to clone per channel
#[derive(Clone)]
pub struct PipelineContext {
    pub config_store: Arc<ConfigStore>,
    pub service: ConfigService,
    pub frame_bus: Arc<FrameBus>,
    pub suppression: Arc<SuppressionTable>,
    pub alert_sink: Arc<AlertSink>,
    pub runtime: tokio::runtime::Handle,
    pub model_dir: PathBuf,
}

/// Shared control block between the manager and one supervisor thread
struct SupervisorControl {
    stop: AtomicBool,
    /// Desired GB28181 RTP destination; None tears the session down
    rtp_target: Mutex<Option<PushTarget>>,
}

struct SupervisorHandle {
    control: Arc<SupervisorControl>,
    thread: std::thread::JoinHandle<()>,
}

/// Owns the supervisor threads, one per running channel
#[derive(Default)]
pub struct ChannelManager {
    running: Mutex<HashMap<i64, SupervisorHandle>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a supervisor for the channel, stopping any existing one
    pub fn start(&self, ctx: PipelineContext, channel: Channel) -> Result<()> {
        self.stop(channel.id);

        let channel_id = channel.id;
        let control = Arc::new(SupervisorControl {
            stop: AtomicBool::new(false),
            rtp_target: Mutex::new(None),
        });
        let thread_control = Arc::clone(&control);

        let thread = std::thread::Builder::new()
            .name(format!("channel-{channel_id}"))
            .spawn(move || {
                ChannelSupervisor::new(ctx, channel, thread_control).run();
            })
            .map_err(|e| {
                crate::Error::Internal(format!("failed to spawn supervisor thread: {e}"))
            })?;

        let mut running = lock(&self.running);
        running.insert(channel_id, SupervisorHandle { control, thread });
        tracing::info!(channel_id, "Channel supervisor started");
        Ok(())
    }

    /// Signal the supervisor and wait for the thread to finish.
    /// Returns false when the channel was not running.
    pub fn stop(&self, channel_id: i64) -> bool {
        let handle = lock(&self.running).remove(&channel_id);
        match handle {
            Some(handle) => {
                handle.control.stop.store(true, Ordering::SeqCst);
                if handle.thread.join().is_err() {
                    tracing::error!(channel_id, "Supervisor thread panicked");
                }
                tracing::info!(channel_id, "Channel supervisor stopped");
                true
            }
            None => false,
        }
    }

    pub fn restart(&self, ctx: PipelineContext, channel: Channel) -> Result<()> {
        self.stop(channel.id);
        self.start(ctx, channel)
    }

    pub fn is_running(&self, channel_id: i64) -> bool {
        lock(&self.running).contains_key(&channel_id)
    }

    pub fn running_count(&self) -> usize {
        lock(&self.running).len()
    }

    /// Route a GB28181 session command to a running channel. Returns
    /// false when the channel has no supervisor.
    pub fn set_rtp_target(&self, channel_id: i64, target: Option<PushTarget>) -> bool {
        let running = lock(&self.running);
        match running.get(&channel_id) {
            Some(handle) => {
                *lock(&handle.control.rtp_target) = target;
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let handles: Vec<(i64, SupervisorHandle)> = lock(&self.running).drain().collect();
        for (channel_id, handle) in handles {
            handle.control.stop.store(true, Ordering::SeqCst);
            if handle.thread.join().is_err() {
                tracing::error!(channel_id, "Supervisor thread panicked");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Persists decoder status transitions without blocking the pipeline
struct DbStatusSink {
    service: ConfigService,
    runtime: tokio::runtime::Handle,
}

impl StatusSink for DbStatusSink {
    fn status_changed(&self, channel_id: i64, status: ChannelStatus) {
        let service = self.service.clone();
        self.runtime.spawn(async move {
            if let Err(e) = service.update_channel_status(channel_id, status).await {
                tracing::error!(channel_id, error = %e, "Status update failed");
            }
        });
    }
}

/// One channel's pipeline, running on its own thread
struct ChannelSupervisor {
    ctx: PipelineContext,
    channel: Channel,
    control: Arc<SupervisorControl>,
    cadencer: FrameCadencer,
    detector: Option<Box<dyn Detector>>,
    rtmp_push: PushSlot,
    rtp_push: PushSlot,
}

/// One push session with retry bookkeeping
#[derive(Default)]
struct PushSlot {
    session: Option<PushSession>,
    retry_at: Option<Instant>,
}

impl PushSlot {
    fn drop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.retry_at = None;
    }

    fn fail(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.retry_at = Some(Instant::now() + PUSH_RETRY_DELAY);
    }

    fn may_open(&self) -> bool {
        self.session.is_none() && self.retry_at.map(|t| Instant::now() >= t).unwrap_or(true)
    }
}

impl ChannelSupervisor {
    fn new(ctx: PipelineContext, channel: Channel, control: Arc<SupervisorControl>) -> Self {
        let config = ctx.config_store.cached_algorithm_config_blocking(channel.id);
        let detector = Self::open_detector(&ctx, &config);
        let cadencer = FrameCadencer::new(config.detection_interval);
        Self {
            ctx,
            channel,
            control,
            cadencer,
            detector,
            rtmp_push: PushSlot::default(),
            rtp_push: PushSlot::default(),
        }
    }

    fn open_detector(ctx: &PipelineContext, config: &AlgorithmConfig) -> Option<Box<dyn Detector>> {
        let model_path = ctx.model_dir.join(&config.model_path);
        match YoloDetector::new(
            &model_path.to_string_lossy(),
            config.conf_threshold,
            config.nms_threshold,
            config.input_width as i32,
            config.input_height as i32,
        ) {
            Ok(d) => Some(Box::new(d)),
            Err(e) => {
                tracing::error!(
                    channel_id = config.channel_id,
                    model = %model_path.display(),
                    error = %e,
                    "Detector unavailable, streaming without detection"
                );
                None
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.control.stop.load(Ordering::SeqCst)
    }

    fn run(mut self) {
        let channel_id = self.channel.id;
        let status_sink = Box::new(DbStatusSink {
            service: self.ctx.service.clone(),
            runtime: self.ctx.runtime.clone(),
        });

        let mut decoder = match self.open_decoder(status_sink) {
            Some(d) => d,
            None => {
                self.finish(None, ChannelStatus::Stopped);
                return;
            }
        };

        let frame_interval = Duration::from_millis(1000 / self.channel.fps.max(1) as u64);
        let mut last_iteration = Instant::now();

        while !self.stop_requested() {
            match decoder.poll() {
                PollOutcome::Frame(frame) => {
                    if let Err(e) = self.process_frame(frame) {
                        tracing::warn!(channel_id, error = %e, "Frame processing failed");
                    }
                }
                PollOutcome::Empty => {
                    std::thread::sleep(EMPTY_POLL_DELAY);
                    continue;
                }
                PollOutcome::ReconnectNeeded => {
                    if decoder.reconnect().is_err() {
                        std::thread::sleep(Duration::from_secs(1));
                    }
                    continue;
                }
            }

            // pace to the channel frame rate
            let elapsed = last_iteration.elapsed();
            if elapsed < frame_interval {
                std::thread::sleep(frame_interval - elapsed);
            }
            last_iteration = Instant::now();
        }

        self.finish(Some(decoder), ChannelStatus::Stopped);
    }

    /// Keep trying to open the source until it succeeds or stop is
    /// requested
    fn open_decoder(&self, status_sink: Box<dyn StatusSink>) -> Option<RtspDecoder> {
        let channel_id = self.channel.id;
        let mut status_sink = Some(status_sink);
        loop {
            if self.stop_requested() {
                return None;
            }
            let sink = status_sink.take()?;
            match RtspDecoder::open(channel_id, &self.channel.source_url, self.channel.fps, sink) {
                Ok(decoder) => return Some(decoder),
                Err(e) => {
                    tracing::error!(channel_id, error = %e, "Source open failed, retrying");
                    self.report_status(ChannelStatus::Error);
                    std::thread::sleep(crate::decoder::RECONNECT_DELAY);
                    status_sink = Some(Box::new(DbStatusSink {
                        service: self.ctx.service.clone(),
                        runtime: self.ctx.runtime.clone(),
                    }));
                }
            }
        }
    }

    fn process_frame(&mut self, mut frame: Mat) -> Result<()> {
        let channel_id = self.channel.id;

        // channel row and algorithm config may have changed via the API
        if let Some(fresh) = self.ctx.config_store.cached_channel_blocking(channel_id) {
            self.channel = fresh;
        }
        let config = self
            .ctx
            .config_store
            .cached_algorithm_config_blocking(channel_id);
        self.cadencer.set_interval(config.detection_interval);
        if let Some(detector) = self.detector.as_mut() {
            detector.update_thresholds(config.conf_threshold, config.nms_threshold);
        }

        let (width, height) = (self.channel.width as i32, self.channel.height as i32);
        if frame.cols() != width || frame.rows() != height {
            let mut resized = Mat::default();
            imgproc::resize(
                &frame,
                &mut resized,
                Size::new(width, height),
                0.0,
                0.0,
                imgproc::INTER_LINEAR,
            )?;
            frame = resized;
        }

        let fresh_detection = self.cadencer.advance() && self.detector.is_some();
        let detections: Vec<Detection> = if fresh_detection {
            let detector = match self.detector.as_mut() {
                Some(d) => d,
                None => return Ok(()),
            };
            let raw = detector.detect(&frame)?;
            let filtered = detector::filter_by_classes(raw, &config.enabled_classes);
            self.cadencer.store(filtered.clone());
            filtered
        } else {
            self.cadencer.last().to_vec()
        };

        draw_detections(&mut frame, &detections)?;

        if let Ok(copy) = frame.try_clone() {
            self.ctx.frame_bus.publish_frame(channel_id, copy);
        }

        // evaluate only on frames with fresh detections; reused results
        // would re-fire the same rules every frame
        if fresh_detection && !detections.is_empty() {
            for fired in rules::evaluate(&detections, &config, width, height) {
                let window = fired.rule.suppression_window_seconds;
                if self
                    .ctx
                    .suppression
                    .is_suppressed(channel_id, fired.rule.id, window)
                {
                    continue;
                }
                self.ctx
                    .alert_sink
                    .handle_fired(&self.channel, &fired, &frame);
            }
        }

        self.service_push_sessions(&frame);
        Ok(())
    }

    fn service_push_sessions(&mut self, frame: &Mat) {
        let channel_id = self.channel.id;

        // outbound RTMP
        if self.channel.push_enabled {
            if self.rtmp_push.may_open() {
                match self.open_rtmp_session() {
                    Ok(session) => self.rtmp_push.session = Some(session),
                    Err(e) => {
                        tracing::warn!(channel_id, error = %e, "RTMP push open failed");
                        self.rtmp_push.fail();
                    }
                }
            }
        } else {
            self.rtmp_push.drop_session();
        }
        Self::feed_slot(&mut self.rtmp_push, frame, channel_id, "rtmp");

        // GB28181 RTP session, driven by the signalling front end
        let desired = lock(&self.control.rtp_target).clone();
        match desired {
            Some(target) => {
                if self.rtp_push.may_open() {
                    match self.open_rtp_session(target) {
                        Ok(session) => self.rtp_push.session = Some(session),
                        Err(e) => {
                            tracing::warn!(channel_id, error = %e, "RTP push open failed");
                            self.rtp_push.fail();
                        }
                    }
                }
            }
            None => self.rtp_push.drop_session(),
        }
        Self::feed_slot(&mut self.rtp_push, frame, channel_id, "rtp");
    }

    fn feed_slot(slot: &mut PushSlot, frame: &Mat, channel_id: i64, kind: &str) {
        if let Some(session) = slot.session.as_mut() {
            if let Err(e) = session.push(frame) {
                tracing::warn!(channel_id, kind, error = %e, "Push failed, will reopen");
                slot.fail();
            }
        }
    }

    fn open_rtmp_session(&self) -> Result<PushSession> {
        let stream = self.ctx.config_store.cached_stream_config_blocking();
        let push = self.ctx.config_store.cached_push_stream_config_blocking();
        let (target, width, height, fps, bitrate) =
            resolve_rtmp_push(&stream, &push, &self.channel)?;
        PushSession::open(target, width, height, fps, bitrate)
    }

    fn open_rtp_session(&self, target: PushTarget) -> Result<PushSession> {
        let stream = self.ctx.config_store.cached_stream_config_blocking();
        PushSession::open(
            target,
            self.channel.width.max(1) as u32,
            self.channel.height.max(1) as u32,
            self.channel.fps.max(1) as i32,
            Some(stream.bitrate),
        )
    }

    fn report_status(&self, status: ChannelStatus) {
        let service = self.ctx.service.clone();
        let channel_id = self.channel.id;
        self.ctx.runtime.spawn(async move {
            if let Err(e) = service.update_channel_status(channel_id, status).await {
                tracing::error!(channel_id, error = %e, "Status update failed");
            }
        });
    }

    fn finish(&mut self, decoder: Option<RtspDecoder>, status: ChannelStatus) {
        self.rtmp_push.drop_session();
        self.rtp_push.drop_session();
        if let Some(mut decoder) = decoder {
            decoder.release();
        }
        // written synchronously: the row must be final before the
        // manager's join returns and a restarted supervisor takes over
        let channel_id = self.channel.id;
        if let Err(e) = self
            .ctx
            .runtime
            .block_on(self.ctx.service.update_channel_status(channel_id, status))
        {
            tracing::error!(channel_id, error = %e, "Status update failed");
        }
        tracing::info!(channel_id, status = %String::from(status), "Pipeline finished");
    }
}

/// Resolve the RTMP destination and encoder parameters for a channel.
/// The push config overrides the base stream config field by field; the
/// channel id is appended to the base URL as the stream name.
fn resolve_rtmp_push(
    stream: &StreamConfig,
    push: &PushStreamConfig,
    channel: &Channel,
) -> Result<(PushTarget, u32, u32, i32, Option<i64>)> {
    let base = if push.rtmp_url.is_empty() {
        stream.rtmp_url.as_str()
    } else {
        push.rtmp_url.as_str()
    };
    if base.is_empty() {
        return Err(crate::Error::Validation(
            "no RTMP URL configured".to_string(),
        ));
    }

    let url = format!("{}/{}", base.trim_end_matches('/'), channel.id);
    let width = push.width.unwrap_or(stream.width).max(1) as u32;
    let height = push.height.unwrap_or(stream.height).max(1) as u32;
    let fps = push.fps.unwrap_or(stream.fps).max(1) as i32;
    let bitrate = push.bitrate.or(Some(stream.bitrate));

    Ok((PushTarget::Rtmp { url }, width, height, fps, bitrate))
}

/// Draw detection boxes and class labels onto the frame
pub fn draw_detections(frame: &mut Mat, detections: &[Detection]) -> Result<()> {
    let green = Scalar::new(0.0, 255.0, 0.0, 0.0);
    for detection in detections {
        let bbox = detection.bbox.clamped(frame.cols(), frame.rows());
        let rect = Rect::new(bbox.x, bbox.y, bbox.width, bbox.height);
        imgproc::rectangle(frame, rect, green, 2, imgproc::LINE_8, 0)?;

        let label = format!("{} {:.2}", detection.class_name, detection.confidence);
        let origin = Point::new(bbox.x, (bbox.y - 5).max(12));
        imgproc::put_text(
            frame,
            &label,
            origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            green,
            1,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::CreateChannelRequest;
    use chrono::Utc;
    use opencv::core::CV_8UC3;

    fn channel() -> Channel {
        Channel {
            id: 3,
            name: "gate".to_string(),
            source_url: "rtsp://cam/live".to_string(),
            status: "idle".to_string(),
            enabled: true,
            push_enabled: true,
            report_enabled: false,
            width: 1280,
            height: 720,
            fps: 25,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_resolve_rtmp_push_prefers_push_config() {
        let stream = StreamConfig {
            rtmp_url: "rtmp://base/live".to_string(),
            ..StreamConfig::default()
        };
        let push = PushStreamConfig {
            rtmp_url: "rtmp://override/app/".to_string(),
            width: Some(640),
            height: None,
            fps: None,
            bitrate: Some(500_000),
        };

        let (target, width, height, fps, bitrate) =
            resolve_rtmp_push(&stream, &push, &channel()).unwrap();
        match target {
            PushTarget::Rtmp { url } => assert_eq!(url, "rtmp://override/app/3"),
            other => panic!("unexpected target: {other:?}"),
        }
        assert_eq!(width, 640);
        assert_eq!(height, stream.height as u32);
        assert_eq!(fps, stream.fps as i32);
        assert_eq!(bitrate, Some(500_000));
    }

    #[test]
    fn test_resolve_rtmp_push_falls_back_to_stream_config() {
        let stream = StreamConfig {
            rtmp_url: "rtmp://base/live".to_string(),
            ..StreamConfig::default()
        };
        let push = PushStreamConfig {
            rtmp_url: String::new(),
            width: None,
            height: None,
            fps: None,
            bitrate: None,
        };

        let (target, _, _, _, bitrate) = resolve_rtmp_push(&stream, &push, &channel()).unwrap();
        match target {
            PushTarget::Rtmp { url } => assert_eq!(url, "rtmp://base/live/3"),
            other => panic!("unexpected target: {other:?}"),
        }
        assert_eq!(bitrate, Some(stream.bitrate));
    }

    #[test]
    fn test_resolve_rtmp_push_requires_url() {
        let stream = StreamConfig {
            rtmp_url: String::new(),
            ..StreamConfig::default()
        };
        let push = PushStreamConfig {
            rtmp_url: String::new(),
            width: None,
            height: None,
            fps: None,
            bitrate: None,
        };
        assert!(resolve_rtmp_push(&stream, &push, &channel()).is_err());
    }

    #[test]
    fn test_push_slot_retry_window() {
        let mut slot = PushSlot::default();
        assert!(slot.may_open());
        slot.fail();
        assert!(!slot.may_open());
        slot.retry_at = Some(Instant::now() - Duration::from_secs(1));
        assert!(slot.may_open());
        slot.drop_session();
        assert!(slot.may_open());
    }

    /// Records the confidence threshold in effect at each detect call
    struct RecordingDetector {
        seen: Arc<Mutex<Vec<f32>>>,
        conf_threshold: f32,
        nms_threshold: f32,
    }

    impl Detector for RecordingDetector {
        fn detect(&mut self, _frame: &Mat) -> Result<Vec<Detection>> {
            lock(&self.seen).push(self.conf_threshold);
            Ok(Vec::new())
        }

        fn update_thresholds(&mut self, conf_threshold: f32, nms_threshold: f32) {
            self.conf_threshold = conf_threshold;
            self.nms_threshold = nms_threshold;
        }
    }

    fn blank_frame(width: i32, height: i32) -> Mat {
        Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    /// In-memory store plus a pipeline context and one persisted channel
    async fn pipeline_fixture() -> (Arc<ConfigStore>, PipelineContext, Channel) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let config_store = Arc::new(ConfigStore::new(pool).await.unwrap());
        let service = config_store.service().clone();

        let channel = service
            .create_channel(CreateChannelRequest {
                name: "gate".to_string(),
                source_url: "rtsp://cam/live".to_string(),
                enabled: Some(false),
                push_enabled: Some(false),
                report_enabled: Some(false),
                width: Some(64),
                height: Some(48),
                fps: Some(5),
            })
            .await
            .unwrap();
        config_store.refresh_cache().await.unwrap();

        let frame_bus = Arc::new(FrameBus::new());
        let suppression = Arc::new(SuppressionTable::new());
        let reporter = Arc::new(crate::reporter::Reporter::new().unwrap());
        let alert_sink = Arc::new(AlertSink::new(
            frame_bus.clone(),
            suppression.clone(),
            service.clone(),
            config_store.clone(),
            reporter,
            tokio::runtime::Handle::current(),
            std::env::temp_dir(),
        ));
        let ctx = PipelineContext {
            config_store: config_store.clone(),
            service,
            frame_bus,
            suppression,
            alert_sink,
            runtime: tokio::runtime::Handle::current(),
            model_dir: std::env::temp_dir(),
        };
        (config_store, ctx, channel)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_threshold_change_reaches_running_detector() {
        let (config_store, ctx, channel) = pipeline_fixture().await;
        let service = ctx.service.clone();

        let mut algo = AlgorithmConfig::default_for(channel.id);
        algo.conf_threshold = 0.3;
        algo.detection_interval = 1;
        service.put_algorithm_config(algo.clone()).await.unwrap();
        config_store.refresh_cache().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = RecordingDetector {
            seen: seen.clone(),
            conf_threshold: algo.conf_threshold,
            nms_threshold: algo.nms_threshold,
        };
        let control = Arc::new(SupervisorControl {
            stop: AtomicBool::new(false),
            rtp_target: Mutex::new(None),
        });

        let runtime = tokio::runtime::Handle::current();
        let (width, height) = (channel.width as i32, channel.height as i32);
        tokio::task::spawn_blocking(move || {
            let mut supervisor = ChannelSupervisor {
                ctx,
                channel,
                control,
                cadencer: FrameCadencer::new(1),
                detector: Some(Box::new(detector)),
                rtmp_push: PushSlot::default(),
                rtp_push: PushSlot::default(),
            };
            supervisor.process_frame(blank_frame(width, height)).unwrap();

            // config PUT while the pipeline keeps running
            let mut updated = algo;
            updated.conf_threshold = 0.8;
            runtime.block_on(async {
                service.put_algorithm_config(updated).await.unwrap();
                config_store.refresh_cache().await.unwrap();
            });

            supervisor.process_frame(blank_frame(width, height)).unwrap();
        })
        .await
        .unwrap();

        assert_eq!(*lock(&seen), vec![0.3, 0.8]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_finish_persists_status_before_thread_returns() {
        let (_config_store, ctx, channel) = pipeline_fixture().await;
        let service = ctx.service.clone();
        let channel_id = channel.id;

        let control = Arc::new(SupervisorControl {
            stop: AtomicBool::new(false),
            rtp_target: Mutex::new(None),
        });
        tokio::task::spawn_blocking(move || {
            let mut supervisor = ChannelSupervisor {
                ctx,
                channel,
                control,
                cadencer: FrameCadencer::new(1),
                detector: None,
                rtmp_push: PushSlot::default(),
                rtp_push: PushSlot::default(),
            };
            supervisor.finish(None, ChannelStatus::Stopped);
        })
        .await
        .unwrap();

        // the write must have landed by the time the thread is joined
        let row = service.get_channel(channel_id).await.unwrap().unwrap();
        assert_eq!(row.status, "stopped");
    }
}
