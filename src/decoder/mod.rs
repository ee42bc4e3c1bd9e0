//! RTSP ingest
//!
//! ## Responsibilities
//!
//! - One VideoCapture (FFmpeg backend) per channel, buffer depth 1
//! - Stale-frame draining before each retrieve
//! - Consecutive-failure counting and reconnect with fixed delay
//! - Status transitions surfaced through an observer

use crate::config_store::ChannelStatus;
use crate::error::Result;
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use std::time::Duration;

pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;
pub const RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// Stale frames drained per poll; bounds decode latency when the
/// pipeline is slower than the source
const GRAB_DRAIN: u32 = 4;

/// Observer for channel status transitions
pub trait StatusSink: Send {
    fn status_changed(&self, channel_id: i64, status: ChannelStatus);
}

/// One poll step outcome
pub enum PollOutcome {
    Frame(Mat),
    /// Read failed but the failure budget is not exhausted yet
    Empty,
    /// Failure budget exhausted; caller should invoke reconnect()
    ReconnectNeeded,
}

/// Tracks consecutive read failures against the reconnect budget
struct FailureCounter {
    count: u32,
    max: u32,
}

impl FailureCounter {
    fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    /// Returns true when the budget is exhausted (and resets)
    fn record_failure(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.max {
            self.count = 0;
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// RTSP decoder for one channel
pub struct RtspDecoder {
    channel_id: i64,
    url: String,
    fps: f64,
    capture: Option<VideoCapture>,
    failures: FailureCounter,
    status_sink: Box<dyn StatusSink>,
}

impl RtspDecoder {
    /// Open the source; the URL is HTML-entity decoded first
    pub fn open(
        channel_id: i64,
        url: &str,
        fps: i64,
        status_sink: Box<dyn StatusSink>,
    ) -> Result<Self> {
        let url = decode_html_entities(url);
        let mut decoder = Self {
            channel_id,
            url,
            fps: fps as f64,
            capture: None,
            failures: FailureCounter::new(MAX_CONSECUTIVE_FAILURES),
            status_sink,
        };
        decoder.open_capture()?;
        decoder
            .status_sink
            .status_changed(channel_id, ChannelStatus::Running);
        Ok(decoder)
    }

    fn open_capture(&mut self) -> Result<()> {
        let mut capture = VideoCapture::from_file(&self.url, videoio::CAP_FFMPEG)?;
        if !capture.is_opened()? {
            return Err(crate::Error::Transient(format!(
                "failed to open stream: {}",
                self.url
            )));
        }

        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;
        capture.set(videoio::CAP_PROP_FPS, self.fps)?;
        let fourcc = videoio::VideoWriter::fourcc('H', '2', '6', '4')? as f64;
        capture.set(videoio::CAP_PROP_FOURCC, fourcc)?;

        self.capture = Some(capture);
        Ok(())
    }

    /// One poll step: drain stale frames, retrieve the newest
    pub fn poll(&mut self) -> PollOutcome {
        let capture = match self.capture.as_mut() {
            Some(c) => c,
            None => return PollOutcome::ReconnectNeeded,
        };

        // grab() decodes without copying out; extra grabs discard frames
        // the library buffered while we were busy
        let mut grabbed = false;
        for _ in 0..GRAB_DRAIN {
            match capture.grab() {
                Ok(true) => grabbed = true,
                _ => break,
            }
        }

        if !grabbed {
            if self.failures.record_failure() {
                return PollOutcome::ReconnectNeeded;
            }
            return PollOutcome::Empty;
        }

        let mut frame = Mat::default();
        match capture.retrieve(&mut frame, 0) {
            Ok(true) if !frame.empty() => {
                self.failures.reset();
                PollOutcome::Frame(frame)
            }
            _ => {
                if self.failures.record_failure() {
                    PollOutcome::ReconnectNeeded
                } else {
                    PollOutcome::Empty
                }
            }
        }
    }

    /// Release the capture, wait, reopen. Status goes to error for the
    /// duration and back to running on success.
    pub fn reconnect(&mut self) -> Result<()> {
        tracing::warn!(
            channel_id = self.channel_id,
            url = %self.url,
            "Decoder reconnecting"
        );
        self.status_sink
            .status_changed(self.channel_id, ChannelStatus::Error);

        if let Some(mut capture) = self.capture.take() {
            let _ = capture.release();
        }
        std::thread::sleep(RECONNECT_DELAY);

        match self.open_capture() {
            Ok(()) => {
                self.status_sink
                    .status_changed(self.channel_id, ChannelStatus::Running);
                tracing::info!(channel_id = self.channel_id, "Decoder reconnected");
                Ok(())
            }
            Err(e) => {
                tracing::error!(channel_id = self.channel_id, error = %e, "Reconnect failed");
                Err(e)
            }
        }
    }

    /// Release the capture on shutdown
    pub fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            let _ = capture.release();
        }
    }
}

impl Drop for RtspDecoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Undo HTML entity escaping applied by some camera management UIs
pub fn decode_html_entities(url: &str) -> String {
    url.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_html_entities() {
        assert_eq!(
            decode_html_entities("rtsp://cam/live?user=a&amp;pass=b"),
            "rtsp://cam/live?user=a&pass=b"
        );
        assert_eq!(decode_html_entities("rtsp://cam/live"), "rtsp://cam/live");
    }

    #[test]
    fn test_failure_counter_budget() {
        let mut counter = FailureCounter::new(10);
        for _ in 0..9 {
            assert!(!counter.record_failure());
        }
        // tenth consecutive failure trips the reconnect
        assert!(counter.record_failure());
        // and the budget restarts
        assert!(!counter.record_failure());
    }

    #[test]
    fn test_failure_counter_reset_on_success() {
        let mut counter = FailureCounter::new(10);
        for _ in 0..9 {
            counter.record_failure();
        }
        counter.reset();
        assert!(!counter.record_failure());
    }
}
