//! FrameBus - WebSocket fan-out
//!
//! ## Responsibilities
//!
//! - Channel feed: latest-frame slot per channel, drained by one sender
//!   thread, JPEG-encoded once per channel and fanned out with a
//!   per-channel FPS cap
//! - Alert feed: unthrottled broadcast to all alert subscribers
//! - Subscription bookkeeping with atomic channel switching
//!
//! Subscribers are delivered through unbounded senders; a failed send
//! means the peer is gone and the subscriber is dropped from both maps.

use crate::config_store::ConfigStore;
use base64::Engine;
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

const FRAME_JPEG_QUALITY: i32 = 60;

pub type SubscriberId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Channel,
    Alert,
}

/// Alert-feed payload, broadcast as-is
#[derive(Debug, Clone, Serialize)]
pub struct AlertNotification {
    #[serde(rename = "type")]
    pub message_type: String,
    pub channel_id: i64,
    pub channel_name: String,
    pub alert_type: String,
    pub image_base64: String,
    pub confidence: f32,
    pub detected_objects: serde_json::Value,
    pub timestamp: String,
}

struct SubscriberEntry {
    sender: UnboundedSender<String>,
    kind: FeedKind,
    channel_id: Option<i64>,
}

#[derive(Default)]
struct SubscriptionSet {
    /// channel_id -> subscribers watching it
    channel_subs: HashMap<i64, HashSet<SubscriberId>>,
    /// all connections, both feeds
    connections: HashMap<SubscriberId, SubscriberEntry>,
}

impl SubscriptionSet {
    fn remove(&mut self, id: SubscriberId) {
        if let Some(entry) = self.connections.remove(&id) {
            if let Some(channel_id) = entry.channel_id {
                if let Some(subs) = self.channel_subs.get_mut(&channel_id) {
                    subs.remove(&id);
                    if subs.is_empty() {
                        self.channel_subs.remove(&channel_id);
                    }
                }
            }
        }
    }
}

/// Per-channel delivery rate limiter for the channel feed
struct FpsGate {
    last_send: HashMap<i64, Instant>,
}

impl FpsGate {
    fn new() -> Self {
        Self {
            last_send: HashMap::new(),
        }
    }

    /// True when enough time has passed since the last delivery for
    /// this channel; records the send time when passing.
    fn should_send(&mut self, channel_id: i64, target_fps: i64, now: Instant) -> bool {
        let min_gap = Duration::from_micros(1_000_000 / target_fps.max(1) as u64);
        match self.last_send.get(&channel_id) {
            Some(&last) if now.saturating_duration_since(last) < min_gap => false,
            _ => {
                self.last_send.insert(channel_id, now);
                true
            }
        }
    }

    /// Drop rate state once a channel has no subscribers
    fn gc(&mut self, channel_id: i64) {
        self.last_send.remove(&channel_id);
    }
}

struct BusShared {
    slots: Mutex<HashMap<i64, Mat>>,
    slot_ready: Condvar,
    subs: Mutex<SubscriptionSet>,
    running: AtomicBool,
    next_id: AtomicU64,
}

/// FrameBus instance
pub struct FrameBus {
    shared: Arc<BusShared>,
    sender_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl FrameBus {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BusShared {
                slots: Mutex::new(HashMap::new()),
                slot_ready: Condvar::new(),
                subs: Mutex::new(SubscriptionSet::default()),
                running: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
            sender_thread: Mutex::new(None),
        }
    }

    /// Start the sender thread. Target FPS per channel comes from the
    /// config store cache.
    pub fn start(&self, config_store: Arc<ConfigStore>) {
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("frame-bus-sender".to_string())
            .spawn(move || sender_loop(shared, config_store));
        match handle {
            Ok(h) => {
                *lock(&self.sender_thread) = Some(h);
                tracing::info!("FrameBus sender thread started");
            }
            Err(e) => tracing::error!(error = %e, "Failed to spawn FrameBus sender"),
        }
    }

    /// Stop the sender thread and join it
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.slot_ready.notify_all();
        if let Some(handle) = lock(&self.sender_thread).take() {
            let _ = handle.join();
        }
    }

    /// Publish the latest frame for a channel (drop-on-replace).
    /// Channels without subscribers are skipped entirely.
    pub fn publish_frame(&self, channel_id: i64, frame: Mat) {
        {
            let subs = lock(&self.shared.subs);
            match subs.channel_subs.get(&channel_id) {
                Some(s) if !s.is_empty() => {}
                _ => return,
            }
        }

        lock(&self.shared.slots).insert(channel_id, frame);
        self.shared.slot_ready.notify_one();
    }

    /// Register a channel-feed connection; frames flow only after the
    /// first subscribe message.
    pub fn add_channel_subscriber(&self, sender: UnboundedSender<String>) -> SubscriberId {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.subs).connections.insert(
            id,
            SubscriberEntry {
                sender,
                kind: FeedKind::Channel,
                channel_id: None,
            },
        );
        tracing::debug!(subscriber = id, "Channel-feed subscriber connected");
        id
    }

    /// Register an alert-feed connection; confirmation is sent at once
    pub fn add_alert_subscriber(&self, sender: UnboundedSender<String>) -> SubscriberId {
        let confirm = r#"{"type":"alert_subscription_confirmed"}"#.to_string();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let ok = sender.send(confirm).is_ok();
        if ok {
            lock(&self.shared.subs).connections.insert(
                id,
                SubscriberEntry {
                    sender,
                    kind: FeedKind::Alert,
                    channel_id: None,
                },
            );
        }
        id
    }

    /// Atomically move a subscriber to another channel bucket and
    /// confirm. At most one subscription per subscriber.
    pub fn switch_channel(&self, id: SubscriberId, channel_id: i64) {
        let confirm = format!(
            r#"{{"type":"subscription_confirmed","channel_id":{}}}"#,
            channel_id
        );

        let mut gc_candidate = None;
        let sender = {
            let mut subs = lock(&self.shared.subs);
            let entry = match subs.connections.get_mut(&id) {
                Some(e) if e.kind == FeedKind::Channel => e,
                _ => return,
            };
            let previous = entry.channel_id.replace(channel_id);
            let sender = entry.sender.clone();

            if let Some(prev) = previous {
                if prev != channel_id {
                    if let Some(set) = subs.channel_subs.get_mut(&prev) {
                        set.remove(&id);
                        if set.is_empty() {
                            subs.channel_subs.remove(&prev);
                            gc_candidate = Some(prev);
                        }
                    }
                }
            }
            subs.channel_subs.entry(channel_id).or_default().insert(id);
            sender
        };

        if sender.send(confirm).is_err() {
            self.remove_subscriber(id);
        }
        if let Some(prev) = gc_candidate {
            // channel lost its last watcher; stale slot can be dropped too
            lock(&self.shared.slots).remove(&prev);
        }
    }

    /// Remove a subscriber from both maps
    pub fn remove_subscriber(&self, id: SubscriberId) {
        lock(&self.shared.subs).remove(id);
    }

    /// Broadcast an alert to every alert-feed subscriber, unthrottled
    pub fn broadcast_alert(&self, notification: &AlertNotification) {
        let payload = match serde_json::to_string(notification) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Alert serialization failed");
                return;
            }
        };

        let targets: Vec<(SubscriberId, UnboundedSender<String>)> = {
            let subs = lock(&self.shared.subs);
            subs.connections
                .iter()
                .filter(|(_, e)| e.kind == FeedKind::Alert)
                .map(|(&id, e)| (id, e.sender.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, sender) in targets {
            if sender.send(payload.clone()).is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            self.remove_subscriber(id);
        }
    }

    /// Subscriber count for a channel (diagnostics)
    pub fn channel_subscriber_count(&self, channel_id: i64) -> usize {
        lock(&self.shared.subs)
            .channel_subs
            .get(&channel_id)
            .map_or(0, |s| s.len())
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn sender_loop(shared: Arc<BusShared>, config_store: Arc<ConfigStore>) {
    let mut fps_gate = FpsGate::new();

    while shared.running.load(Ordering::SeqCst) {
        let pending: HashMap<i64, Mat> = {
            let mut slots = lock(&shared.slots);
            while slots.is_empty() && shared.running.load(Ordering::SeqCst) {
                let (guard, _) = shared
                    .slot_ready
                    .wait_timeout(slots, Duration::from_millis(200))
                    .unwrap_or_else(|e| e.into_inner());
                slots = guard;
            }
            std::mem::take(&mut *slots)
        };

        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        for (channel_id, frame) in pending {
            let targets: Vec<(SubscriberId, UnboundedSender<String>)> = {
                let subs = lock(&shared.subs);
                match subs.channel_subs.get(&channel_id) {
                    Some(ids) if !ids.is_empty() => ids
                        .iter()
                        .filter_map(|id| {
                            subs.connections
                                .get(id)
                                .map(|e| (*id, e.sender.clone()))
                        })
                        .collect(),
                    _ => {
                        fps_gate.gc(channel_id);
                        continue;
                    }
                }
            };

            let target_fps = config_store
                .cached_channel_blocking(channel_id)
                .map_or(25, |c| c.fps);
            if !fps_gate.should_send(channel_id, target_fps, Instant::now()) {
                continue;
            }

            let image_base64 = match encode_jpeg_base64(&frame, FRAME_JPEG_QUALITY) {
                Ok(b64) => b64,
                Err(e) => {
                    tracing::warn!(channel_id, error = %e, "Frame JPEG encode failed");
                    continue;
                }
            };

            let payload = format!(
                r#"{{"type":"frame","channel_id":{},"image_base64":"{}","timestamp":"{}"}}"#,
                channel_id,
                image_base64,
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
            );

            let mut dead = Vec::new();
            for (id, sender) in targets {
                if sender.send(payload.clone()).is_err() {
                    dead.push(id);
                }
            }
            if !dead.is_empty() {
                let mut subs = lock(&shared.subs);
                for id in dead {
                    subs.remove(id);
                }
            }
        }
    }

    tracing::info!("FrameBus sender thread exited");
}

/// JPEG-encode a BGR frame and base64 it
pub fn encode_jpeg_base64(frame: &Mat, quality: i32) -> crate::Result<String> {
    let mut buf = Vector::<u8>::new();
    let mut params = Vector::<i32>::new();
    params.push(imgcodecs::IMWRITE_JPEG_QUALITY);
    params.push(quality);
    imgcodecs::imencode(".jpg", frame, &mut buf, &params)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_fps_gate_caps_delivery_rate() {
        let mut gate = FpsGate::new();
        let t0 = Instant::now();

        // 25 fps -> 40ms minimum gap
        assert!(gate.should_send(1, 25, t0));
        assert!(!gate.should_send(1, 25, t0 + Duration::from_millis(10)));
        assert!(!gate.should_send(1, 25, t0 + Duration::from_millis(39)));
        assert!(gate.should_send(1, 25, t0 + Duration::from_millis(40)));
    }

    #[test]
    fn test_fps_gate_per_channel_state() {
        let mut gate = FpsGate::new();
        let t0 = Instant::now();
        assert!(gate.should_send(1, 25, t0));
        // a different channel is not throttled by channel 1's send
        assert!(gate.should_send(2, 25, t0));
    }

    #[test]
    fn test_fps_gate_gc_resets_channel() {
        let mut gate = FpsGate::new();
        let t0 = Instant::now();
        assert!(gate.should_send(1, 25, t0));
        gate.gc(1);
        // state gone, next frame passes immediately
        assert!(gate.should_send(1, 25, t0));
    }

    #[test]
    fn test_switch_channel_moves_subscriber() {
        let bus = FrameBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = bus.add_channel_subscriber(tx);
        bus.switch_channel(id, 1);
        assert_eq!(bus.channel_subscriber_count(1), 1);

        let confirm = rx.try_recv().unwrap();
        assert!(confirm.contains(r#""subscription_confirmed""#));
        assert!(confirm.contains(r#""channel_id":1"#));

        bus.switch_channel(id, 2);
        assert_eq!(bus.channel_subscriber_count(1), 0);
        assert_eq!(bus.channel_subscriber_count(2), 1);
        let confirm = rx.try_recv().unwrap();
        assert!(confirm.contains(r#""channel_id":2"#));
    }

    #[test]
    fn test_closed_subscriber_removed_on_alert_broadcast() {
        let bus = FrameBus::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = bus.add_alert_subscriber(tx);
        drop(rx);

        bus.broadcast_alert(&AlertNotification {
            message_type: "alert".to_string(),
            channel_id: 1,
            channel_name: "front".to_string(),
            alert_type: "person".to_string(),
            image_base64: String::new(),
            confidence: 0.9,
            detected_objects: serde_json::json!([]),
            timestamp: "2026-01-01 00:00:00".to_string(),
        });

        assert!(!lock(&bus.shared.subs).connections.contains_key(&id));
    }

    #[test]
    fn test_remove_subscriber_clears_both_maps() {
        let bus = FrameBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = bus.add_channel_subscriber(tx);
        bus.switch_channel(id, 7);

        bus.remove_subscriber(id);
        assert_eq!(bus.channel_subscriber_count(7), 0);
        assert!(!lock(&bus.shared.subs).connections.contains_key(&id));
    }
}
