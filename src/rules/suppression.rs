//! Time-windowed alert suppression
//!
//! One table for the whole process; keys are (channel_id, rule_id).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Entries older than this are pruned during record_fire
const GC_AGE: Duration = Duration::from_secs(3600);

/// Per (channel, rule) last-fire table
pub struct SuppressionTable {
    entries: Mutex<HashMap<(i64, i64), Instant>>,
}

impl Default for SuppressionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SuppressionTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// True iff a fire was recorded strictly less than `window_seconds` ago.
    /// An elapsed time exactly equal to the window is not suppressed.
    pub fn is_suppressed(&self, channel_id: i64, rule_id: i64, window_seconds: u64) -> bool {
        self.is_suppressed_at(channel_id, rule_id, window_seconds, Instant::now())
    }

    fn is_suppressed_at(
        &self,
        channel_id: i64,
        rule_id: i64,
        window_seconds: u64,
        now: Instant,
    ) -> bool {
        let entries = self.lock();
        match entries.get(&(channel_id, rule_id)) {
            Some(&last) => now.saturating_duration_since(last) < Duration::from_secs(window_seconds),
            None => false,
        }
    }

    /// Record a fire and opportunistically prune stale entries
    pub fn record_fire(&self, channel_id: i64, rule_id: i64) {
        self.record_fire_at(channel_id, rule_id, Instant::now());
    }

    fn record_fire_at(&self, channel_id: i64, rule_id: i64, now: Instant) {
        let mut entries = self.lock();
        entries.insert((channel_id, rule_id), now);
        entries.retain(|_, &mut last| now.saturating_duration_since(last) < GC_AGE);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(i64, i64), Instant>> {
        // Writers never panic while holding the lock; recover anyway
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecorded_pair_not_suppressed() {
        let table = SuppressionTable::new();
        assert!(!table.is_suppressed(1, 1, 30));
    }

    #[test]
    fn test_suppressed_inside_window() {
        let table = SuppressionTable::new();
        let t0 = Instant::now();
        table.record_fire_at(1, 1, t0);

        assert!(table.is_suppressed_at(1, 1, 30, t0 + Duration::from_secs(10)));
        // other channel or rule unaffected
        assert!(!table.is_suppressed_at(2, 1, 30, t0 + Duration::from_secs(10)));
        assert!(!table.is_suppressed_at(1, 2, 30, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_window_boundary_is_strict() {
        let table = SuppressionTable::new();
        let t0 = Instant::now();
        table.record_fire_at(1, 1, t0);

        // elapsed == window: not suppressed
        assert!(!table.is_suppressed_at(1, 1, 30, t0 + Duration::from_secs(30)));
        // one short of the window: suppressed
        assert!(table.is_suppressed_at(1, 1, 30, t0 + Duration::from_secs(29)));
    }

    #[test]
    fn test_zero_window_never_suppresses() {
        let table = SuppressionTable::new();
        let t0 = Instant::now();
        table.record_fire_at(1, 1, t0);
        assert!(!table.is_suppressed_at(1, 1, 0, t0));
    }

    #[test]
    fn test_gc_prunes_stale_entries() {
        let table = SuppressionTable::new();
        let t0 = Instant::now();
        table.record_fire_at(1, 1, t0);
        // a fire two hours later prunes the first entry
        table.record_fire_at(2, 2, t0 + Duration::from_secs(7200));

        let entries = table.lock();
        assert!(!entries.contains_key(&(1, 1)));
        assert!(entries.contains_key(&(2, 2)));
    }
}
