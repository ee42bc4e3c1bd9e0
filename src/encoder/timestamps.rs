//! Timestamp discipline for the live mux path
//!
//! Enforces, over all packets written in a session: strict DTS
//! monotonicity, DTS <= PTS, zero-based timestamps, and keyframe-first
//! delivery.

/// Per-session timestamp gate. Feed it packets in encode order (after
/// rescaling to the muxer time base); packets it rejects must not reach
/// the muxer.
pub struct TimestampGate {
    start_pts: Option<i64>,
    last_dts: Option<i64>,
    seen_keyframe: bool,
}

impl Default for TimestampGate {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampGate {
    pub fn new() -> Self {
        Self {
            start_pts: None,
            last_dts: None,
            seen_keyframe: false,
        }
    }

    /// Admit one packet. Returns the corrected `(pts, dts)` pair, or
    /// None when the packet must be discarded (non-keyframe before the
    /// first keyframe).
    pub fn admit(&mut self, pts: i64, dts: i64, keyframe: bool) -> Option<(i64, i64)> {
        if !self.seen_keyframe {
            if !keyframe {
                return None;
            }
            self.seen_keyframe = true;
        }

        // zero-base the stream on the first admitted packet
        let start = *self.start_pts.get_or_insert(pts);
        let mut pts = pts - start;
        let mut dts = dts - start;

        if dts > pts {
            dts = pts;
        }
        if let Some(last) = self.last_dts {
            if dts <= last {
                dts = last + 1;
                if pts < dts {
                    pts = dts;
                }
            }
        }
        self.last_dts = Some(dts);

        Some((pts, dts))
    }

    /// Whether a keyframe has been admitted yet
    pub fn started(&self) -> bool {
        self.seen_keyframe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discards_until_first_keyframe() {
        let mut gate = TimestampGate::new();
        assert_eq!(gate.admit(0, 0, false), None);
        assert_eq!(gate.admit(1, 1, false), None);
        assert!(!gate.started());

        assert_eq!(gate.admit(2, 2, true), Some((0, 0)));
        assert!(gate.started());
    }

    #[test]
    fn test_zero_based_from_first_admitted() {
        let mut gate = TimestampGate::new();
        assert_eq!(gate.admit(1000, 1000, true), Some((0, 0)));
        assert_eq!(gate.admit(1040, 1040, false), Some((40, 40)));
    }

    #[test]
    fn test_dts_never_exceeds_pts() {
        let mut gate = TimestampGate::new();
        gate.admit(0, 0, true);
        // encoder emitted dts ahead of pts
        let (pts, dts) = gate.admit(40, 80, false).unwrap();
        assert!(dts <= pts);
        assert_eq!((pts, dts), (40, 40));
    }

    #[test]
    fn test_strict_dts_monotonicity() {
        let mut gate = TimestampGate::new();
        gate.admit(0, 0, true);
        gate.admit(40, 40, false);

        // duplicate dts bumped forward
        let (_, dts) = gate.admit(80, 40, false).unwrap();
        assert_eq!(dts, 41);

        // regression bumped past the last written dts
        let (pts, dts) = gate.admit(30, 30, false).unwrap();
        assert_eq!(dts, 42);
        assert!(pts >= dts);
    }

    #[test]
    fn test_sequence_invariants_hold() {
        let mut gate = TimestampGate::new();
        let inputs = [
            (100, 100, true),
            (140, 140, false),
            (180, 170, false),
            (180, 180, false),
            (220, 260, false),
        ];

        let mut last_dts: Option<i64> = None;
        for (pts, dts, key) in inputs {
            if let Some((pts, dts)) = gate.admit(pts, dts, key) {
                assert!(dts <= pts);
                if let Some(last) = last_dts {
                    assert!(dts > last);
                }
                last_dts = Some(dts);
            }
        }
    }
}
