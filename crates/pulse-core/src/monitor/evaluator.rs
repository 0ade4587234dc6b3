//! Pure classification of media-sequence evolution between polls.
//!
//! Small gaps are routine with a 7 s poll period over ~6 s segments, so a
//! forward step of 1 or 2 beyond the expected next sequence stays silent;
//! 3 or more is a jump worth a ledger entry. Any regression is a reset.

/// How the media sequence moved relative to the previously cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceChange {
    /// Normal advance (including an unchanged sequence, which the
    /// freshness pass accounts for separately).
    Steady,
    /// Forward gap of 1–2 beyond the expected next sequence; tolerated.
    SilentGap { gap: i64 },
    /// Forward gap of 3 or more.
    Jump { from: i64, to: i64, gap: i64 },
    /// Sequence moved backwards.
    Reset { from: i64, to: i64 },
}

/// Minimum gap beyond the expected next sequence that counts as a jump.
pub const JUMP_THRESHOLD: i64 = 3;

pub fn classify_sequence(last: i64, seq: i64) -> SequenceChange {
    if seq < last {
        return SequenceChange::Reset { from: last, to: seq };
    }

    let expected = last + 1;
    if seq > expected {
        let gap = seq - expected;
        if gap >= JUMP_THRESHOLD {
            SequenceChange::Jump { from: last, to: seq, gap }
        } else {
            SequenceChange::SilentGap { gap }
        }
    } else {
        SequenceChange::Steady
    }
}

pub fn jump_details(from: i64, to: i64) -> String {
    format!("Sequence jumped from {} to {} (gap: {})", from, to, to - from - 1)
}

pub fn reset_details(from: i64, to: i64) -> String {
    format!("Sequence reset from {} to {}", from, to)
}

pub fn stale_details(elapsed_ms: i64, threshold_ms: u64) -> String {
    format!(
        "Manifest has not advanced for {}ms (stale threshold {}ms)",
        elapsed_ms, threshold_ms
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_and_next_are_steady() {
        assert_eq!(classify_sequence(100, 100), SequenceChange::Steady);
        assert_eq!(classify_sequence(100, 101), SequenceChange::Steady);
    }

    #[test]
    fn small_gaps_stay_silent() {
        assert_eq!(classify_sequence(100, 102), SequenceChange::SilentGap { gap: 1 });
        assert_eq!(classify_sequence(100, 103), SequenceChange::SilentGap { gap: 2 });
    }

    #[test]
    fn gap_of_three_is_a_jump() {
        assert_eq!(
            classify_sequence(100, 104),
            SequenceChange::Jump { from: 100, to: 104, gap: 3 }
        );
        assert_eq!(
            classify_sequence(100, 105),
            SequenceChange::Jump { from: 100, to: 105, gap: 4 }
        );
    }

    #[test]
    fn regression_is_a_reset() {
        assert_eq!(
            classify_sequence(100, 50),
            SequenceChange::Reset { from: 100, to: 50 }
        );
        assert_eq!(
            classify_sequence(100, 99),
            SequenceChange::Reset { from: 100, to: 99 }
        );
    }

    #[test]
    fn detail_messages() {
        assert_eq!(jump_details(100, 105), "Sequence jumped from 100 to 105 (gap: 4)");
        assert_eq!(reset_details(100, 50), "Sequence reset from 100 to 50");
        let stale = stale_details(7100, 7000);
        assert!(stale.contains("7100ms"));
        assert!(stale.contains("7000ms"));
    }
}
