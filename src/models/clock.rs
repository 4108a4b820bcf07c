use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::models::messages::Side;

/// Time control parameters for one match, immutable once the match is
/// created. All values are in milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeControl {
    pub initial: u64,
    pub low_time_threshold: u64,
    pub increment: u64,
    pub is_unlimited: bool,
}

impl TimeControl {
    /// Looks up the fixed catalog by the minute selector used on the
    /// create request: 0 (untimed), 1, 3 or 10.
    pub fn from_selection(minutes: u64) -> Option<TimeControl> {
        match minutes {
            0 => Some(TimeControl {
                initial: 0,
                low_time_threshold: 0,
                increment: 0,
                is_unlimited: true,
            }),
            1 => Some(TimeControl {
                initial: 60_000,
                low_time_threshold: 10_000,
                increment: 3_000,
                is_unlimited: false,
            }),
            3 => Some(TimeControl {
                initial: 180_000,
                low_time_threshold: 30_000,
                increment: 4_000,
                is_unlimited: false,
            }),
            10 => Some(TimeControl {
                initial: 600_000,
                low_time_threshold: 60_000,
                increment: 5_000,
                is_unlimited: false,
            }),
            _ => None,
        }
    }
}

/// Per-side countdown clock for one match. Elapsed time is wall-clock
/// based: a timestamp is captured at each move and the difference is
/// charged to the side that just moved. Remaining time is kept signed so
/// the subtract / top-up / flag order matches the inherited behavior
/// exactly.
pub struct ClockEngine {
    control: TimeControl,
    white_ms: i64,
    black_ms: i64,
    last_move_at: Option<Instant>,
}

impl ClockEngine {
    pub fn new(control: TimeControl) -> Self {
        ClockEngine {
            control,
            white_ms: control.initial as i64,
            black_ms: control.initial as i64,
            last_move_at: None,
        }
    }

    pub fn control(&self) -> TimeControl {
        self.control
    }

    /// Remaining time in milliseconds, clamped at zero. None for untimed
    /// matches.
    pub fn remaining(&self, side: Side) -> Option<u64> {
        if self.control.is_unlimited {
            return None;
        }
        let ms = match side {
            Side::White => self.white_ms,
            Side::Black => self.black_ms,
        };
        Some(ms.max(0) as u64)
    }

    /// Restores both sides to the initial allotment for a fresh segment.
    pub fn reset(&mut self) {
        self.white_ms = self.control.initial as i64;
        self.black_ms = self.control.initial as i64;
        self.last_move_at = None;
    }

    /// Charges the side that just moved for the wall time since the
    /// previous move and returns the winner if that side's flag fell.
    ///
    /// The first call of a segment only seeds the move timestamp. The
    /// low-time top-up is re-applied on every move that lands at or below
    /// the threshold, not just the first crossing.
    pub fn record_elapsed(&mut self, side: Side, now: Instant) -> Option<Side> {
        if self.control.is_unlimited {
            return None;
        }
        let verdict = match self.last_move_at {
            None => None,
            Some(last) => {
                let elapsed = now.duration_since(last).as_millis() as i64;
                let threshold = self.control.low_time_threshold as i64;
                let increment = self.control.increment as i64;
                let remaining = match side {
                    Side::White => &mut self.white_ms,
                    Side::Black => &mut self.black_ms,
                };
                *remaining -= elapsed;
                if *remaining <= threshold {
                    *remaining += increment;
                }
                if *remaining <= 0 {
                    Some(side.opposite())
                } else {
                    None
                }
            }
        };
        self.last_move_at = Some(now);
        verdict
    }
}
