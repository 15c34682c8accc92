//! Intrabar trigger refinement
//!
//! A coarse pattern only says that its trigger bar crossed the setup bar's
//! range at some point. Scanning the finer bars inside the trigger bar's
//! period gives the first crossing time and price.

use chrono::{DateTime, Utc};

use crate::{
    continuity::Timeframe,
    detectors::{helpers::DEFAULT_TOLERANCE, PatternCandidate, PatternKind},
    Direction, OHLCV,
};

/// First crossing of a setup bar's range inside a coarse trigger bar
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TriggerEvent {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    /// Side that crossed first; may disagree with the pattern
    pub direction: Direction,
    pub kind: PatternKind,
    pub coarse_timeframe: Timeframe,
    pub coarse_index: usize,
    /// Index into the fine series
    pub fine_index: usize,
    pub setup_high: f64,
    pub setup_low: f64,
    pub stop: f64,
}

impl TriggerEvent {
    pub fn confirms(&self, candidate: &PatternCandidate) -> bool {
        self.direction == candidate.direction
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntrabarRefiner {
    pub tolerance: f64,
}

impl Default for IntrabarRefiner {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl IntrabarRefiner {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// At most one event per candidate; `None` when no fine bar in the trigger
    /// bar's period crosses either side of the setup bar.
    pub fn refine<C: OHLCV, F: OHLCV>(
        &self,
        candidate: &PatternCandidate,
        coarse_bars: &[C],
        coarse_timeframe: Timeframe,
        fine_bars: &[F],
    ) -> Option<TriggerEvent> {
        let setup = coarse_bars.get(candidate.trigger_index.checked_sub(1)?)?;
        let trigger_bar = coarse_bars.get(candidate.trigger_index)?;
        let key = coarse_timeframe.bucket(trigger_bar.timestamp());

        let first = fine_bars.partition_point(|b| coarse_timeframe.bucket(b.timestamp()) < key);
        let (high, low) = (setup.high(), setup.low());
        let long_level = high + self.tolerance;
        let short_level = low - self.tolerance;

        fine_bars[first..]
            .iter()
            .enumerate()
            .take_while(|(_, b)| coarse_timeframe.bucket(b.timestamp()) == key)
            .find_map(|(offset, b)| {
                let (direction, price, stop) = if b.high() >= long_level {
                    (Direction::Bullish, long_level, low)
                } else if b.low() <= short_level {
                    (Direction::Bearish, short_level, high)
                } else {
                    return None;
                };
                Some(TriggerEvent {
                    timestamp: b.timestamp(),
                    price,
                    direction,
                    kind: candidate.kind,
                    coarse_timeframe,
                    coarse_index: candidate.trigger_index,
                    fine_index: first + offset,
                    setup_high: high,
                    setup_low: low,
                    stop,
                })
            })
    }

    /// Refine every candidate; events sorted by timestamp
    pub fn refine_all<C: OHLCV, F: OHLCV>(
        &self,
        candidates: &[PatternCandidate],
        coarse_bars: &[C],
        coarse_timeframe: Timeframe,
        fine_bars: &[F],
    ) -> Vec<TriggerEvent> {
        let mut events: Vec<_> = candidates
            .iter()
            .filter_map(|c| self.refine(c, coarse_bars, coarse_timeframe, fine_bars))
            .collect();
        events.sort_by_key(|e| e.timestamp);
        events
    }
}
