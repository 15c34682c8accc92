//! Swing pivots, untaken levels and PMG runs
//!
//! Pivots are confirmed zig-zag style: a running high becomes a peak once
//! price falls `down_threshold` below it, a running low becomes a valley once
//! price rises `up_threshold` above it. Pivots that price has not traded
//! through since ("untaken") are the magnitude targets of a trade.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{Direction, Ratio, OHLCV};

/// Peak or valley
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PivotKind {
    Peak,
    Valley,
}

/// Per-bar pivot marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum PivotMark {
    #[default]
    None,
    Peak,
    Valley,
}

impl PivotMark {
    /// 1 for a peak, -1 for a valley, 0 otherwise
    pub fn value(self) -> i8 {
        match self {
            PivotMark::None => 0,
            PivotMark::Peak => 1,
            PivotMark::Valley => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Pivot {
    /// Bar holding the extreme
    pub index: usize,
    /// Bar on which the reversal threshold was crossed
    pub confirmed_index: usize,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub kind: PivotKind,
    /// Set by [`PivotSet::mark_taken`]
    pub taken: bool,
}

impl Pivot {
    /// Whether `bar` trades through this pivot
    #[inline]
    pub fn is_taken_by<T: OHLCV>(&self, bar: &T) -> bool {
        match self.kind {
            PivotKind::Peak => bar.high() > self.value,
            PivotKind::Valley => bar.low() < self.value,
        }
    }
}

/// Pivot Machine Gun: a run of strictly alternating pivots on consecutive bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PmgRun {
    pub start: usize,
    pub end: usize,
    pub count: usize,
    pub direction: Direction,
}

/// Output of [`PivotTracker::detect`]
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PivotSet {
    /// Chronological by `index`
    pub pivots: Vec<Pivot>,
    /// One marker per input bar
    pub marks: Vec<PivotMark>,
}

impl PivotSet {
    pub fn peaks(&self) -> impl Iterator<Item = &Pivot> {
        self.pivots.iter().filter(|p| p.kind == PivotKind::Peak)
    }

    pub fn valleys(&self) -> impl Iterator<Item = &Pivot> {
        self.pivots.iter().filter(|p| p.kind == PivotKind::Valley)
    }

    /// Pivots no later bar has traded through
    pub fn untaken<T: OHLCV>(&self, bars: &[T]) -> Vec<Pivot> {
        match bars.len() {
            0 => Vec::new(),
            n => self.untaken_as_of(bars, n - 1),
        }
    }

    /// Untaken pivots as seen at bar `index`: only pivots confirmed by then,
    /// checked against bars up to and including `index`.
    pub fn untaken_as_of<T: OHLCV>(&self, bars: &[T], index: usize) -> Vec<Pivot> {
        let last = index.min(bars.len().saturating_sub(1));
        self.pivots
            .iter()
            .filter(|p| p.confirmed_index <= last)
            .filter(|p| !bars[p.index + 1..=last].iter().any(|b| p.is_taken_by(b)))
            .copied()
            .collect()
    }

    /// Set the `taken` flag on every pivot from the full series
    pub fn mark_taken<T: OHLCV>(&mut self, bars: &[T]) {
        for p in &mut self.pivots {
            p.taken = bars.get(p.index + 1..).is_some_and(|rest| rest.iter().any(|b| p.is_taken_by(b)));
        }
    }
}

/// Zig-zag pivot detector
#[derive(Debug, Clone)]
pub struct PivotTracker {
    /// Rise above a running low that confirms a valley
    pub up_threshold: Ratio,
    /// Fall below a running high that confirms a peak
    pub down_threshold: Ratio,
}

impl Default for PivotTracker {
    fn default() -> Self {
        Self {
            up_threshold: Ratio::new_const(0.002),
            down_threshold: Ratio::new_const(0.002),
        }
    }
}

#[derive(Clone, Copy)]
enum Leg {
    Unknown,
    Rising,
    Falling,
}

impl PivotTracker {
    pub fn new(up_threshold: Ratio, down_threshold: Ratio) -> Self {
        Self {
            up_threshold,
            down_threshold,
        }
    }

    pub fn detect<T: OHLCV>(&self, bars: &[T]) -> PivotSet {
        let mut set = PivotSet {
            pivots: Vec::new(),
            marks: vec![PivotMark::None; bars.len()],
        };
        let Some(first) = bars.first() else {
            return set;
        };

        let up = 1.0 + self.up_threshold.get();
        let down = 1.0 - self.down_threshold.get();

        let mut leg = Leg::Unknown;
        let mut hi = (0, first.high());
        let mut lo = (0, first.low());

        let confirm = |set: &mut PivotSet, (index, value): (usize, f64), at: usize, kind: PivotKind| {
            set.marks[index] = match kind {
                PivotKind::Peak => PivotMark::Peak,
                PivotKind::Valley => PivotMark::Valley,
            };
            set.pivots.push(Pivot {
                index,
                confirmed_index: at,
                value,
                timestamp: bars[index].timestamp(),
                kind,
                taken: false,
            });
        };

        for (i, bar) in bars.iter().enumerate().skip(1) {
            match leg {
                Leg::Unknown => {
                    if bar.high() > hi.1 {
                        hi = (i, bar.high());
                    }
                    if bar.low() < lo.1 {
                        lo = (i, bar.low());
                    }
                    if hi.0 < i && bar.low() <= hi.1 * down {
                        confirm(&mut set, hi, i, PivotKind::Peak);
                        leg = Leg::Falling;
                        lo = (i, bar.low());
                    } else if lo.0 < i && bar.high() >= lo.1 * up {
                        confirm(&mut set, lo, i, PivotKind::Valley);
                        leg = Leg::Rising;
                        hi = (i, bar.high());
                    }
                },
                Leg::Rising => {
                    if bar.high() > hi.1 {
                        hi = (i, bar.high());
                    } else if bar.low() <= hi.1 * down {
                        confirm(&mut set, hi, i, PivotKind::Peak);
                        leg = Leg::Falling;
                        lo = (i, bar.low());
                    }
                },
                Leg::Falling => {
                    if bar.low() < lo.1 {
                        lo = (i, bar.low());
                    } else if bar.high() >= lo.1 * up {
                        confirm(&mut set, lo, i, PivotKind::Valley);
                        leg = Leg::Rising;
                        hi = (i, bar.high());
                    }
                },
            }
        }

        debug!(
            bars = bars.len(),
            peaks = set.peaks().count(),
            valleys = set.valleys().count(),
            "pivots detected"
        );
        set
    }
}

/// Untaken pivot values strictly beyond `price` in the trade direction, nearest first
pub fn magnitude_targets(price: f64, direction: Direction, pivots: &[Pivot]) -> Vec<f64> {
    let mut targets: Vec<f64> = pivots
        .iter()
        .map(|p| p.value)
        .filter(|&v| match direction {
            Direction::Bullish => v > price,
            Direction::Bearish => v < price,
        })
        .collect();

    targets.sort_by(|a, b| (a - price).abs().total_cmp(&(b - price).abs()));
    targets.dedup();
    targets
}

/// Find PMG runs in a marker array.
///
/// Maximal runs of consecutive non-empty markers are split wherever two
/// neighbours repeat the same kind; every strictly alternating piece of at
/// least `min_count` markers is reported. A run starting on a valley is
/// bullish.
pub fn detect_pmg(marks: &[PivotMark], min_count: usize) -> Vec<PmgRun> {
    let min_count = min_count.max(1);
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;

    let close = |start: usize, end: usize, runs: &mut Vec<PmgRun>| {
        let count = end - start + 1;
        if count >= min_count {
            runs.push(PmgRun {
                start,
                end,
                count,
                direction: match marks[start] {
                    PivotMark::Valley => Direction::Bullish,
                    _ => Direction::Bearish,
                },
            });
        }
    };

    for (i, mark) in marks.iter().enumerate() {
        match (*mark, start) {
            (PivotMark::None, Some(s)) => {
                close(s, i - 1, &mut runs);
                start = None;
            },
            (PivotMark::None, None) => {},
            (_, None) => start = Some(i),
            (m, Some(s)) => {
                if m == marks[i - 1] {
                    close(s, i - 1, &mut runs);
                    start = Some(i);
                }
            },
        }
    }
    if let Some(s) = start {
        close(s, marks.len() - 1, &mut runs);
    }

    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;
    use chrono::{Duration, TimeZone};

    fn series(hl: &[(f64, f64)]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        hl.iter()
            .enumerate()
            .map(|(i, &(h, l))| {
                let mid = (h + l) / 2.0;
                Bar::new(start + Duration::days(i as i64), mid, h, l, mid, 1.0)
            })
            .collect()
    }

    fn tracker(pct: f64) -> PivotTracker {
        PivotTracker::new(Ratio::new(pct).unwrap(), Ratio::new(pct).unwrap())
    }

    #[test]
    fn detects_alternating_swings() {
        let bars = series(&[
            (101.0, 99.0),
            (106.0, 104.0),
            (110.0, 108.0),
            (103.0, 100.0),
            (97.0, 95.0),
            (104.0, 101.0),
            (109.0, 107.0),
        ]);
        let set = tracker(0.05).detect(&bars);

        let kinds: Vec<_> = set.pivots.iter().map(|p| (p.kind, p.index, p.value)).collect();
        assert_eq!(
            kinds,
            vec![
                (PivotKind::Valley, 0, 99.0),
                (PivotKind::Peak, 2, 110.0),
                (PivotKind::Valley, 4, 95.0),
            ]
        );
        assert_eq!(set.marks[2], PivotMark::Peak);
        assert_eq!(set.marks[4], PivotMark::Valley);
        assert_eq!(set.pivots[1].confirmed_index, 3);
    }

    #[test]
    fn pivot_becomes_taken_when_exceeded() {
        let bars = series(&[
            (101.0, 99.0),
            (110.0, 108.0),
            (103.0, 100.0),
            (106.0, 102.0),
            (111.0, 106.0),
        ]);
        let mut set = tracker(0.05).detect(&bars);
        let peak = *set.peaks().next().unwrap();
        assert_eq!(peak.value, 110.0);

        // untaken while the highs stay at or below 110
        assert!(set.untaken_as_of(&bars, 3).iter().any(|p| p.index == peak.index));
        // bar 4 trades 111
        assert!(!set.untaken_as_of(&bars, 4).iter().any(|p| p.index == peak.index));
        assert!(!set.untaken(&bars).iter().any(|p| p.kind == PivotKind::Peak));

        set.mark_taken(&bars);
        assert!(set.peaks().next().unwrap().taken);
    }

    #[test]
    fn untaken_as_of_ignores_unconfirmed_pivots() {
        let bars = series(&[(101.0, 99.0), (110.0, 108.0), (103.0, 100.0)]);
        let set = tracker(0.05).detect(&bars);
        let peak = set.peaks().next().unwrap();
        assert_eq!(peak.confirmed_index, 2);
        assert!(set.untaken_as_of(&bars, 1).iter().all(|p| p.kind != PivotKind::Peak));
        assert!(set.untaken_as_of(&bars, 2).iter().any(|p| p.kind == PivotKind::Peak));
    }

    #[test]
    fn magnitude_targets_sorted_nearest_first() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let p = |value, kind| Pivot {
            index: 0,
            confirmed_index: 0,
            value,
            timestamp: ts,
            kind,
            taken: false,
        };
        let pivots = vec![
            p(120.0, PivotKind::Peak),
            p(105.0, PivotKind::Peak),
            p(90.0, PivotKind::Valley),
            p(112.0, PivotKind::Peak),
            p(95.0, PivotKind::Valley),
        ];
        assert_eq!(magnitude_targets(100.0, Direction::Bullish, &pivots), vec![105.0, 112.0, 120.0]);
        assert_eq!(magnitude_targets(100.0, Direction::Bearish, &pivots), vec![95.0, 90.0]);
        assert!(magnitude_targets(130.0, Direction::Bullish, &pivots).is_empty());
    }

    #[test]
    fn pmg_requires_five_alternating_pivots() {
        use PivotMark::{None as N, Peak as P, Valley as V};

        let marks = [N, V, P, V, P, V, N, P, V, P, N];
        let runs = detect_pmg(&marks, 5);
        assert_eq!(
            runs,
            vec![PmgRun {
                start: 1,
                end: 5,
                count: 5,
                direction: Direction::Bullish
            }]
        );

        // repeated kind splits the run
        let marks = [P, V, P, P, V, P, V, P, N];
        let runs = detect_pmg(&marks, 5);
        assert_eq!(runs.len(), 1);
        assert_eq!((runs[0].start, runs[0].end, runs[0].count), (3, 7, 5));
        assert_eq!(runs[0].direction, Direction::Bearish);

        assert!(detect_pmg(&[], 5).is_empty());
    }
}
