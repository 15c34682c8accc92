//! Timeframe continuity scoring
//!
//! For every bar of the base series the scorer collects the scenario code
//! each other timeframe shows at that moment and counts bullish (2U) against
//! bearish (2D) votes. Inside and outside bars never vote.
//!
//! Mapping rules:
//! - coarser timeframe: the coarser bar whose period contains the base bar
//! - finer timeframe: majority of 2U vs 2D among the finer bars inside the
//!   base bar's period
//! - same timeframe: the base bar's own code
//!
//! A base bar with no counterpart in some timeframe is neutral for it.

use std::{cmp::Ordering, collections::HashMap};

use chrono::{DateTime, Datelike, Utc};

use crate::{
    scenario::{classify, ScenarioCode},
    Direction, OHLCV,
};

// ============================================================
// TIMEFRAME
// ============================================================

/// Bar granularity. Buckets are calendar aligned in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Minutes(u32),
    Hour,
    Day,
    /// ISO week
    Week,
    Month,
}

impl Timeframe {
    /// Nominal length in seconds; a month counts as 1/12 of a Gregorian year
    pub fn duration_secs(self) -> i64 {
        match self {
            Timeframe::Minutes(n) => i64::from(n.max(1)) * 60,
            Timeframe::Hour => 3_600,
            Timeframe::Day => 86_400,
            Timeframe::Week => 604_800,
            Timeframe::Month => 2_629_746,
        }
    }

    /// Compare by nominal duration
    pub fn cmp_duration(self, other: Timeframe) -> Ordering {
        self.duration_secs().cmp(&other.duration_secs())
    }

    pub fn is_coarser_than(self, other: Timeframe) -> bool {
        self.cmp_duration(other) == Ordering::Greater
    }

    /// Key of the period containing `ts`. Keys increase with time.
    pub fn bucket(self, ts: DateTime<Utc>) -> i64 {
        match self {
            Timeframe::Minutes(_) | Timeframe::Hour | Timeframe::Day => {
                ts.timestamp().div_euclid(self.duration_secs())
            },
            Timeframe::Week => {
                let week = ts.iso_week();
                i64::from(week.year()) * 100 + i64::from(week.week())
            },
            Timeframe::Month => i64::from(ts.year()) * 12 + i64::from(ts.month0()),
        }
    }

    pub fn label(self) -> String {
        match self {
            Timeframe::Minutes(n) => format!("{n}m"),
            Timeframe::Hour => "1h".to_string(),
            Timeframe::Day => "1d".to_string(),
            Timeframe::Week => "1w".to_string(),
            Timeframe::Month => "1mo".to_string(),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

// ============================================================
// CLASSIFIED SERIES
// ============================================================

/// Classified series of one timeframe
#[derive(Debug, Clone)]
pub struct TimeframeCodes {
    pub timeframe: Timeframe,
    pub timestamps: Vec<DateTime<Utc>>,
    pub codes: Vec<ScenarioCode>,
}

impl TimeframeCodes {
    pub fn from_bars<T: OHLCV>(timeframe: Timeframe, bars: &[T]) -> Self {
        Self {
            timeframe,
            timestamps: bars.iter().map(|b| b.timestamp()).collect(),
            codes: classify(bars),
        }
    }

    pub fn new(timeframe: Timeframe, timestamps: Vec<DateTime<Utc>>, codes: Vec<ScenarioCode>) -> Self {
        Self {
            timeframe,
            timestamps,
            codes,
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

// ============================================================
// TIERS AND LABELS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityTier {
    None,
    Weak,
    Partial,
    PartialHigh,
    Full,
}

impl ContinuityTier {
    /// Tier for `aligned` agreeing timeframes out of `total`
    pub fn from_counts(aligned: usize, total: usize) -> Self {
        if aligned == 0 || total == 0 {
            return ContinuityTier::None;
        }
        if aligned >= total {
            return ContinuityTier::Full;
        }
        let fraction = aligned as f64 / total as f64;
        if fraction >= 0.75 {
            ContinuityTier::PartialHigh
        } else if fraction >= 0.5 {
            ContinuityTier::Partial
        } else {
            ContinuityTier::Weak
        }
    }

    pub fn confidence(self) -> f64 {
        match self {
            ContinuityTier::Full => 0.95,
            ContinuityTier::PartialHigh => 0.80,
            ContinuityTier::Partial => 0.50,
            ContinuityTier::Weak => 0.25,
            ContinuityTier::None => 0.10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContinuityTier::Full => "full",
            ContinuityTier::PartialHigh => "partial_high",
            ContinuityTier::Partial => "partial",
            ContinuityTier::Weak => "weak",
            ContinuityTier::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityDirection {
    Bullish,
    Bearish,
    BullishMixed,
    BearishMixed,
    Neutral,
}

impl ContinuityDirection {
    pub fn from_votes(bullish: usize, bearish: usize) -> Self {
        match bullish.cmp(&bearish) {
            Ordering::Equal => ContinuityDirection::Neutral,
            Ordering::Greater if bearish == 0 => ContinuityDirection::Bullish,
            Ordering::Greater => ContinuityDirection::BullishMixed,
            Ordering::Less if bullish == 0 => ContinuityDirection::Bearish,
            Ordering::Less => ContinuityDirection::BearishMixed,
        }
    }

    /// Dominant side, `None` when neutral
    pub fn side(self) -> Option<Direction> {
        match self {
            ContinuityDirection::Bullish | ContinuityDirection::BullishMixed => Some(Direction::Bullish),
            ContinuityDirection::Bearish | ContinuityDirection::BearishMixed => Some(Direction::Bearish),
            ContinuityDirection::Neutral => None,
        }
    }

    /// True when the dominant side is the opposite of `direction`
    pub fn opposes(self, direction: Direction) -> bool {
        self.side().is_some_and(|side| side != direction)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContinuityDirection::Bullish => "bullish",
            ContinuityDirection::Bearish => "bearish",
            ContinuityDirection::BullishMixed => "bullish_mixed",
            ContinuityDirection::BearishMixed => "bearish_mixed",
            ContinuityDirection::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for ContinuityDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// RECORD
// ============================================================

/// Continuity at one base bar
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ContinuityRecord {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    /// Code seen in every scored timeframe, base first; `None` is a mapping miss
    pub observed: Vec<(Timeframe, Option<ScenarioCode>)>,
    pub bullish: usize,
    pub bearish: usize,
    /// bullish - bearish
    pub alignment: i32,
    /// Votes on the dominant side, 0 on a tie
    pub aligned: usize,
    pub timeframes: usize,
    pub direction: ContinuityDirection,
    pub tier: ContinuityTier,
    pub confidence: f64,
}

impl ContinuityRecord {
    pub fn from_observed(
        index: usize,
        timestamp: DateTime<Utc>,
        observed: Vec<(Timeframe, Option<ScenarioCode>)>,
    ) -> Self {
        let (bullish, bearish) = observed.iter().fold((0, 0), |(b, s), (_, code)| match code {
            Some(ScenarioCode::Up) => (b + 1, s),
            Some(ScenarioCode::Down) => (b, s + 1),
            _ => (b, s),
        });
        let aligned = if bullish == bearish { 0 } else { bullish.max(bearish) };
        let tier = ContinuityTier::from_counts(aligned, observed.len());

        Self {
            index,
            timestamp,
            bullish,
            bearish,
            alignment: bullish as i32 - bearish as i32,
            aligned,
            timeframes: observed.len(),
            direction: ContinuityDirection::from_votes(bullish, bearish),
            tier,
            confidence: tier.confidence(),
            observed,
        }
    }

    pub fn is_full(&self) -> bool {
        self.tier == ContinuityTier::Full
    }
}

// ============================================================
// SCORER
// ============================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuityScorer;

/// Per-timeframe lookup built once per scoring run
enum Lookup<'a> {
    Own,
    Coarser {
        frame: &'a TimeframeCodes,
        buckets: Vec<i64>,
    },
    Finer {
        majority: HashMap<i64, ScenarioCode>,
    },
}

impl ContinuityScorer {
    /// One record per base bar. `others` may contain coarser, finer or equal
    /// timeframes in any order; each counts as one vote.
    pub fn score(&self, base: &TimeframeCodes, others: &[TimeframeCodes]) -> Vec<ContinuityRecord> {
        let lookups: Vec<(Timeframe, Lookup<'_>)> = others
            .iter()
            .map(|frame| (frame.timeframe, Self::lookup(base.timeframe, frame)))
            .collect();

        let mut misses = 0usize;
        let records: Vec<_> = base
            .timestamps
            .iter()
            .zip(&base.codes)
            .enumerate()
            .map(|(i, (&ts, &code))| {
                let mut observed = Vec::with_capacity(lookups.len() + 1);
                observed.push((base.timeframe, Some(code)));
                for (tf, lookup) in &lookups {
                    let seen = Self::observe(lookup, base.timeframe, ts, code);
                    if seen.is_none() {
                        misses += 1;
                    }
                    observed.push((*tf, seen));
                }
                ContinuityRecord::from_observed(i, ts, observed)
            })
            .collect();

        if misses > 0 {
            tracing::debug!(misses, base = %base.timeframe, "continuity mapping misses treated as neutral");
        }
        records
    }

    fn lookup(base: Timeframe, frame: &TimeframeCodes) -> Lookup<'_> {
        match frame.timeframe.cmp_duration(base) {
            Ordering::Greater => Lookup::Coarser {
                frame,
                buckets: frame.timestamps.iter().map(|&t| frame.timeframe.bucket(t)).collect(),
            },
            Ordering::Less => {
                let mut votes: HashMap<i64, (usize, usize)> = HashMap::new();
                for (&t, code) in frame.timestamps.iter().zip(&frame.codes) {
                    let entry = votes.entry(base.bucket(t)).or_default();
                    match code {
                        ScenarioCode::Up => entry.0 += 1,
                        ScenarioCode::Down => entry.1 += 1,
                        _ => {},
                    }
                }
                let majority = votes
                    .into_iter()
                    .filter_map(|(key, (up, down))| match up.cmp(&down) {
                        Ordering::Greater => Some((key, ScenarioCode::Up)),
                        Ordering::Less => Some((key, ScenarioCode::Down)),
                        Ordering::Equal => None,
                    })
                    .collect();
                Lookup::Finer { majority }
            },
            Ordering::Equal => Lookup::Own,
        }
    }

    fn observe(lookup: &Lookup<'_>, base: Timeframe, ts: DateTime<Utc>, own: ScenarioCode) -> Option<ScenarioCode> {
        match lookup {
            Lookup::Own => Some(own),
            Lookup::Coarser { frame, buckets } => {
                let key = frame.timeframe.bucket(ts);
                buckets.binary_search(&key).ok().map(|i| frame.codes[i])
            },
            Lookup::Finer { majority } => majority.get(&base.bucket(ts)).copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use crate::scenario::ScenarioCode::{Down, Inside, Outside, Up};

    fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn tier_confidence(aligned: usize) -> f64 {
        ContinuityTier::from_counts(aligned, 4).confidence()
    }

    #[test]
    fn tier_table_for_four_timeframes() {
        assert_eq!(tier_confidence(4), 0.95);
        assert_eq!(tier_confidence(3), 0.80);
        assert_eq!(tier_confidence(2), 0.50);
        assert_eq!(tier_confidence(1), 0.25);
        assert_eq!(tier_confidence(0), 0.10);
        assert!(ContinuityTier::Partial < ContinuityTier::PartialHigh);
    }

    #[test]
    fn direction_labels() {
        assert_eq!(ContinuityDirection::from_votes(3, 0), ContinuityDirection::Bullish);
        assert_eq!(ContinuityDirection::from_votes(2, 1), ContinuityDirection::BullishMixed);
        assert_eq!(ContinuityDirection::from_votes(0, 2), ContinuityDirection::Bearish);
        assert_eq!(ContinuityDirection::from_votes(1, 3), ContinuityDirection::BearishMixed);
        assert_eq!(ContinuityDirection::from_votes(2, 2), ContinuityDirection::Neutral);
        assert_eq!(ContinuityDirection::from_votes(0, 0), ContinuityDirection::Neutral);
        assert!(ContinuityDirection::BearishMixed.opposes(Direction::Bullish));
        assert!(!ContinuityDirection::Neutral.opposes(Direction::Bearish));
    }

    #[test]
    fn tie_scores_none() {
        let record = ContinuityRecord::from_observed(
            0,
            ts(2024, 1, 2, 0),
            vec![
                (Timeframe::Month, Some(Up)),
                (Timeframe::Week, Some(Down)),
                (Timeframe::Day, Some(Inside)),
                (Timeframe::Hour, None),
            ],
        );
        assert_eq!(record.aligned, 0);
        assert_eq!(record.alignment, 0);
        assert_eq!(record.tier, ContinuityTier::None);
        assert_eq!(record.confidence, 0.10);
    }

    #[test]
    fn buckets_are_calendar_aligned() {
        // 2024-01-01 is a Monday, ISO week 1
        assert_eq!(Timeframe::Week.bucket(ts(2024, 1, 1, 0)), Timeframe::Week.bucket(ts(2024, 1, 7, 23)));
        assert_ne!(Timeframe::Week.bucket(ts(2024, 1, 7, 23)), Timeframe::Week.bucket(ts(2024, 1, 8, 0)));
        assert_eq!(Timeframe::Month.bucket(ts(2024, 2, 1, 0)), Timeframe::Month.bucket(ts(2024, 2, 29, 12)));
        assert_eq!(Timeframe::Day.bucket(ts(2024, 3, 5, 0)), Timeframe::Day.bucket(ts(2024, 3, 5, 23)));
        assert_eq!(
            Timeframe::Minutes(15).bucket(ts(2024, 3, 5, 10)),
            Timeframe::Minutes(15).bucket(ts(2024, 3, 5, 10) + Duration::minutes(14))
        );
        assert!(Timeframe::Month.is_coarser_than(Timeframe::Week));
        assert!(!Timeframe::Hour.is_coarser_than(Timeframe::Day));
    }

    #[test]
    fn coarser_frames_map_by_containing_period() {
        let base = TimeframeCodes::new(
            Timeframe::Day,
            vec![ts(2024, 1, 30, 0), ts(2024, 1, 31, 0), ts(2024, 2, 1, 0)],
            vec![Up, Up, Up],
        );
        let month = TimeframeCodes::new(
            Timeframe::Month,
            vec![ts(2024, 1, 1, 0), ts(2024, 2, 1, 0)],
            vec![Up, Down],
        );

        let records = ContinuityScorer.score(&base, &[month]);
        assert_eq!(records[1].tier, ContinuityTier::Full);
        assert_eq!(records[2].observed[1], (Timeframe::Month, Some(Down)));
        assert_eq!(records[2].direction, ContinuityDirection::Neutral);
    }

    #[test]
    fn missing_coarser_bar_is_neutral() {
        let base = TimeframeCodes::new(Timeframe::Day, vec![ts(2024, 3, 5, 0)], vec![Down]);
        let week = TimeframeCodes::new(Timeframe::Week, vec![ts(2024, 1, 1, 0)], vec![Up]);

        let records = ContinuityScorer.score(&base, &[week]);
        assert_eq!(records[0].observed[1], (Timeframe::Week, None));
        assert_eq!(records[0].direction, ContinuityDirection::Bearish);
        assert_eq!(records[0].tier, ContinuityTier::Partial);
    }

    #[test]
    fn finer_frame_contributes_majority() {
        let base = TimeframeCodes::new(
            Timeframe::Day,
            vec![ts(2024, 3, 5, 0), ts(2024, 3, 6, 0)],
            vec![Up, Up],
        );
        let hours = TimeframeCodes::new(
            Timeframe::Hour,
            vec![
                ts(2024, 3, 5, 10),
                ts(2024, 3, 5, 11),
                ts(2024, 3, 5, 12),
                ts(2024, 3, 6, 10),
                ts(2024, 3, 6, 11),
            ],
            vec![Up, Inside, Up, Up, Down],
        );

        let records = ContinuityScorer.score(&base, &[hours]);
        assert_eq!(records[0].observed[1], (Timeframe::Hour, Some(Up)));
        assert_eq!(records[0].tier, ContinuityTier::Full);
        // tied hours are neutral
        assert_eq!(records[1].observed[1], (Timeframe::Hour, None));
        assert_eq!(records[1].tier, ContinuityTier::Partial);
    }

    #[test]
    fn outside_bars_never_vote() {
        let record = ContinuityRecord::from_observed(
            0,
            ts(2024, 1, 2, 0),
            vec![
                (Timeframe::Month, Some(Outside)),
                (Timeframe::Week, Some(Up)),
                (Timeframe::Day, Some(Up)),
                (Timeframe::Hour, Some(Up)),
            ],
        );
        assert_eq!(record.aligned, 3);
        assert_eq!(record.tier, ContinuityTier::PartialHigh);
        assert_eq!(record.confidence, 0.80);
        assert!(record.aligned <= record.timeframes);
    }
}
