//! STRAT bar classification
//!
//! Every bar after the first is compared with the *governing range*: the
//! high/low of the most recent bar that broke out of the range before it.
//! Inside bars leave the range untouched, so a run of inside bars is always
//! measured against the same reference.
//!
//! | Code | Condition |
//! |------|-----------|
//! | 1    | high <= governing high and low >= governing low |
//! | 3    | high > governing high and low < governing low |
//! | 2U   | high > governing high only |
//! | 2D   | low < governing low only |

use crate::{Direction, OHLCV};

/// Scenario code of a single bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ScenarioCode {
    /// First bar of a series; reference only
    Unclassified,
    Inside,
    Up,
    Down,
    Outside,
}

impl ScenarioCode {
    /// Signed integer form: 1, 2, -2, 3 (0 for unclassified)
    #[inline]
    pub fn value(self) -> i8 {
        match self {
            ScenarioCode::Unclassified => 0,
            ScenarioCode::Inside => 1,
            ScenarioCode::Up => 2,
            ScenarioCode::Down => -2,
            ScenarioCode::Outside => 3,
        }
    }

    #[inline]
    pub fn is_directional(self) -> bool {
        matches!(self, ScenarioCode::Up | ScenarioCode::Down)
    }

    /// Direction of a 2U/2D bar; `None` for everything else
    #[inline]
    pub fn direction(self) -> Option<Direction> {
        match self {
            ScenarioCode::Up => Some(Direction::Bullish),
            ScenarioCode::Down => Some(Direction::Bearish),
            _ => None,
        }
    }

    /// Directional code for a direction
    #[inline]
    pub fn directional(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => ScenarioCode::Up,
            Direction::Bearish => ScenarioCode::Down,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScenarioCode::Unclassified => "-",
            ScenarioCode::Inside => "1",
            ScenarioCode::Up => "2U",
            ScenarioCode::Down => "2D",
            ScenarioCode::Outside => "3",
        }
    }
}

impl std::fmt::Display for ScenarioCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Join codes as `2U-1-2D`
pub fn sequence_label(codes: &[ScenarioCode]) -> String {
    codes.iter().map(|c| c.label()).collect::<Vec<_>>().join("-")
}

/// High/low that the next bar is classified against
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct GoverningRange {
    pub high: f64,
    pub low: f64,
}

impl GoverningRange {
    pub fn from_bar<T: OHLCV>(bar: &T) -> Self {
        Self {
            high: bar.high(),
            low: bar.low(),
        }
    }

    /// Classify `bar` and return the range the following bar is measured against
    #[inline]
    pub fn step<T: OHLCV>(self, bar: &T) -> (Self, ScenarioCode) {
        let (high, low) = (bar.high(), bar.low());
        let breaks_high = high > self.high;
        let breaks_low = low < self.low;

        let code = match (breaks_high, breaks_low) {
            (false, false) => return (self, ScenarioCode::Inside),
            (true, true) => ScenarioCode::Outside,
            (true, false) => ScenarioCode::Up,
            (false, true) => ScenarioCode::Down,
        };
        (Self { high, low }, code)
    }

    #[inline]
    pub fn contains<T: OHLCV>(&self, bar: &T) -> bool {
        bar.high() <= self.high && bar.low() >= self.low
    }
}

/// Classify a bar series. The result has the same length as `bars`; the first
/// element is always [`ScenarioCode::Unclassified`].
pub fn classify<T: OHLCV>(bars: &[T]) -> Vec<ScenarioCode> {
    let codes: Vec<_> = classify_with_ranges(bars).into_iter().map(|(code, _)| code).collect();
    let (inside, up, down, outside) = code_counts(&codes);
    tracing::debug!(bars = codes.len(), inside, up, down, outside, "bars classified");
    codes
}

/// Classify and return, for every bar, the governing range it was measured against.
///
/// The range reported for bar 0 is the bar's own range.
pub fn classify_with_ranges<T: OHLCV>(bars: &[T]) -> Vec<(ScenarioCode, GoverningRange)> {
    let Some(first) = bars.first() else {
        return Vec::new();
    };

    let start = GoverningRange::from_bar(first);
    let mut out = Vec::with_capacity(bars.len());
    out.push((ScenarioCode::Unclassified, start));

    bars[1..].iter().fold(start, |range, bar| {
        let (next, code) = range.step(bar);
        out.push((code, range));
        next
    });

    out
}

/// Classify `bar` against a single reference bar instead of the governing range
#[inline]
pub fn relative_code<T: OHLCV, R: OHLCV>(bar: &T, reference: &R) -> ScenarioCode {
    GoverningRange::from_bar(reference).step(bar).1
}

/// Occurrence counts per code: (inside, up, down, outside)
pub fn code_counts(codes: &[ScenarioCode]) -> (usize, usize, usize, usize) {
    codes.iter().fold((0, 0, 0, 0), |(i, u, d, o), c| match c {
        ScenarioCode::Inside => (i + 1, u, d, o),
        ScenarioCode::Up => (i, u + 1, d, o),
        ScenarioCode::Down => (i, u, d + 1, o),
        ScenarioCode::Outside => (i, u, d, o + 1),
        ScenarioCode::Unclassified => (i, u, d, o),
    })
}
