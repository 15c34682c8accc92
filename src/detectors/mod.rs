//! STRAT scenario pattern detectors
//!
//! Every detector looks at a fixed window of scenario codes ending at the
//! trigger bar and, on a match, derives trigger/stop/target levels from the
//! bars of that window.
//!
//! # Pattern Categories
//!
//! - **Two-bar**: 3-2, 2-2 reversal, 2-2 continuation
//! - **Three-bar**: 2-1-2, 2-1-2 reversal, 3-1-2, 3-2-2
//! - **Four-bar**: rev-strat

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::{scenario::ScenarioCode, Direction, StratError};

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
    ($($detector:ty),* $(,)?) => {
        $(impl $detector {
            pub fn with_defaults() -> Self { Self::default() }
        })*
    };
}

pub mod multi_bar;
pub mod three_bar;
pub mod two_bar;

pub use helpers::*;
pub use multi_bar::*;
pub use three_bar::*;
pub use two_bar::*;

// ============================================================
// PATTERN KIND
// ============================================================

/// Closed set of scenario patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PatternKind {
    #[serde(rename = "2-1-2")]
    TwoOneTwo,
    #[serde(rename = "2-1-2-reversal")]
    TwoOneTwoReversal,
    #[serde(rename = "3-1-2")]
    ThreeOneTwo,
    #[serde(rename = "3-2-2")]
    ThreeTwoTwo,
    #[serde(rename = "3-2")]
    ThreeTwo,
    #[serde(rename = "2-2-reversal")]
    TwoTwoReversal,
    #[serde(rename = "2-2-continuation")]
    TwoTwoContinuation,
    #[serde(rename = "rev-strat")]
    RevStrat,
}

impl PatternKind {
    pub const ALL: [PatternKind; 8] = [
        PatternKind::TwoOneTwo,
        PatternKind::TwoOneTwoReversal,
        PatternKind::ThreeOneTwo,
        PatternKind::ThreeTwoTwo,
        PatternKind::ThreeTwo,
        PatternKind::TwoTwoReversal,
        PatternKind::TwoTwoContinuation,
        PatternKind::RevStrat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PatternKind::TwoOneTwo => "2-1-2",
            PatternKind::TwoOneTwoReversal => "2-1-2-reversal",
            PatternKind::ThreeOneTwo => "3-1-2",
            PatternKind::ThreeTwoTwo => "3-2-2",
            PatternKind::ThreeTwo => "3-2",
            PatternKind::TwoTwoReversal => "2-2-reversal",
            PatternKind::TwoTwoContinuation => "2-2-continuation",
            PatternKind::RevStrat => "rev-strat",
        }
    }

    /// Number of bars in the window, trigger bar included
    pub fn window(self) -> usize {
        match self {
            PatternKind::ThreeTwo | PatternKind::TwoTwoReversal | PatternKind::TwoTwoContinuation => 2,
            PatternKind::RevStrat => 4,
            _ => 3,
        }
    }

    /// Default confidence before adjustments
    pub fn base_weight(self) -> f64 {
        match self {
            PatternKind::TwoOneTwo => 0.85,
            PatternKind::TwoOneTwoReversal => 0.80,
            PatternKind::ThreeOneTwo => 0.90,
            PatternKind::ThreeTwoTwo => 0.88,
            PatternKind::ThreeTwo => 0.85,
            PatternKind::TwoTwoReversal => 0.75,
            PatternKind::TwoTwoContinuation => 0.80,
            PatternKind::RevStrat => 0.85,
        }
    }

    /// Window position of the inside bar, if the pattern has one
    pub fn inside_position(self) -> Option<usize> {
        match self {
            PatternKind::TwoOneTwo
            | PatternKind::TwoOneTwoReversal
            | PatternKind::ThreeOneTwo
            | PatternKind::RevStrat => Some(1),
            _ => None,
        }
    }

    /// Match a complete window of codes and resolve the trade direction.
    ///
    /// For rev-strat the last two codes must be classified against the
    /// inside bar (see [`relative_code`](crate::scenario::relative_code)).
    pub fn match_codes(self, codes: &[ScenarioCode]) -> Option<Direction> {
        use crate::scenario::ScenarioCode::{Inside, Outside};

        if codes.len() != self.window() {
            return None;
        }

        match (self, codes) {
            (PatternKind::TwoOneTwo, &[a, Inside, c]) => {
                let (a, c) = (a.direction()?, c.direction()?);
                (a == c).then_some(c)
            },
            (PatternKind::TwoOneTwoReversal, &[a, Inside, c]) => {
                let (a, c) = (a.direction()?, c.direction()?);
                (a != c).then_some(c)
            },
            (PatternKind::ThreeOneTwo, &[Outside, Inside, c]) => c.direction(),
            (PatternKind::ThreeTwoTwo, &[Outside, b, c]) => {
                let (b, c) = (b.direction()?, c.direction()?);
                (b == c).then_some(c)
            },
            (PatternKind::ThreeTwo, &[Outside, b]) => b.direction(),
            (PatternKind::TwoTwoReversal, &[a, b]) => {
                let (a, b) = (a.direction()?, b.direction()?);
                (a != b).then_some(b)
            },
            (PatternKind::TwoTwoContinuation, &[a, b]) => {
                let (a, b) = (a.direction()?, b.direction()?);
                (a == b).then_some(b)
            },
            (PatternKind::RevStrat, &[first, Inside, c, d]) => {
                if !matches!(first, ScenarioCode::Up | ScenarioCode::Down | Outside) {
                    return None;
                }
                let (c, d) = (c.direction()?, d.direction()?);
                (c != d).then_some(d)
            },
            _ => None,
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PatternKind {
    type Err = StratError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatternKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| StratError::InvalidConfig(format!("unknown pattern '{s}'")))
    }
}

// ============================================================
// DETECTION RESULTS
// ============================================================

/// A matched pattern with its derived levels. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PatternCandidate {
    pub kind: PatternKind,
    pub direction: Direction,
    /// Codes of the window, oldest first
    pub codes: Vec<ScenarioCode>,
    pub start_index: usize,
    pub trigger_index: usize,
    /// Timestamp of the trigger bar
    pub timestamp: DateTime<Utc>,
    pub trigger: f64,
    pub stop: f64,
    pub target: f64,
    pub risk_reward: f64,
    /// 0.10..=0.95
    pub confidence: f64,
    pub notes: String,
}

impl PatternCandidate {
    /// Bar immediately before the trigger bar
    #[inline]
    pub fn setup_index(&self) -> usize {
        self.trigger_index - 1
    }

    pub fn bar_sequence(&self) -> String {
        crate::scenario::sequence_label(&self.codes)
    }
}

/// Why a matched window or candidate did not become a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Trigger and stop coincide or sit on the wrong side
    DegenerateRisk,
    /// Target does not lie beyond the trigger
    InvalidTarget,
    /// Rev-strat reversal bar closed against the reversal
    ContinuityNotRestored,
    Duplicate,
    BelowRiskReward,
    ContinuityTier,
    ContinuityDirection,
    Filtered,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::DegenerateRisk => "zero or negative risk distance",
            RejectReason::InvalidTarget => "target not beyond trigger",
            RejectReason::ContinuityNotRestored => "reversal bar closed against direction",
            RejectReason::Duplicate => "duplicate of a recent candidate",
            RejectReason::BelowRiskReward => "risk/reward below minimum",
            RejectReason::ContinuityTier => "continuity tier below minimum",
            RejectReason::ContinuityDirection => "continuity opposes direction",
            RejectReason::Filtered => "pattern filtered out",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Rejection {
    pub kind: PatternKind,
    pub direction: Direction,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub reason: RejectReason,
    pub note: String,
}

impl Rejection {
    pub fn of(candidate: &PatternCandidate, reason: RejectReason) -> Self {
        Self {
            kind: candidate.kind,
            direction: candidate.direction,
            index: candidate.trigger_index,
            timestamp: candidate.timestamp,
            reason,
            note: candidate.notes.clone(),
        }
    }
}

/// Outcome of a shape match
pub type Detection = std::result::Result<PatternCandidate, Rejection>;
