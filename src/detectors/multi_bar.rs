//! Four-bar scenario detectors: rev-strat
//!
//! Rev-strat is a failed breakout of an inside bar followed by a break in
//! the opposite direction. The last two bars are classified against the
//! inside bar itself: against the governing range the failed breakout would
//! read as another inside bar.
//!
//! When the first bar is an outside bar the window is a 3-1-2 whose breakout
//! failed (3-1-2D-2U or 3-1-2U-2D). With `post_312` enabled that variant is
//! scored at [`POST_312_CONFIDENCE`] and does not need the reversal candle to
//! close in the new direction.

use std::collections::HashMap;

use crate::{
    params::{get_ratio, get_scalar, ParamMeta, ParameterizedDetector},
    scenario::{relative_code, ScenarioCode},
    Direction, OHLCVExt, PatternDetector, Ratio, Result, OHLCV,
};

use super::{
    helpers::{self, WindowMatch, DEFAULT_TOLERANCE},
    Detection, PatternKind, RejectReason, Rejection,
};

/// Extra confidence when the first bar is an outside bar
pub const REV_STRAT_OUTSIDE_BONUS: f64 = 0.10;

/// Confidence of a rev-strat that reverses a failed 3-1-2
pub const POST_312_CONFIDENCE: f64 = 0.95;

// ============================================================
// REV-STRAT
// ============================================================

#[derive(Debug, Clone)]
pub struct RevStratDetector {
    pub tolerance: f64,
    pub base_weight: Ratio,
    pub outside_bonus: Ratio,
    /// Treat an outside first bar as a failed 3-1-2 reversal
    pub post_312: bool,
}

impl Default for RevStratDetector {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            base_weight: Ratio::new_const(PatternKind::RevStrat.base_weight()),
            outside_bonus: Ratio::new_const(REV_STRAT_OUTSIDE_BONUS),
            post_312: true,
        }
    }
}

impl PatternDetector for RevStratDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::RevStrat
    }

    fn detect<T: OHLCV>(&self, bars: &[T], codes: &[ScenarioCode], index: usize) -> Option<Detection> {
        let kind = self.kind();
        let start = helpers::window_start(index, kind.window())?;
        if bars.len() <= index || codes.len() <= index {
            return None;
        }

        let first = &bars[start];
        let inside = &bars[start + 1];
        let failed = &bars[start + 2];
        let reversal = &bars[index];

        let window = vec![
            codes[start],
            codes[start + 1],
            relative_code(failed, inside),
            relative_code(reversal, inside),
        ];
        let direction = kind.match_codes(&window)?;

        // The failed leg must stay short of the first bar's extreme
        let failed_breakout = match direction {
            Direction::Bullish => failed.low() > first.low(),
            Direction::Bearish => failed.high() < first.high(),
        };
        if !failed_breakout {
            return None;
        }

        let trigger = helpers::trigger_level(failed, direction, self.tolerance);
        let stop = helpers::stop_level(failed, direction);
        let target = match direction {
            Direction::Bullish => first.high(),
            Direction::Bearish => first.low(),
        };

        let post_312 = self.post_312 && codes[start] == ScenarioCode::Outside;

        let restored = match direction {
            Direction::Bullish => reversal.is_bullish(),
            Direction::Bearish => reversal.is_bearish(),
        };
        if !restored && !post_312 {
            return Some(Err(Rejection {
                kind,
                direction,
                index,
                timestamp: reversal.timestamp(),
                reason: RejectReason::ContinuityNotRestored,
                note: format!(
                    "{} {}: {} | rejected: {}",
                    kind,
                    direction,
                    crate::scenario::sequence_label(&window),
                    RejectReason::ContinuityNotRestored
                ),
            }));
        }

        let weight = if post_312 {
            POST_312_CONFIDENCE
        } else if codes[start] == ScenarioCode::Outside {
            self.base_weight.get() + self.outside_bonus.get()
        } else {
            self.base_weight.get()
        };

        let detection = helpers::finish(
            bars,
            WindowMatch {
                kind,
                direction,
                codes: window,
                start,
                index,
                trigger,
                stop,
                target,
                base_weight: weight,
            },
        );
        if !post_312 {
            return Some(detection);
        }
        Some(detection.map(|mut candidate| {
            candidate.notes.push_str(" | post-3-1-2");
            candidate
        }))
    }

    fn validate_config(&self) -> Result<()> {
        helpers::validate_tolerance(self.tolerance)?;
        helpers::validate_weight(self.base_weight)
    }
}

impl_with_defaults!(RevStratDetector);

// ============================================================
// PARAMETER METADATA
// ============================================================

static REV_STRAT_PARAMS: &[ParamMeta] = &[
    ParamMeta::scalar("tolerance", DEFAULT_TOLERANCE, (0.0, 0.05, 0.01), "Trigger offset beyond setup bar"),
    ParamMeta::ratio("base_weight", 0.85, (0.5, 0.95, 0.05), "Confidence before adjustments"),
    ParamMeta::ratio("outside_bonus", REV_STRAT_OUTSIDE_BONUS, (0.0, 0.15, 0.05), "Bonus when the first bar is an outside bar"),
];

impl ParameterizedDetector for RevStratDetector {
    fn param_meta() -> &'static [ParamMeta] {
        REV_STRAT_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            tolerance: get_scalar(params, "tolerance", DEFAULT_TOLERANCE)?,
            base_weight: get_ratio(params, "base_weight", PatternKind::RevStrat.base_weight())?,
            outside_bonus: get_ratio(params, "outside_bonus", REV_STRAT_OUTSIDE_BONUS)?,
            post_312: true,
        })
    }

    fn pattern_kind() -> PatternKind {
        PatternKind::RevStrat
    }
}
