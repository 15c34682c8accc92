//! Two-bar scenario detectors: 3-2, 2-2 reversal, 2-2 continuation
//!
//! The first bar of the window is the setup bar; the second is the trigger bar.

use std::collections::HashMap;

use crate::{
    params::{get_ratio, get_scalar, ParamMeta, ParameterizedDetector},
    scenario::{relative_code, ScenarioCode},
    PatternDetector, Ratio, Result, OHLCV,
};

use super::{
    helpers::{self, DEFAULT_TOLERANCE},
    Detection, PatternKind,
};

// ============================================================
// 3-2
// ============================================================

/// Outside bar followed by a directional break of its range
#[derive(Debug, Clone)]
pub struct ThreeTwoDetector {
    pub tolerance: f64,
    pub base_weight: Ratio,
}

impl Default for ThreeTwoDetector {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            base_weight: Ratio::new_const(PatternKind::ThreeTwo.base_weight()),
        }
    }
}

impl PatternDetector for ThreeTwoDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::ThreeTwo
    }

    fn detect<T: OHLCV>(&self, bars: &[T], codes: &[ScenarioCode], index: usize) -> Option<Detection> {
        let m = helpers::measured_move(
            self.kind(),
            bars,
            codes,
            index,
            self.tolerance,
            self.base_weight.get(),
            1.0,
        )?;
        Some(helpers::finish(bars, m))
    }

    fn validate_config(&self) -> Result<()> {
        helpers::validate_tolerance(self.tolerance)?;
        helpers::validate_weight(self.base_weight)
    }
}

// ============================================================
// 2-2 REVERSAL
// ============================================================

/// Directional bar followed by a directional bar of the opposite sign
#[derive(Debug, Clone)]
pub struct TwoTwoReversalDetector {
    pub tolerance: f64,
    pub base_weight: Ratio,
}

impl Default for TwoTwoReversalDetector {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            base_weight: Ratio::new_const(PatternKind::TwoTwoReversal.base_weight()),
        }
    }
}

impl PatternDetector for TwoTwoReversalDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::TwoTwoReversal
    }

    fn detect<T: OHLCV>(&self, bars: &[T], codes: &[ScenarioCode], index: usize) -> Option<Detection> {
        let m = helpers::measured_move(
            self.kind(),
            bars,
            codes,
            index,
            self.tolerance,
            self.base_weight.get(),
            1.0,
        )?;
        Some(helpers::finish(bars, m))
    }

    fn validate_config(&self) -> Result<()> {
        helpers::validate_tolerance(self.tolerance)?;
        helpers::validate_weight(self.base_weight)
    }
}

// ============================================================
// 2-2 CONTINUATION
// ============================================================

/// Two same-sign directional bars.
///
/// The setup bar must also break out of the bar before it in the same
/// direction, so a directional bar that follows a run of inside bars does
/// not count as the first leg on its own.
#[derive(Debug, Clone)]
pub struct TwoTwoContinuationDetector {
    pub tolerance: f64,
    pub base_weight: Ratio,
}

impl Default for TwoTwoContinuationDetector {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            base_weight: Ratio::new_const(PatternKind::TwoTwoContinuation.base_weight()),
        }
    }
}

impl PatternDetector for TwoTwoContinuationDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::TwoTwoContinuation
    }

    fn detect<T: OHLCV>(&self, bars: &[T], codes: &[ScenarioCode], index: usize) -> Option<Detection> {
        if index < 2 {
            return None;
        }
        let m = helpers::measured_move(
            self.kind(),
            bars,
            codes,
            index,
            self.tolerance,
            self.base_weight.get(),
            1.0,
        )?;

        let leg = ScenarioCode::directional(m.direction);
        if relative_code(&bars[index - 1], &bars[index - 2]) != leg {
            return None;
        }

        Some(helpers::finish(bars, m))
    }

    fn validate_config(&self) -> Result<()> {
        helpers::validate_tolerance(self.tolerance)?;
        helpers::validate_weight(self.base_weight)
    }
}

impl_with_defaults!(ThreeTwoDetector, TwoTwoReversalDetector, TwoTwoContinuationDetector);

// ============================================================
// PARAMETER METADATA
// ============================================================

static THREE_TWO_PARAMS: &[ParamMeta] = &[
    ParamMeta::scalar("tolerance", DEFAULT_TOLERANCE, (0.0, 0.05, 0.01), "Trigger offset beyond setup bar"),
    ParamMeta::ratio("base_weight", 0.85, (0.5, 0.95, 0.05), "Confidence before adjustments"),
];

static TWO_TWO_REVERSAL_PARAMS: &[ParamMeta] = &[
    ParamMeta::scalar("tolerance", DEFAULT_TOLERANCE, (0.0, 0.05, 0.01), "Trigger offset beyond setup bar"),
    ParamMeta::ratio("base_weight", 0.75, (0.5, 0.95, 0.05), "Confidence before adjustments"),
];

static TWO_TWO_CONTINUATION_PARAMS: &[ParamMeta] = &[
    ParamMeta::scalar("tolerance", DEFAULT_TOLERANCE, (0.0, 0.05, 0.01), "Trigger offset beyond setup bar"),
    ParamMeta::ratio("base_weight", 0.80, (0.5, 0.95, 0.05), "Confidence before adjustments"),
];

impl ParameterizedDetector for ThreeTwoDetector {
    fn param_meta() -> &'static [ParamMeta] {
        THREE_TWO_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            tolerance: get_scalar(params, "tolerance", DEFAULT_TOLERANCE)?,
            base_weight: get_ratio(params, "base_weight", PatternKind::ThreeTwo.base_weight())?,
        })
    }

    fn pattern_kind() -> PatternKind {
        PatternKind::ThreeTwo
    }
}

impl ParameterizedDetector for TwoTwoReversalDetector {
    fn param_meta() -> &'static [ParamMeta] {
        TWO_TWO_REVERSAL_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            tolerance: get_scalar(params, "tolerance", DEFAULT_TOLERANCE)?,
            base_weight: get_ratio(params, "base_weight", PatternKind::TwoTwoReversal.base_weight())?,
        })
    }

    fn pattern_kind() -> PatternKind {
        PatternKind::TwoTwoReversal
    }
}

impl ParameterizedDetector for TwoTwoContinuationDetector {
    fn param_meta() -> &'static [ParamMeta] {
        TWO_TWO_CONTINUATION_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            tolerance: get_scalar(params, "tolerance", DEFAULT_TOLERANCE)?,
            base_weight: get_ratio(params, "base_weight", PatternKind::TwoTwoContinuation.base_weight())?,
        })
    }

    fn pattern_kind() -> PatternKind {
        PatternKind::TwoTwoContinuation
    }
}
