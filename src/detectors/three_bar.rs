//! Three-bar scenario detectors: 2-1-2, 2-1-2 reversal, 3-1-2, 3-2-2
//!
//! Levels come from the middle (setup) bar; targets are measured from the
//! range of the first (anchor) bar.

use std::collections::HashMap;

use crate::{
    params::{get_ratio, get_scalar, ParamMeta, ParameterizedDetector},
    scenario::ScenarioCode,
    PatternDetector, Ratio, Result, StratError, OHLCV,
};

use super::{
    helpers::{self, DEFAULT_TOLERANCE},
    Detection, PatternKind,
};

/// 3-2-2 projects further than the other measured moves
pub const THREE_TWO_TWO_TARGET_MULTIPLIER: f64 = 1.5;

// ============================================================
// 2-1-2 CONTINUATION
// ============================================================

/// Directional bar, inside bar, break in the same direction
#[derive(Debug, Clone)]
pub struct TwoOneTwoDetector {
    pub tolerance: f64,
    pub base_weight: Ratio,
}

impl Default for TwoOneTwoDetector {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            base_weight: Ratio::new_const(PatternKind::TwoOneTwo.base_weight()),
        }
    }
}

impl PatternDetector for TwoOneTwoDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::TwoOneTwo
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
// 2-1-2 REVERSAL
// ============================================================

/// Directional bar, inside bar, break in the opposite direction
#[derive(Debug, Clone)]
pub struct TwoOneTwoReversalDetector {
    pub tolerance: f64,
    pub base_weight: Ratio,
}

impl Default for TwoOneTwoReversalDetector {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            base_weight: Ratio::new_const(PatternKind::TwoOneTwoReversal.base_weight()),
        }
    }
}

impl PatternDetector for TwoOneTwoReversalDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::TwoOneTwoReversal
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
// 3-1-2
// ============================================================

/// Outside bar, inside bar, directional break
#[derive(Debug, Clone)]
pub struct ThreeOneTwoDetector {
    pub tolerance: f64,
    pub base_weight: Ratio,
}

impl Default for ThreeOneTwoDetector {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            base_weight: Ratio::new_const(PatternKind::ThreeOneTwo.base_weight()),
        }
    }
}

impl PatternDetector for ThreeOneTwoDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::ThreeOneTwo
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
// 3-2-2
// ============================================================

/// Outside bar followed by two same-sign directional bars
#[derive(Debug, Clone)]
pub struct ThreeTwoTwoDetector {
    pub tolerance: f64,
    pub base_weight: Ratio,
    /// Multiple of the outside bar's range projected from the trigger
    pub target_multiplier: f64,
}

impl Default for ThreeTwoTwoDetector {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            base_weight: Ratio::new_const(PatternKind::ThreeTwoTwo.base_weight()),
            target_multiplier: THREE_TWO_TWO_TARGET_MULTIPLIER,
        }
    }
}

impl PatternDetector for ThreeTwoTwoDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::ThreeTwoTwo
    }

    fn detect<T: OHLCV>(&self, bars: &[T], codes: &[ScenarioCode], index: usize) -> Option<Detection> {
        let m = helpers::measured_move(
            self.kind(),
            bars,
            codes,
            index,
            self.tolerance,
            self.base_weight.get(),
            self.target_multiplier,
        )?;
        Some(helpers::finish(bars, m))
    }

    fn validate_config(&self) -> Result<()> {
        helpers::validate_tolerance(self.tolerance)?;
        helpers::validate_weight(self.base_weight)?;
        if !self.target_multiplier.is_finite() || self.target_multiplier <= 0.0 {
            return Err(StratError::InvalidConfig(format!(
                "target_multiplier must be finite and > 0, got {}",
                self.target_multiplier
            )));
        }
        Ok(())
    }
}

impl_with_defaults!(
    TwoOneTwoDetector,
    TwoOneTwoReversalDetector,
    ThreeOneTwoDetector,
    ThreeTwoTwoDetector,
);

// ============================================================
// PARAMETER METADATA
// ============================================================

static TWO_ONE_TWO_PARAMS: &[ParamMeta] = &[
    ParamMeta::scalar("tolerance", DEFAULT_TOLERANCE, (0.0, 0.05, 0.01), "Trigger offset beyond setup bar"),
    ParamMeta::ratio("base_weight", 0.85, (0.5, 0.95, 0.05), "Confidence before adjustments"),
];

static TWO_ONE_TWO_REVERSAL_PARAMS: &[ParamMeta] = &[
    ParamMeta::scalar("tolerance", DEFAULT_TOLERANCE, (0.0, 0.05, 0.01), "Trigger offset beyond setup bar"),
    ParamMeta::ratio("base_weight", 0.80, (0.5, 0.95, 0.05), "Confidence before adjustments"),
];

static THREE_ONE_TWO_PARAMS: &[ParamMeta] = &[
    ParamMeta::scalar("tolerance", DEFAULT_TOLERANCE, (0.0, 0.05, 0.01), "Trigger offset beyond setup bar"),
    ParamMeta::ratio("base_weight", 0.90, (0.5, 0.95, 0.05), "Confidence before adjustments"),
];

static THREE_TWO_TWO_PARAMS: &[ParamMeta] = &[
    ParamMeta::scalar("tolerance", DEFAULT_TOLERANCE, (0.0, 0.05, 0.01), "Trigger offset beyond setup bar"),
    ParamMeta::ratio("base_weight", 0.88, (0.5, 0.95, 0.05), "Confidence before adjustments"),
    ParamMeta::scalar(
        "target_multiplier",
        THREE_TWO_TWO_TARGET_MULTIPLIER,
        (1.0, 2.0, 0.25),
        "Outside bar range multiple for the target",
    ),
];

impl ParameterizedDetector for TwoOneTwoDetector {
    fn param_meta() -> &'static [ParamMeta] {
        TWO_ONE_TWO_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            tolerance: get_scalar(params, "tolerance", DEFAULT_TOLERANCE)?,
            base_weight: get_ratio(params, "base_weight", PatternKind::TwoOneTwo.base_weight())?,
        })
    }

    fn pattern_kind() -> PatternKind {
        PatternKind::TwoOneTwo
    }
}

impl ParameterizedDetector for TwoOneTwoReversalDetector {
    fn param_meta() -> &'static [ParamMeta] {
        TWO_ONE_TWO_REVERSAL_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            tolerance: get_scalar(params, "tolerance", DEFAULT_TOLERANCE)?,
            base_weight: get_ratio(params, "base_weight", PatternKind::TwoOneTwoReversal.base_weight())?,
        })
    }

    fn pattern_kind() -> PatternKind {
        PatternKind::TwoOneTwoReversal
    }
}

impl ParameterizedDetector for ThreeOneTwoDetector {
    fn param_meta() -> &'static [ParamMeta] {
        THREE_ONE_TWO_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            tolerance: get_scalar(params, "tolerance", DEFAULT_TOLERANCE)?,
            base_weight: get_ratio(params, "base_weight", PatternKind::ThreeOneTwo.base_weight())?,
        })
    }

    fn pattern_kind() -> PatternKind {
        PatternKind::ThreeOneTwo
    }
}

impl ParameterizedDetector for ThreeTwoTwoDetector {
    fn param_meta() -> &'static [ParamMeta] {
        THREE_TWO_TWO_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            tolerance: get_scalar(params, "tolerance", DEFAULT_TOLERANCE)?,
            base_weight: get_ratio(params, "base_weight", PatternKind::ThreeTwoTwo.base_weight())?,
            target_multiplier: get_scalar(params, "target_multiplier", THREE_TWO_TWO_TARGET_MULTIPLIER)?,
        })
    }

    fn pattern_kind() -> PatternKind {
        PatternKind::ThreeTwoTwo
    }
}
