//! Detector parameter descriptions
//!
//! Each detector publishes a static table of its tunable values (trigger
//! tolerance, base weight, target multiplier). The table drives grid
//! sweeps and lets detectors be built from a plain `name -> value` map
//! read from a config file.
//!
//! # Example
//!
//! ```rust
//! use stratum::params::ParameterizedDetector;
//! use stratum::prelude::*;
//!
//! for param in ThreeTwoTwoDetector::param_meta() {
//!     println!("{} = {} ({:?})", param.name, param.default, param.param_type);
//! }
//! ```

use std::collections::HashMap;

use crate::{detectors::PatternKind, Period, Ratio, Result, StratError};

/// Loosely-typed parameter map, keyed by parameter name
pub type ParamMap<'a> = HashMap<&'a str, f64>;

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Kind of value a parameter holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Fraction in 0.0..=1.0, e.g. a base confidence weight
    Ratio,
    /// Whole number of bars
    Period,
    /// Non-negative price offset or multiplier
    Scalar,
}

/// One entry in a detector's parameter table
#[derive(Debug, Clone)]
pub struct ParamMeta {
    pub name: &'static str,
    pub param_type: ParamType,
    pub default: f64,
    /// Sweep bounds and increment: (lo, hi, step)
    pub range: (f64, f64, f64),
    pub description: &'static str,
}

impl ParamMeta {
    const fn of(
        param_type: ParamType,
        name: &'static str,
        default: f64,
        range: (f64, f64, f64),
        description: &'static str,
    ) -> Self {
        Self { name, param_type, default, range, description }
    }

    pub const fn ratio(name: &'static str, default: f64, range: (f64, f64, f64), description: &'static str) -> Self {
        Self::of(ParamType::Ratio, name, default, range, description)
    }

    pub const fn period(name: &'static str, default: f64, range: (f64, f64, f64), description: &'static str) -> Self {
        Self::of(ParamType::Period, name, default, range, description)
    }

    pub const fn scalar(name: &'static str, default: f64, range: (f64, f64, f64), description: &'static str) -> Self {
        Self::of(ParamType::Scalar, name, default, range, description)
    }

    /// Sweep values from `lo` to `hi` inclusive. A non-positive step yields `[lo]`.
    pub fn generate_grid(&self) -> Vec<f64> {
        let (lo, hi, step) = self.range;
        if step <= 0.0 {
            return vec![lo];
        }
        let slack = step * 1e-9;
        std::iter::successors(Some(lo), |v| Some(v + step))
            .take_while(|v| *v <= hi + slack)
            .collect()
    }

    /// Check a candidate value against the sweep bounds and the parameter kind
    pub fn validate(&self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(StratError::InvalidValue("parameter must be finite"));
        }
        let (min, max, _) = self.range;
        if !(min..=max).contains(&value) {
            return Err(StratError::OutOfRange { field: self.name, value, min, max });
        }
        match self.param_type {
            ParamType::Ratio => Ratio::new(value).map(drop),
            ParamType::Period => whole_bars(value).map(drop),
            ParamType::Scalar => non_negative(value).map(drop),
        }
    }
}

fn whole_bars(value: f64) -> Result<usize> {
    if value >= 1.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(StratError::InvalidValue("period must be a whole number of bars >= 1"))
    }
}

fn non_negative(value: f64) -> Result<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(StratError::InvalidValue("scalar parameter must be finite and >= 0"))
    }
}

// ============================================================
// PARAMETERIZED DETECTOR TRAIT
// ============================================================

/// Detectors constructible from a [`ParamMap`]
pub trait ParameterizedDetector: Sized {
    /// Static table of tunable values
    fn param_meta() -> &'static [ParamMeta];

    /// Build from a map; absent keys fall back to the table defaults.
    fn with_params(params: &ParamMap<'_>) -> Result<Self>;

    fn pattern_kind() -> PatternKind;
}

// ============================================================
// LOOKUPS
// ============================================================

fn lookup(params: &ParamMap<'_>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

pub fn get_ratio(params: &ParamMap<'_>, key: &str, default: f64) -> Result<Ratio> {
    Ratio::new(lookup(params, key, default))
}

pub fn get_period(params: &ParamMap<'_>, key: &str, default: usize) -> Result<Period> {
    whole_bars(lookup(params, key, default as f64)).and_then(Period::new)
}

pub fn get_scalar(params: &ParamMap<'_>, key: &str, default: f64) -> Result<f64> {
    non_negative(lookup(params, key, default))
}

// ============================================================
// TESTS
// ============================================================
