//! Level and confidence computations shared by all scenario detectors

use super::{Detection, PatternCandidate, PatternKind, RejectReason, Rejection};
use crate::{
    scenario::{sequence_label, ScenarioCode},
    Direction, OHLCVExt, Ratio, Result, StratError, OHLCV,
};

// ============================================================
// THRESHOLDS
// ============================================================

/// Default price offset beyond the setup bar's extreme
pub const DEFAULT_TOLERANCE: f64 = 0.01;

pub const CONFIDENCE_FLOOR: f64 = 0.10;
pub const CONFIDENCE_CEILING: f64 = 0.95;

/// Inside bar range / anchor range at or below this is "tight"
pub const TIGHT_INSIDE_RATIO: f64 = 0.5;
pub const TIGHT_INSIDE_BONUS: f64 = 0.05;

/// Trigger bar excursion beyond the anchor extreme, as a share of anchor range
pub const STRONG_BREAKOUT_RATIO: f64 = 0.10;
pub const STRONG_BREAKOUT_BONUS: f64 = 0.05;

/// Trigger bar volume over setup bar volume
pub const VOLUME_EXPANSION_FACTOR: f64 = 1.2;
pub const VOLUME_EXPANSION_BONUS: f64 = 0.03;

// ============================================================
// LEVELS
// ============================================================

/// Setup extreme in the break direction, offset by `tolerance`
#[inline]
pub fn trigger_level<T: OHLCV>(setup: &T, direction: Direction, tolerance: f64) -> f64 {
    match direction {
        Direction::Bullish => setup.high() + tolerance,
        Direction::Bearish => setup.low() - tolerance,
    }
}

/// Setup extreme opposite the break
#[inline]
pub fn stop_level<T: OHLCV>(setup: &T, direction: Direction) -> f64 {
    match direction {
        Direction::Bullish => setup.low(),
        Direction::Bearish => setup.high(),
    }
}

/// Project `range * multiplier` from the trigger in the trade direction
#[inline]
pub fn measured_target(trigger: f64, range: f64, direction: Direction, multiplier: f64) -> f64 {
    trigger + direction.sign() * range * multiplier
}

/// Reward over risk, or the reason the levels are unusable.
///
/// Risk must be strictly positive with the stop behind the trigger, and the
/// target must lie strictly beyond the trigger.
pub fn risk_reward(
    trigger: f64,
    stop: f64,
    target: f64,
    direction: Direction,
) -> std::result::Result<f64, RejectReason> {
    let sign = direction.sign();
    let risk = (trigger - stop) * sign;
    if !risk.is_finite() || risk <= 0.0 {
        return Err(RejectReason::DegenerateRisk);
    }
    let reward = (target - trigger) * sign;
    if !reward.is_finite() || reward <= 0.0 {
        return Err(RejectReason::InvalidTarget);
    }
    Ok(reward / risk)
}

#[inline]
pub fn clamp_confidence(value: f64) -> f64 {
    value.clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEILING)
}

/// First index of a window of `width` bars ending at `index`
#[inline]
pub fn window_start(index: usize, width: usize) -> Option<usize> {
    (index + 1).checked_sub(width)
}

// ============================================================
// CANDIDATE ASSEMBLY
// ============================================================

/// Everything a detector resolved for one window
#[derive(Debug, Clone)]
pub struct WindowMatch {
    pub kind: PatternKind,
    pub direction: Direction,
    pub codes: Vec<ScenarioCode>,
    pub start: usize,
    pub index: usize,
    pub trigger: f64,
    pub stop: f64,
    pub target: f64,
    pub base_weight: f64,
}

/// Base weight plus containment, breakout and volume adjustments, with the
/// names of the adjustments that applied.
pub fn score<T: OHLCV>(bars: &[T], m: &WindowMatch) -> (f64, Vec<&'static str>) {
    let mut confidence = m.base_weight;
    let mut applied = Vec::new();

    let anchor = &bars[m.start];
    let setup = &bars[m.index - 1];
    let trigger_bar = &bars[m.index];
    let anchor_range = anchor.range();

    if anchor_range > 0.0 {
        let inside = m.kind.inside_position().map(|p| &bars[m.start + p]);
        if let Some(inside) = inside {
            if inside.range() / anchor_range <= TIGHT_INSIDE_RATIO {
                confidence += TIGHT_INSIDE_BONUS;
                applied.push("tight inside");
            }
        }

        let excursion = match m.direction {
            Direction::Bullish => trigger_bar.high() - anchor.high(),
            Direction::Bearish => anchor.low() - trigger_bar.low(),
        };
        if excursion / anchor_range > STRONG_BREAKOUT_RATIO {
            confidence += STRONG_BREAKOUT_BONUS;
            applied.push("strong breakout");
        }
    }

    if trigger_bar.volume() > setup.volume() * VOLUME_EXPANSION_FACTOR {
        confidence += VOLUME_EXPANSION_BONUS;
        applied.push("volume expansion");
    }

    (clamp_confidence(confidence), applied)
}

/// Turn a resolved window into a candidate, or a rejection if its levels are degenerate
pub fn finish<T: OHLCV>(bars: &[T], m: WindowMatch) -> Detection {
    let mut notes = format!(
        "{} {}: {}",
        m.kind,
        m.direction,
        sequence_label(&m.codes)
    );

    let risk_reward = match risk_reward(m.trigger, m.stop, m.target, m.direction) {
        Ok(rr) => rr,
        Err(reason) => {
            notes.push_str(&format!(
                " | rejected: {} (trigger {:.2}, stop {:.2}, target {:.2})",
                reason, m.trigger, m.stop, m.target
            ));
            return Err(Rejection {
                kind: m.kind,
                direction: m.direction,
                index: m.index,
                timestamp: bars[m.index].timestamp(),
                reason,
                note: notes,
            });
        },
    };

    let (confidence, applied) = score(bars, &m);
    if !applied.is_empty() {
        notes.push_str(" | ");
        notes.push_str(&applied.join(", "));
    }

    Ok(PatternCandidate {
        kind: m.kind,
        direction: m.direction,
        codes: m.codes,
        start_index: m.start,
        trigger_index: m.index,
        timestamp: bars[m.index].timestamp(),
        trigger: m.trigger,
        stop: m.stop,
        target: m.target,
        risk_reward,
        confidence,
        notes,
    })
}

/// Shape match plus measured-move levels: trigger and stop from the setup
/// bar, target projected by the anchor bar's range times `target_multiplier`.
pub fn measured_move<T: OHLCV>(
    kind: PatternKind,
    bars: &[T],
    codes: &[ScenarioCode],
    index: usize,
    tolerance: f64,
    base_weight: f64,
    target_multiplier: f64,
) -> Option<WindowMatch> {
    let start = window_start(index, kind.window())?;
    let window = codes.get(start..=index)?;
    if bars.len() <= index {
        return None;
    }
    let direction = kind.match_codes(window)?;

    let setup = &bars[index - 1];
    let trigger = trigger_level(setup, direction, tolerance);
    let stop = stop_level(setup, direction);
    let target = measured_target(trigger, bars[start].range(), direction, target_multiplier);

    Some(WindowMatch {
        kind,
        direction,
        codes: window.to_vec(),
        start,
        index,
        trigger,
        stop,
        target,
        base_weight,
    })
}

// ============================================================
// CONFIG VALIDATION
// ============================================================

pub fn validate_tolerance(tolerance: f64) -> Result<()> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(StratError::InvalidConfig(format!(
            "tolerance must be finite and >= 0, got {tolerance}"
        )));
    }
    Ok(())
}

pub fn validate_weight(base_weight: Ratio) -> Result<()> {
    let w = base_weight.get();
    if !(CONFIDENCE_FLOOR..=CONFIDENCE_CEILING).contains(&w) {
        return Err(StratError::OutOfRange {
            field: "base_weight",
            value: w,
            min: CONFIDENCE_FLOOR,
            max: CONFIDENCE_CEILING,
        });
    }
    Ok(())
}
