//! Signal orchestration
//!
//! Runs one instrument through the whole pipeline:
//!
//! 1. validate and classify every timeframe
//! 2. market context, pivots and PMG runs on the base series
//! 3. all detectors over every base bar, then deduplication
//! 4. continuity per base bar; risk/reward, tier and direction filters
//! 5. blended confidence and optional intrabar refinement
//! 6. lifecycle replay of every accepted signal into raw entry/exit flags
//! 7. cleaning pass so the position is never long and short at once

use chrono::{DateTime, Utc};

use crate::{
    continuity::{ContinuityDirection, ContinuityRecord, ContinuityScorer, ContinuityTier, Timeframe, TimeframeCodes},
    dedup::{Deduplicator, DEFAULT_DEDUP_CAPACITY},
    detectors::{helpers, PatternCandidate, PatternKind, RejectReason, Rejection},
    intrabar::{IntrabarRefiner, TriggerEvent},
    lifecycle::{LifecycleId, LifecycleMachine, LifecycleSummary, PatternState, Step},
    pivots::{detect_pmg, magnitude_targets, PivotSet, PivotTracker, PmgRun},
    scenario::{classify, ScenarioCode},
    validate_series, BuiltinDetector, ContextProvider, Direction, Ratio, Result, StratError, OHLCV,
};

/// Weight of continuity confidence in the blended signal confidence
pub const CONTINUITY_WEIGHT: f64 = 0.6;
/// Weight of pattern confidence in the blended signal confidence
pub const PATTERN_WEIGHT: f64 = 0.4;

// ============================================================
// CONFIGURATION
// ============================================================

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Offset beyond the setup bar for triggers; applied to every detector
    pub trigger_tolerance: f64,
    pub dedup_capacity: usize,
    pub min_risk_reward: f64,
    pub min_continuity_tier: ContinuityTier,
    /// Raise the tier floor to Full
    pub require_full_continuity: bool,
    pub pivot_up_threshold: Ratio,
    pub pivot_down_threshold: Ratio,
    pub pmg_min_count: usize,
    pub validate_data: bool,
    /// 2U followed by 2D exits longs, 2D followed by 2U exits shorts
    pub reversal_exits: bool,
    pub pattern_filter: Option<Vec<PatternKind>>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        let pivots = PivotTracker::default();
        Self {
            trigger_tolerance: helpers::DEFAULT_TOLERANCE,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            min_risk_reward: 1.0,
            min_continuity_tier: ContinuityTier::Partial,
            require_full_continuity: false,
            pivot_up_threshold: pivots.up_threshold,
            pivot_down_threshold: pivots.down_threshold,
            pmg_min_count: 5,
            validate_data: true,
            reversal_exits: true,
            pattern_filter: None,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        helpers::validate_tolerance(self.trigger_tolerance)?;
        if self.dedup_capacity == 0 {
            return Err(StratError::InvalidConfig("dedup_capacity must be >= 1".into()));
        }
        if !self.min_risk_reward.is_finite() || self.min_risk_reward < 0.0 {
            return Err(StratError::InvalidConfig(format!(
                "min_risk_reward must be finite and >= 0, got {}",
                self.min_risk_reward
            )));
        }
        if self.pmg_min_count == 0 {
            return Err(StratError::InvalidConfig("pmg_min_count must be >= 1".into()));
        }
        Ok(())
    }

    /// Tier floor after `require_full_continuity`
    pub fn effective_min_tier(&self) -> ContinuityTier {
        if self.require_full_continuity {
            ContinuityTier::Full
        } else {
            self.min_continuity_tier
        }
    }

    fn includes(&self, kind: PatternKind) -> bool {
        self.pattern_filter.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

// ============================================================
// INPUT
// ============================================================

/// One timeframe's bars
pub struct TimeframeBars<'a, T> {
    pub timeframe: Timeframe,
    pub bars: &'a [T],
}

/// Base series plus optional continuity frames and a finer intrabar series
pub struct MultiTimeframeInput<'a, T> {
    pub base: TimeframeBars<'a, T>,
    pub context: Vec<TimeframeBars<'a, T>>,
    pub intrabar: Option<TimeframeBars<'a, T>>,
}

impl<'a, T: OHLCV> MultiTimeframeInput<'a, T> {
    pub fn new(timeframe: Timeframe, bars: &'a [T]) -> Self {
        Self {
            base: TimeframeBars { timeframe, bars },
            context: Vec::new(),
            intrabar: None,
        }
    }

    /// Add a timeframe that votes in continuity scoring
    pub fn with_context(mut self, timeframe: Timeframe, bars: &'a [T]) -> Self {
        self.context.push(TimeframeBars { timeframe, bars });
        self
    }

    /// Finer series used to refine trigger times
    pub fn with_intrabar(mut self, timeframe: Timeframe, bars: &'a [T]) -> Self {
        self.intrabar = Some(TimeframeBars { timeframe, bars });
        self
    }

    fn all_series(&self) -> impl Iterator<Item = &TimeframeBars<'a, T>> {
        std::iter::once(&self.base)
            .chain(self.context.iter())
            .chain(self.intrabar.iter())
    }
}

// ============================================================
// OUTPUT
// ============================================================

/// An accepted signal
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SignalRecord {
    pub timestamp: DateTime<Utc>,
    pub trigger_index: usize,
    pub pattern_name: &'static str,
    pub direction: Direction,
    pub trigger: f64,
    pub stop: f64,
    pub target: f64,
    /// Blended pattern and continuity confidence
    pub confidence: f64,
    pub pattern_confidence: f64,
    pub continuity_score: f64,
    pub continuity_direction: ContinuityDirection,
    pub continuity_tier: ContinuityTier,
    pub bar_sequence: String,
    pub risk_reward: f64,
    pub atr: f64,
    pub refined_trigger: Option<TriggerEvent>,
    pub notes: String,
}

/// Entry/exit flags aligned to the base series
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SignalFrame {
    pub timestamps: Vec<DateTime<Utc>>,
    pub long_entries: Vec<bool>,
    pub long_exits: Vec<bool>,
    pub short_entries: Vec<bool>,
    pub short_exits: Vec<bool>,
}

impl SignalFrame {
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Self {
        let n = timestamps.len();
        Self {
            timestamps,
            long_entries: vec![false; n],
            long_exits: vec![false; n],
            short_entries: vec![false; n],
            short_exits: vec![false; n],
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Position held after each bar: 1 long, -1 short, 0 flat
    pub fn positions(&self) -> Vec<i8> {
        let mut position = 0i8;
        (0..self.len())
            .map(|i| {
                if self.long_entries[i] {
                    position = 1;
                } else if self.short_entries[i] {
                    position = -1;
                } else if self.long_exits[i] || self.short_exits[i] {
                    position = 0;
                }
                position
            })
            .collect()
    }
}

/// Enforce a consistent position: start flat, then per bar honour at most one
/// flag in priority order long entry, short entry, long exit, short exit.
/// Entries are dropped while already in that position and exits while not.
pub fn clean_signals(raw: &SignalFrame) -> SignalFrame {
    let mut out = SignalFrame::new(raw.timestamps.clone());
    let mut position = 0i8;

    for i in 0..raw.len() {
        if raw.long_entries[i] && position != 1 {
            out.long_entries[i] = true;
            position = 1;
        } else if raw.short_entries[i] && position != -1 {
            out.short_entries[i] = true;
            position = -1;
        } else if raw.long_exits[i] && position == 1 {
            out.long_exits[i] = true;
            position = 0;
        } else if raw.short_exits[i] && position == -1 {
            out.short_exits[i] = true;
            position = 0;
        }
    }

    out
}

/// Everything one analysis run produced
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AnalysisReport {
    /// Ordered by trigger index
    pub signals: Vec<SignalRecord>,
    pub frame: SignalFrame,
    pub codes: Vec<ScenarioCode>,
    pub continuity: Vec<ContinuityRecord>,
    pub pivots: PivotSet,
    pub pmg: Vec<PmgRun>,
    pub triggers: Vec<TriggerEvent>,
    pub lifecycle: Vec<LifecycleSummary>,
    pub rejections: Vec<Rejection>,
}

// ============================================================
// ORCHESTRATOR
// ============================================================

/// Owns its detectors, dedup history and lifecycle arena. Not shared
/// across instruments; build one per symbol.
pub struct SignalOrchestrator<C: ContextProvider> {
    detectors: Vec<BuiltinDetector>,
    context_provider: C,
    config: AnalyzerConfig,
    dedup: Deduplicator,
    lifecycle: LifecycleMachine,
    pivot_tracker: PivotTracker,
    refiner: IntrabarRefiner,
}

impl<C: ContextProvider> SignalOrchestrator<C> {
    pub fn new(detectors: Vec<BuiltinDetector>, context_provider: C, config: AnalyzerConfig) -> Self {
        Self {
            detectors,
            context_provider,
            dedup: Deduplicator::new(config.dedup_capacity),
            lifecycle: LifecycleMachine::new(config.trigger_tolerance),
            pivot_tracker: PivotTracker::new(config.pivot_up_threshold, config.pivot_down_threshold),
            refiner: IntrabarRefiner::new(config.trigger_tolerance),
            config,
        }
    }

    pub fn detectors(&self) -> &[BuiltinDetector] {
        &self.detectors
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &LifecycleMachine {
        &self.lifecycle
    }

    /// Forget dedup history and lifecycle state
    pub fn reset(&mut self) {
        self.dedup.clear();
        self.lifecycle.clear();
    }

    /// Analyse a single series with no other timeframes
    pub fn analyze_series<T: OHLCV>(&mut self, timeframe: Timeframe, bars: &[T]) -> Result<AnalysisReport> {
        self.analyze(&MultiTimeframeInput::new(timeframe, bars))
    }

    /// Run the full pipeline. Dedup history carries over between calls
    /// until [`reset`](Self::reset).
    pub fn analyze<T: OHLCV>(&mut self, input: &MultiTimeframeInput<'_, T>) -> Result<AnalysisReport> {
        if self.config.validate_data {
            for series in input.all_series() {
                validate_series(series.bars)?;
            }
        }

        let bars = input.base.bars;
        let timeframe = input.base.timeframe;
        if bars.is_empty() {
            return Ok(AnalysisReport::default());
        }

        let codes = classify(bars);
        let contexts = self.context_provider.compute_all(bars);
        let mut pivots = self.pivot_tracker.detect(bars);
        pivots.mark_taken(bars);
        let pmg = detect_pmg(&pivots.marks, self.config.pmg_min_count);

        let mut rejections = Vec::new();
        let candidates = self.detect_all(bars, &codes, &mut rejections);

        let base = TimeframeCodes::new(timeframe, bars.iter().map(|b| b.timestamp()).collect(), codes.clone());
        let others: Vec<_> = input
            .context
            .iter()
            .map(|f| TimeframeCodes::from_bars(f.timeframe, f.bars))
            .collect();
        let continuity = ContinuityScorer.score(&base, &others);

        let mut signals = Vec::new();
        let mut accepted = Vec::new();
        for candidate in candidates {
            let record = &continuity[candidate.trigger_index];
            if let Some(reason) = self.filter(&candidate, record) {
                tracing::debug!(pattern = %candidate.kind, index = candidate.trigger_index, %reason, "candidate rejected");
                rejections.push(Rejection::of(&candidate, reason));
                continue;
            }

            let refined = input
                .intrabar
                .as_ref()
                .and_then(|fine| self.refiner.refine(&candidate, bars, timeframe, fine.bars));

            signals.push(SignalRecord {
                timestamp: candidate.timestamp,
                trigger_index: candidate.trigger_index,
                pattern_name: candidate.kind.name(),
                direction: candidate.direction,
                trigger: candidate.trigger,
                stop: candidate.stop,
                target: candidate.target,
                confidence: blend_confidence(record.confidence, candidate.confidence, candidate.risk_reward),
                pattern_confidence: candidate.confidence,
                continuity_score: record.confidence,
                continuity_direction: record.direction,
                continuity_tier: record.tier,
                bar_sequence: candidate.bar_sequence(),
                risk_reward: candidate.risk_reward,
                atr: contexts.get(candidate.trigger_index).map_or(0.0, |c| c.atr),
                refined_trigger: refined,
                notes: candidate.notes.clone(),
            });
            accepted.push(candidate);
        }

        let triggers = {
            let mut events: Vec<_> = signals.iter().filter_map(|s| s.refined_trigger.clone()).collect();
            events.sort_by_key(|e| e.timestamp);
            events
        };

        let mut raw = SignalFrame::new(base.timestamps);
        let lifecycle = self.replay(&accepted, bars, &pivots, &mut raw);
        if self.config.reversal_exits {
            mark_reversal_exits(&codes, &mut raw);
        }
        let frame = clean_signals(&raw);

        tracing::info!(
            bars = bars.len(),
            timeframe = %timeframe,
            signals = signals.len(),
            rejected = rejections.len(),
            "analysis complete"
        );

        Ok(AnalysisReport {
            signals,
            frame,
            codes,
            continuity,
            pivots,
            pmg,
            triggers,
            lifecycle,
            rejections,
        })
    }

    // ===========================================
    // Internal helpers
    // ===========================================

    fn detect_all<T: OHLCV>(
        &mut self,
        bars: &[T],
        codes: &[ScenarioCode],
        rejections: &mut Vec<Rejection>,
    ) -> Vec<PatternCandidate> {
        let mut candidates = Vec::new();

        for index in 0..bars.len() {
            for detector in &self.detectors {
                if index + 1 < detector.window() {
                    continue;
                }
                match detector.detect(bars, codes, index) {
                    None => {},
                    Some(Err(rejection)) => rejections.push(rejection),
                    Some(Ok(candidate)) => {
                        if !self.config.includes(candidate.kind) {
                            rejections.push(Rejection::of(&candidate, RejectReason::Filtered));
                        } else if self.dedup.is_duplicate(&candidate) {
                            rejections.push(Rejection::of(&candidate, RejectReason::Duplicate));
                        } else {
                            candidates.push(candidate);
                        }
                    },
                }
            }
        }

        candidates
    }

    fn filter(&self, candidate: &PatternCandidate, record: &ContinuityRecord) -> Option<RejectReason> {
        if candidate.risk_reward < self.config.min_risk_reward {
            return Some(RejectReason::BelowRiskReward);
        }
        if record.tier < self.config.effective_min_tier() {
            return Some(RejectReason::ContinuityTier);
        }
        if record.direction.opposes(candidate.direction) {
            return Some(RejectReason::ContinuityDirection);
        }
        None
    }

    /// Walk every accepted signal through the lifecycle and set raw flags
    fn replay<T: OHLCV>(
        &mut self,
        accepted: &[PatternCandidate],
        bars: &[T],
        pivots: &PivotSet,
        raw: &mut SignalFrame,
    ) -> Vec<LifecycleSummary> {
        let mut summaries = Vec::with_capacity(accepted.len());

        for candidate in accepted {
            let Some(id) = self.lifecycle.track_candidate(candidate, bars) else {
                continue;
            };

            let untaken = pivots.untaken_as_of(bars, candidate.trigger_index);
            let mut targets = vec![candidate.target];
            targets.extend(magnitude_targets(candidate.trigger, candidate.direction, &untaken));
            self.lifecycle.set_targets(id, &targets);

            if let Some((entry, exit)) = self.walk(id, bars, candidate.trigger_index) {
                let (entries, exits) = match candidate.direction {
                    Direction::Bullish => (&mut raw.long_entries, &mut raw.long_exits),
                    Direction::Bearish => (&mut raw.short_entries, &mut raw.short_exits),
                };
                entries[entry] = true;
                if let Some(exit) = exit {
                    exits[exit] = true;
                }
            }

            // Nothing stays tracked past the run, open trades included
            if let Some(summary) = self.lifecycle.release(id) {
                summaries.push(summary);
            }
        }

        summaries
    }

    /// Bars from the trigger bar on: cross the trigger, enter at the trigger
    /// price, then look for the stop or target on later bars. Returns the
    /// entry bar and the exit bar, if any.
    fn walk<T: OHLCV>(&mut self, id: LifecycleId, bars: &[T], from: usize) -> Option<(usize, Option<usize>)> {
        let mut entry = None;

        for (i, bar) in bars.iter().enumerate().skip(from) {
            match self.lifecycle.state(id)? {
                PatternState::Triggered => {
                    if let Step::Transitioned { .. } = self.lifecycle.check_trigger(id, bar) {
                        let price = self.lifecycle.context(id).and_then(|c| c.trigger)?;
                        self.lifecycle.enter(id, price, bar.timestamp());
                        entry = Some(i);
                    } else {
                        self.lifecycle.invalidate(id, bar);
                    }
                },
                PatternState::Entered => {
                    self.lifecycle.check_exit(id, bar);
                    if self.lifecycle.state(id).is_some_and(PatternState::is_terminal) {
                        return entry.map(|e| (e, Some(i)));
                    }
                },
                _ => break,
            }
        }

        entry.map(|e| (e, None))
    }
}

/// `(continuity * 0.6 + pattern * 0.4) * (0.7 + 0.3 * min(rr / 3, 1))`, clamped
pub fn blend_confidence(continuity: f64, pattern: f64, risk_reward: f64) -> f64 {
    let rr_factor = 0.7 + 0.3 * (risk_reward / 3.0).min(1.0);
    helpers::clamp_confidence((continuity * CONTINUITY_WEIGHT + pattern * PATTERN_WEIGHT) * rr_factor)
}

/// Raw exits on 2-2 reversals of the base series
fn mark_reversal_exits(codes: &[ScenarioCode], raw: &mut SignalFrame) {
    for (i, pair) in codes.windows(2).enumerate() {
        match (pair[0], pair[1]) {
            (ScenarioCode::Up, ScenarioCode::Down) => raw.long_exits[i + 1] = true,
            (ScenarioCode::Down, ScenarioCode::Up) => raw.short_exits[i + 1] = true,
            _ => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn frame(rows: &[(bool, bool, bool, bool)]) -> SignalFrame {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut f = SignalFrame::new((0..rows.len()).map(|i| start + Duration::days(i as i64)).collect());
        for (i, &(le, lx, se, sx)) in rows.iter().enumerate() {
            f.long_entries[i] = le;
            f.long_exits[i] = lx;
            f.short_entries[i] = se;
            f.short_exits[i] = sx;
        }
        f
    }

    #[test]
    fn cleaning_drops_exits_while_flat() {
        let cleaned = clean_signals(&frame(&[(false, true, false, true), (true, false, false, false)]));
        assert!(!cleaned.long_exits[0] && !cleaned.short_exits[0]);
        assert!(cleaned.long_entries[1]);
    }

    #[test]
    fn cleaning_drops_repeated_entries() {
        let cleaned = clean_signals(&frame(&[
            (true, false, false, false),
            (true, false, false, false),
            (false, true, false, false),
            (false, true, false, false),
        ]));
        assert_eq!(cleaned.long_entries, vec![true, false, false, false]);
        assert_eq!(cleaned.long_exits, vec![false, false, true, false]);
        assert_eq!(cleaned.positions(), vec![1, 1, 0, 0]);
    }

    #[test]
    fn long_entry_wins_same_bar() {
        let cleaned = clean_signals(&frame(&[(true, false, true, false), (false, false, true, false)]));
        assert!(cleaned.long_entries[0] && !cleaned.short_entries[0]);
        // short entry flips the long position
        assert!(cleaned.short_entries[1]);
        assert_eq!(cleaned.positions(), vec![1, -1]);
    }

    #[test]
    fn blended_confidence_matches_formula() {
        let c = blend_confidence(0.95, 0.85, 3.0);
        assert!((c - (0.95 * 0.6 + 0.85 * 0.4)).abs() < 1e-12);
        let low_rr = blend_confidence(0.50, 0.85, 1.5);
        assert!((low_rr - (0.50 * 0.6 + 0.85 * 0.4) * 0.85).abs() < 1e-12);
        assert_eq!(blend_confidence(0.10, 0.10, 0.0), 0.10);
    }

    #[test]
    fn reversal_exits_follow_two_two_pairs() {
        let codes = [
            ScenarioCode::Unclassified,
            ScenarioCode::Up,
            ScenarioCode::Down,
            ScenarioCode::Inside,
            ScenarioCode::Down,
            ScenarioCode::Up,
        ];
        let mut raw = frame(&[(false, false, false, false); 6]);
        mark_reversal_exits(&codes, &mut raw);
        assert_eq!(raw.long_exits, vec![false, false, true, false, false, false]);
        assert_eq!(raw.short_exits, vec![false, false, false, false, false, true]);
    }

    #[test]
    fn config_defaults_and_validation() {
        let config = AnalyzerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_continuity_tier, ContinuityTier::Partial);
        assert_eq!(config.dedup_capacity, 50);

        let strict = AnalyzerConfig {
            require_full_continuity: true,
            ..AnalyzerConfig::default()
        };
        assert_eq!(strict.effective_min_tier(), ContinuityTier::Full);

        let bad = AnalyzerConfig {
            pmg_min_count: 0,
            ..AnalyzerConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: AnalyzerConfig =
            serde_json::from_str(r#"{"min_risk_reward": 2.0, "pattern_filter": ["2-1-2", "rev-strat"]}"#).unwrap();
        assert_eq!(config.min_risk_reward, 2.0);
        assert_eq!(config.trigger_tolerance, 0.01);
        assert_eq!(
            config.pattern_filter,
            Some(vec![PatternKind::TwoOneTwo, PatternKind::RevStrat])
        );
        assert!(serde_json::from_str::<AnalyzerConfig>(r#"{"pivot_up_threshold": 1.5}"#).is_err());
    }
}
