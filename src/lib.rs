//! # stratum - STRAT scenario analysis
//!
//! Classifies OHLCV bars into STRAT scenario codes (1, 2U, 2D, 3), detects
//! multi-bar scenario patterns, scores timeframe continuity and turns the
//! surviving candidates into cleaned long/short entry and exit series.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use stratum::prelude::*;
//!
//! let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
//! let bars: Vec<Bar> = [
//!     (100.0, 100.0, 95.0, 100.0),
//!     (100.0, 103.0, 97.0, 102.0),
//!     (102.0, 101.0, 98.0, 100.0),
//!     (100.0, 105.0, 98.0, 104.0),
//! ]
//! .iter()
//! .enumerate()
//! .map(|(i, &(o, h, l, c))| Bar::new(start + Duration::days(i as i64), o, h, l, c, 1000.0))
//! .collect();
//!
//! let mut analyzer = AnalyzerBuilder::new()
//!     .with_all_defaults()
//!     .min_continuity_tier(ContinuityTier::None)
//!     .build()
//!     .unwrap();
//!
//! let report = analyzer.analyze_series(Timeframe::Day, &bars).unwrap();
//! assert_eq!(report.signals.len(), 1);
//! assert_eq!(report.signals[0].pattern_name, "2-1-2");
//! ```

pub mod continuity;
pub mod dedup;
pub mod detectors;
pub mod intrabar;
pub mod lifecycle;
pub mod orchestrator;
pub mod params;
pub mod pivots;
pub mod scenario;

pub mod prelude {
    pub use crate::{
        // Continuity
        continuity::{
            ContinuityDirection, ContinuityRecord, ContinuityScorer, ContinuityTier, Timeframe,
            TimeframeCodes,
        },
        // Dedup
        dedup::{Deduplicator, Fingerprint},
        // Detectors
        detectors::*,
        // Intrabar
        intrabar::{IntrabarRefiner, TriggerEvent},
        // Lifecycle
        lifecycle::{LifecycleId, LifecycleMachine, NotApplicable, PatternContext, PatternState, Step},
        // Orchestration
        orchestrator::{
            clean_signals, AnalysisReport, AnalyzerConfig, MultiTimeframeInput, SignalFrame,
            SignalOrchestrator, SignalRecord, TimeframeBars,
        },
        // Parameters
        params::{get_period, get_ratio, get_scalar, ParamMap, ParamMeta, ParamType, ParameterizedDetector},
        // Pivots
        pivots::{Pivot, PivotKind, PivotMark, PivotSet, PivotTracker, PmgRun},
        // Classification
        scenario::{classify, relative_code, GoverningRange, ScenarioCode},
        // Parallel
        analyze_parallel,
        AnalysisError,
        AnalysisResult,
        // Engine
        AnalyzerBuilder,
        Bar,
        BuiltinDetector,
        ContextProvider,
        DefaultAnalyzer,
        DefaultContextProvider,
        Direction,
        MarketContext,
        OHLCVExt,
        // Core traits
        PatternDetector,
        Period,
        Ratio,
        // Errors
        Result,
        StratError,
        OHLCV,
    };
}

use chrono::{DateTime, Utc};

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, StratError>;

/// Errors surfaced by configuration and input validation.
///
/// Pattern-level problems (short windows, shape mismatches, zero-risk levels)
/// never become errors; detectors report them as `None` or a
/// [`Rejection`](detectors::Rejection).
#[derive(Debug, Clone, thiserror::Error)]
pub enum StratError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Timestamps not strictly increasing at index {index}")]
    UnorderedTimestamps { index: usize },
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(StratError::InvalidValue("Ratio cannot be NaN or infinite"));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(StratError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(StratError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait. Every bar carries its own UTC timestamp.
pub trait OHLCV {
    fn timestamp(&self) -> DateTime<Utc>;
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let values = [self.open(), self.high(), self.low(), self.close()];
        if values.iter().any(|v| v.is_nan()) {
            return Err(StratError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if values.iter().any(|v| v.is_infinite()) {
            return Err(StratError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.high() < self.low() {
            return Err(StratError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

/// Validate every bar of a series and require strictly increasing timestamps.
pub fn validate_series<T: OHLCV>(bars: &[T]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            StratError::InvalidOHLCV { reason, .. } => StratError::InvalidOHLCV { index: i, reason },
            other => other,
        })?;
        if i > 0 && bar.timestamp() <= bars[i - 1].timestamp() {
            return Err(StratError::UnorderedTimestamps { index: i });
        }
    }
    Ok(())
}

/// Plain OHLCV bar
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for Bar {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }
}

// ============================================================
// DIRECTION
// ============================================================

/// Trade direction of a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
        }
    }

    /// +1.0 for bullish, -1.0 for bearish
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Bearish => "bearish",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// MARKET CONTEXT
// ============================================================

/// Market context at a specific bar
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct MarketContext {
    /// Wilder average true range
    pub atr: f64,
}

/// Provider of market context - precomputes context for all bars
pub trait ContextProvider: Send + Sync {
    fn compute_all<T: OHLCV>(&self, bars: &[T]) -> Vec<MarketContext>;
}

/// Default ATR lookback
pub const DEFAULT_ATR_PERIOD: usize = 14;

static CONTEXT_PARAMS: &[params::ParamMeta] = &[params::ParamMeta::period(
    "atr_period",
    DEFAULT_ATR_PERIOD as f64,
    (5.0, 30.0, 1.0),
    "Wilder ATR lookback in bars",
)];

/// Default context provider: Wilder ATR
#[derive(Debug, Clone)]
pub struct DefaultContextProvider {
    pub atr_period: Period,
}

impl Default for DefaultContextProvider {
    fn default() -> Self {
        Self {
            atr_period: Period::new_const(DEFAULT_ATR_PERIOD),
        }
    }
}

impl DefaultContextProvider {
    pub fn param_meta() -> &'static [params::ParamMeta] {
        CONTEXT_PARAMS
    }

    /// Build from a parameter map; a missing `atr_period` keeps the default
    pub fn with_params(map: &params::ParamMap<'_>) -> Result<Self> {
        Ok(Self {
            atr_period: params::get_period(map, "atr_period", DEFAULT_ATR_PERIOD)?,
        })
    }
}

impl ContextProvider for DefaultContextProvider {
    fn compute_all<T: OHLCV>(&self, bars: &[T]) -> Vec<MarketContext> {
        average_true_range(bars, self.atr_period)
            .into_iter()
            .map(|atr| MarketContext { atr })
            .collect()
    }
}

/// Wilder average true range.
///
/// The first `period` values are the running mean of the available true
/// ranges; after that each value is smoothed as `(prev * (p - 1) + tr) / p`.
pub fn average_true_range<T: OHLCV>(bars: &[T], period: Period) -> Vec<f64> {
    let p = period.get();
    let mut out = Vec::with_capacity(bars.len());
    let mut sum = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        let tr = match i {
            0 => bar.range(),
            _ => {
                let prev_close = bars[i - 1].close();
                bar.range()
                    .max((bar.high() - prev_close).abs())
                    .max((bar.low() - prev_close).abs())
            },
        };

        let atr = if i < p {
            sum += tr;
            sum / (i + 1) as f64
        } else {
            (out[i - 1] * (p - 1) as f64 + tr) / p as f64
        };
        out.push(atr);
    }

    out
}

// ============================================================
// PATTERN DETECTOR TRAIT
// ============================================================

use detectors::{Detection, PatternKind};
use scenario::ScenarioCode;

/// Scenario pattern detector.
///
/// `detect` looks at the window ending at `index` (the trigger bar).
/// `None` means the window does not have the pattern's shape or there is not
/// enough history; `Some(Err(_))` means the shape matched but the candidate
/// was rejected (degenerate levels, failed confirmation).
pub trait PatternDetector: Send + Sync {
    fn kind(&self) -> PatternKind;

    fn window(&self) -> usize {
        self.kind().window()
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        codes: &[ScenarioCode],
        index: usize,
    ) -> Option<Detection>;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - enum dispatch over the closed pattern set
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl BuiltinDetector {
            #[inline]
            pub fn detect<T: OHLCV>(
                &self,
                bars: &[T],
                codes: &[ScenarioCode],
                index: usize,
            ) -> Option<Detection> {
                match self {
                    $(Self::$variant(d) => PatternDetector::detect(d, bars, codes, index)),*
                }
            }

            #[inline]
            pub fn kind(&self) -> PatternKind {
                match self {
                    $(Self::$variant(d) => PatternDetector::kind(d)),*
                }
            }

            #[inline]
            pub fn window(&self) -> usize {
                match self {
                    $(Self::$variant(d) => PatternDetector::window(d)),*
                }
            }

            pub fn tolerance(&self) -> f64 {
                match self {
                    $(Self::$variant(d) => d.tolerance),*
                }
            }

            pub fn set_tolerance(&mut self, tolerance: f64) {
                match self {
                    $(Self::$variant(d) => d.tolerance = tolerance),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => PatternDetector::validate_config(d)),*
                }
            }
        }
    };
}

define_builtin_detectors! {
    // Two-bar
    ThreeTwo(ThreeTwoDetector),
    TwoTwoReversal(TwoTwoReversalDetector),
    TwoTwoContinuation(TwoTwoContinuationDetector),

    // Three-bar
    TwoOneTwo(TwoOneTwoDetector),
    TwoOneTwoReversal(TwoOneTwoReversalDetector),
    ThreeOneTwo(ThreeOneTwoDetector),
    ThreeTwoTwo(ThreeTwoTwoDetector),

    // Four-bar
    RevStrat(RevStratDetector),
}

// ============================================================
// BUILDER
// ============================================================

use orchestrator::{AnalyzerConfig, SignalOrchestrator};

/// Builder for [`SignalOrchestrator`] instances
#[derive(Debug, Clone)]
pub struct AnalyzerBuilder<C: ContextProvider = DefaultContextProvider> {
    context_provider: C,
    detectors: Vec<BuiltinDetector>,
    config: AnalyzerConfig,
}

impl Default for AnalyzerBuilder<DefaultContextProvider> {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerBuilder<DefaultContextProvider> {
    pub fn new() -> Self {
        Self {
            context_provider: DefaultContextProvider::default(),
            detectors: Vec::new(),
            config: AnalyzerConfig::default(),
        }
    }
}

/// Generate an array of `BuiltinDetector` variants using `Default::default()` for each inner type.
macro_rules! builtin_defaults {
    ($($variant:ident),* $(,)?) => {
        [$(BuiltinDetector::$variant(Default::default())),*]
    };
}

impl<C: ContextProvider> AnalyzerBuilder<C> {
    /// Change context provider
    pub fn context_provider<C2: ContextProvider>(self, provider: C2) -> AnalyzerBuilder<C2> {
        AnalyzerBuilder {
            context_provider: provider,
            detectors: self.detectors,
            config: self.config,
        }
    }

    /// Add every builtin pattern with its default parameters
    pub fn with_all_defaults(self) -> Self {
        self.with_two_bar_defaults()
            .with_three_bar_defaults()
            .with_four_bar_defaults()
    }

    /// 3-2, 2-2 reversal, 2-2 continuation
    pub fn with_two_bar_defaults(mut self) -> Self {
        self.detectors
            .extend(builtin_defaults![ThreeTwo, TwoTwoReversal, TwoTwoContinuation]);
        self
    }

    /// 2-1-2, 2-1-2 reversal, 3-1-2, 3-2-2
    pub fn with_three_bar_defaults(mut self) -> Self {
        self.detectors.extend(builtin_defaults![
            TwoOneTwo,
            TwoOneTwoReversal,
            ThreeOneTwo,
            ThreeTwoTwo,
        ]);
        self
    }

    /// Rev-strat
    pub fn with_four_bar_defaults(mut self) -> Self {
        self.detectors.extend(builtin_defaults![RevStrat]);
        self
    }

    /// Add a builtin detector
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, detector: BuiltinDetector) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, detector: BuiltinDetector) -> Result<Self> {
        detector.validate_config()?;
        self.detectors.push(detector);
        Ok(self)
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    /// Price offset applied beyond the setup bar; overrides every detector's tolerance
    pub fn trigger_tolerance(mut self, tolerance: f64) -> Self {
        self.config.trigger_tolerance = tolerance;
        self
    }

    pub fn min_risk_reward(mut self, ratio: f64) -> Self {
        self.config.min_risk_reward = ratio;
        self
    }

    pub fn min_continuity_tier(mut self, tier: continuity::ContinuityTier) -> Self {
        self.config.min_continuity_tier = tier;
        self
    }

    pub fn require_full_continuity(mut self, enable: bool) -> Self {
        self.config.require_full_continuity = enable;
        self
    }

    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.config.dedup_capacity = capacity;
        self
    }

    /// Enable/disable data validation
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.config.validate_data = enable;
        self
    }

    /// Enable/disable 2-2 reversal exits
    pub fn reversal_exits(mut self, enable: bool) -> Self {
        self.config.reversal_exits = enable;
        self
    }

    /// Keep signals of the given patterns only
    pub fn only_patterns(mut self, kinds: impl IntoIterator<Item = PatternKind>) -> Self {
        self.config.pattern_filter = Some(kinds.into_iter().collect());
        self
    }

    /// Build the orchestrator
    pub fn build(self) -> Result<SignalOrchestrator<C>> {
        self.config.validate()?;

        let mut detectors = self.detectors;
        for d in &mut detectors {
            d.set_tolerance(self.config.trigger_tolerance);
            d.validate_config()?;
        }

        Ok(SignalOrchestrator::new(detectors, self.context_provider, self.config))
    }
}

// ============================================================
// PARALLEL ANALYSIS
// ============================================================

use orchestrator::{AnalysisReport, MultiTimeframeInput};
use rayon::prelude::*;

/// Result of analysing a single instrument
#[derive(Debug)]
pub struct AnalysisResult {
    pub symbol: String,
    pub report: AnalysisReport,
}

/// Error from analysing a single instrument
#[derive(Debug)]
pub struct AnalysisError {
    pub symbol: String,
    pub error: StratError,
}

/// Analyse independent instruments in parallel.
///
/// Each instrument gets its own orchestrator built from `builder`, so
/// deduplication history and lifecycle state are never shared across symbols.
pub fn analyze_parallel<'a, T, I, C>(
    builder: &AnalyzerBuilder<C>,
    instruments: I,
) -> (Vec<AnalysisResult>, Vec<AnalysisError>)
where
    T: OHLCV + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, MultiTimeframeInput<'a, T>)>,
    C: ContextProvider + Clone,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(symbol, input)| {
            builder
                .clone()
                .build()
                .and_then(|mut analyzer| analyzer.analyze(&input))
                .map(|report| AnalysisResult {
                    symbol: symbol.to_string(),
                    report,
                })
                .map_err(|error| AnalysisError {
                    symbol: symbol.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

// ============================================================
// TYPE ALIASES
// ============================================================

/// Orchestrator with the default context provider
pub type DefaultAnalyzer = SignalOrchestrator<DefaultContextProvider>;

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap() + Duration::days(i)
    }

    fn bar(i: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar::new(day(i), o, h, l, c, 1000.0)
    }

    fn make_trend_bars(step: f64) -> Vec<Bar> {
        (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * step;
                bar(i, base, base + 1.0, base - 1.0, base + step / 2.0)
            })
            .collect()
    }

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(0.5).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
        assert!(Ratio::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(100).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_ohlcv_ext() {
        let b = bar(0, 100.0, 110.0, 90.0, 105.0);
        assert_eq!(b.range(), 20.0);
        assert!(b.is_bullish());
        assert!(!b.is_bearish());
        assert!(b.validate().is_ok());
        assert!(bar(0, 100.0, 90.0, 110.0, 100.0).validate().is_err());
        assert!(bar(0, f64::NAN, 110.0, 90.0, 100.0).validate().is_err());
    }

    #[test]
    fn test_validate_series_reports_index() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(1, 100.0, 99.0, 101.0, 100.0),
        ];
        match validate_series(&bars) {
            Err(StratError::InvalidOHLCV { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected {other:?}"),
        }

        let unordered = vec![bar(1, 100.0, 101.0, 99.0, 100.0), bar(0, 100.0, 101.0, 99.0, 100.0)];
        assert!(matches!(
            validate_series(&unordered),
            Err(StratError::UnorderedTimestamps { index: 1 })
        ));
    }

    #[test]
    fn test_average_true_range() {
        let bars = vec![
            bar(0, 10.0, 12.0, 9.0, 11.0),  // tr 3
            bar(1, 11.0, 13.0, 10.0, 12.0), // tr 3
            bar(2, 12.0, 20.0, 12.0, 19.0), // tr 8
            bar(3, 19.0, 20.0, 18.0, 19.0), // tr 2
        ];
        let atr = average_true_range(&bars, Period::new(2).unwrap());
        assert!((atr[0] - 3.0).abs() < 1e-12);
        assert!((atr[1] - 3.0).abs() < 1e-12);
        assert!((atr[2] - 5.5).abs() < 1e-12);
        assert!((atr[3] - 3.75).abs() < 1e-12);
    }

    #[test]
    fn test_compute_contexts() {
        let bars = make_trend_bars(1.0);
        let contexts = DefaultContextProvider::default().compute_all(&bars);
        assert_eq!(contexts.len(), bars.len());
        assert!(contexts.iter().all(|c| c.atr > 0.0));
    }

    #[test]
    fn test_context_provider_from_params() {
        let bars = make_trend_bars(1.0);
        let mut map = std::collections::HashMap::new();
        map.insert("atr_period", 3.0);

        let provider = DefaultContextProvider::with_params(&map).unwrap();
        assert_eq!(provider.atr_period.get(), 3);
        let atr: Vec<f64> = provider.compute_all(&bars).iter().map(|c| c.atr).collect();
        assert_eq!(atr, average_true_range(&bars, Period::new(3).unwrap()));

        let defaults = DefaultContextProvider::with_params(&std::collections::HashMap::new()).unwrap();
        assert_eq!(defaults.atr_period.get(), DEFAULT_ATR_PERIOD);

        map.insert("atr_period", 2.5);
        assert!(DefaultContextProvider::with_params(&map).is_err());
        map.insert("atr_period", 0.0);
        assert!(DefaultContextProvider::with_params(&map).is_err());

        let meta = DefaultContextProvider::param_meta();
        assert_eq!(meta[0].param_type, params::ParamType::Period);
        assert!(meta[0].validate(meta[0].default).is_ok());
    }

    #[test]
    fn test_direction_helpers() {
        assert_eq!(Direction::Bullish.opposite(), Direction::Bearish);
        assert_eq!(Direction::Bearish.sign(), -1.0);
        assert_eq!(Direction::Bullish.to_string(), "bullish");
    }

    #[test]
    fn test_builder_all_defaults() {
        let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        assert_eq!(analyzer.detectors().len(), 8);
    }

    #[test]
    fn test_builder_groups() {
        let two = AnalyzerBuilder::new().with_two_bar_defaults().build().unwrap();
        assert_eq!(two.detectors().len(), 3);
        let three = AnalyzerBuilder::new().with_three_bar_defaults().build().unwrap();
        assert_eq!(three.detectors().len(), 4);
        let four = AnalyzerBuilder::new().with_four_bar_defaults().build().unwrap();
        assert_eq!(four.detectors()[0].kind(), PatternKind::RevStrat);
    }

    #[test]
    fn test_builder_applies_tolerance() {
        let analyzer = AnalyzerBuilder::new()
            .with_all_defaults()
            .trigger_tolerance(0.05)
            .build()
            .unwrap();
        assert!(analyzer.detectors().iter().all(|d| d.tolerance() == 0.05));
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        assert!(AnalyzerBuilder::new().trigger_tolerance(-1.0).build().is_err());
        assert!(AnalyzerBuilder::new().dedup_capacity(0).build().is_err());
        assert!(AnalyzerBuilder::new().min_risk_reward(f64::NAN).build().is_err());
    }

    #[test]
    fn test_add_checked_rejects_invalid_detector() {
        let detector = TwoOneTwoDetector {
            tolerance: f64::NAN,
            ..Default::default()
        };
        assert!(AnalyzerBuilder::new()
            .add_checked(BuiltinDetector::TwoOneTwo(detector))
            .is_err());
    }

    #[test]
    fn test_empty_analysis() {
        let mut analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        let bars: Vec<Bar> = vec![];
        let report = analyzer.analyze_series(continuity::Timeframe::Day, &bars).unwrap();
        assert!(report.signals.is_empty());
        assert!(report.frame.is_empty());
    }

    #[test]
    fn test_parallel_analysis() {
        let builder = AnalyzerBuilder::new().with_all_defaults();

        let bars1 = make_trend_bars(2.0);
        let bars2 = make_trend_bars(-2.0);
        let mut broken = make_trend_bars(1.0);
        broken[5].high = broken[5].low - 1.0;

        let instruments = vec![
            ("AAPL", MultiTimeframeInput::new(continuity::Timeframe::Day, &bars1[..])),
            ("MSFT", MultiTimeframeInput::new(continuity::Timeframe::Day, &bars2[..])),
            ("BAD", MultiTimeframeInput::new(continuity::Timeframe::Day, &broken[..])),
        ];

        let (results, errors) = analyze_parallel(&builder, instruments);
        assert_eq!(results.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].symbol, "BAD");
    }
}
