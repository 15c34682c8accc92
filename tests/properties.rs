//! Property tests for classification, signal levels and the cleaning pass.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use stratum::prelude::*;
use stratum::scenario::classify_with_ranges;

// ============================================================
// STRATEGIES
// ============================================================

/// Random walk of valid daily bars
fn arb_bars() -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec((-3.0..3.0_f64, 0.0..4.0_f64, 0.0..1.0_f64, 0.0..1.0_f64), 2..120).prop_map(|steps| {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut mid = 100.0_f64;
        steps
            .into_iter()
            .enumerate()
            .map(|(i, (delta, range, open_at, close_at))| {
                mid = (mid + delta).max(20.0);
                let low = mid - range / 2.0;
                let high = mid + range / 2.0;
                Bar::new(
                    start + Duration::days(i as i64),
                    low + open_at * range,
                    high,
                    low,
                    low + close_at * range,
                    1000.0,
                )
            })
            .collect()
    })
}

fn arb_raw_frame() -> impl Strategy<Value = SignalFrame> {
    prop::collection::vec(prop::array::uniform4(prop::bool::ANY), 0..60).prop_map(|rows| {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut frame = SignalFrame::new((0..rows.len()).map(|i| start + Duration::days(i as i64)).collect());
        for (i, [le, lx, se, sx]) in rows.into_iter().enumerate() {
            frame.long_entries[i] = le;
            frame.long_exits[i] = lx;
            frame.short_entries[i] = se;
            frame.short_exits[i] = sx;
        }
        frame
    })
}

/// Every flag must be legal for the position held before its bar
fn assert_consistent(frame: &SignalFrame) -> std::result::Result<(), TestCaseError> {
    let mut position = 0i8;
    for i in 0..frame.len() {
        let flags = [
            frame.long_entries[i],
            frame.short_entries[i],
            frame.long_exits[i],
            frame.short_exits[i],
        ];
        prop_assert!(flags.iter().filter(|&&f| f).count() <= 1, "several flags at bar {}", i);

        if frame.long_entries[i] {
            prop_assert!(position != 1);
            position = 1;
        } else if frame.short_entries[i] {
            prop_assert!(position != -1);
            position = -1;
        } else if frame.long_exits[i] {
            prop_assert_eq!(position, 1);
            position = 0;
        } else if frame.short_exits[i] {
            prop_assert_eq!(position, -1);
            position = 0;
        }
    }
    Ok(())
}

// ============================================================
// CLASSIFICATION
// ============================================================

proptest! {
    #[test]
    fn classification_covers_every_bar(bars in arb_bars()) {
        let classified = classify_with_ranges(&bars);
        prop_assert_eq!(classified.len(), bars.len());
        prop_assert_eq!(classified[0].0, ScenarioCode::Unclassified);

        for (bar, (code, range)) in bars.iter().zip(&classified).skip(1) {
            prop_assert_ne!(*code, ScenarioCode::Unclassified);
            prop_assert_eq!(*code == ScenarioCode::Inside, range.contains(bar));
        }
    }
}

// ============================================================
// SIGNALS
// ============================================================

proptest! {
    #[test]
    fn signal_levels_are_ordered(bars in arb_bars()) {
        let mut analyzer = AnalyzerBuilder::new()
            .with_all_defaults()
            .min_continuity_tier(ContinuityTier::None)
            .build()
            .unwrap();
        let report = analyzer.analyze_series(Timeframe::Day, &bars).unwrap();

        for s in &report.signals {
            let sign = match s.direction {
                Direction::Bullish => 1.0,
                Direction::Bearish => -1.0,
            };
            prop_assert!((s.trigger - s.stop) * sign > 0.0);
            prop_assert!((s.target - s.trigger) * sign > 0.0);
            prop_assert!(s.risk_reward >= 1.0);
            prop_assert!((0.10..=0.95).contains(&s.confidence));
            prop_assert!((0.10..=0.95).contains(&s.pattern_confidence));
        }

        prop_assert!(report.signals.windows(2).all(|w| w[0].trigger_index <= w[1].trigger_index));
    }

    #[test]
    fn cleaned_frame_is_consistent(bars in arb_bars()) {
        let mut analyzer = AnalyzerBuilder::new()
            .with_all_defaults()
            .min_continuity_tier(ContinuityTier::None)
            .min_risk_reward(0.0)
            .build()
            .unwrap();
        let report = analyzer.analyze_series(Timeframe::Day, &bars).unwrap();

        prop_assert_eq!(report.frame.len(), bars.len());
        assert_consistent(&report.frame)?;
    }

    #[test]
    fn continuity_records_are_bounded(bars in arb_bars()) {
        let mut analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        let report = analyzer.analyze_series(Timeframe::Day, &bars).unwrap();

        for record in &report.continuity {
            prop_assert!(record.aligned <= record.timeframes);
            prop_assert_eq!(record.alignment, record.bullish as i32 - record.bearish as i32);
            prop_assert_eq!(record.confidence, record.tier.confidence());
        }
    }
}

// ============================================================
// CLEANING
// ============================================================

proptest! {
    #[test]
    fn cleaning_any_raw_frame_is_consistent(raw in arb_raw_frame()) {
        let cleaned = clean_signals(&raw);
        prop_assert_eq!(cleaned.len(), raw.len());
        assert_consistent(&cleaned)?;
    }

    #[test]
    fn cleaning_is_idempotent(raw in arb_raw_frame()) {
        let once = clean_signals(&raw);
        let twice = clean_signals(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn cleaning_only_removes_flags(raw in arb_raw_frame()) {
        let cleaned = clean_signals(&raw);
        for i in 0..raw.len() {
            prop_assert!(!cleaned.long_entries[i] || raw.long_entries[i]);
            prop_assert!(!cleaned.short_entries[i] || raw.short_entries[i]);
            prop_assert!(!cleaned.long_exits[i] || raw.long_exits[i]);
            prop_assert!(!cleaned.short_exits[i] || raw.short_exits[i]);
        }
    }
}
