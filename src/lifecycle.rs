//! Pattern lifecycle state machine
//!
//! ```text
//! Scanning -> Pending -> Triggered -> InForce -> Entered -> Complete
//!                    \-> Failed           \-> Failed       \-> Failed
//! ```
//!
//! Contexts live in an arena addressed by [`LifecycleId`]. Ids are never
//! reused. [`LifecycleMachine::reap`] frees the slots of finished patterns
//! and [`LifecycleMachine::release`] frees one slot in any state; freed
//! slots at the front of the arena are dropped so its length tracks the
//! oldest live pattern, not the number ever started.
//! Calling an operation in the wrong state returns
//! [`Step::NotApplicable`] and leaves the context untouched.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::{
    detectors::{helpers, PatternCandidate, PatternKind},
    scenario::ScenarioCode,
    Direction, OHLCV,
};

// ============================================================
// STATES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternState {
    /// First code observed
    Scanning,
    /// Inside bar observed
    Pending,
    /// Full sequence matched, levels known, trigger not yet crossed
    Triggered,
    /// Price crossed the trigger
    InForce,
    Entered,
    /// Nearest target reached before the stop
    Complete,
    /// Stop reached, or the sequence broke before completing
    Failed,
}

impl PatternState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PatternState::Complete | PatternState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct LifecycleId(pub usize);

/// Why an operation did not apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotApplicable {
    UnknownPattern(LifecycleId),
    WrongState {
        expected: PatternState,
        actual: PatternState,
    },
}

/// Outcome of a lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Transitioned { from: PatternState, to: PatternState },
    Unchanged(PatternState),
    NotApplicable(NotApplicable),
}

impl Step {
    /// State after the step, if the pattern exists
    pub fn state(self) -> Option<PatternState> {
        match self {
            Step::Transitioned { to, .. } => Some(to),
            Step::Unchanged(state) => Some(state),
            Step::NotApplicable(NotApplicable::WrongState { actual, .. }) => Some(actual),
            Step::NotApplicable(NotApplicable::UnknownPattern(_)) => None,
        }
    }

    pub fn is_applicable(self) -> bool {
        !matches!(self, Step::NotApplicable(_))
    }
}

// ============================================================
// CONTEXT
// ============================================================

/// Everything known about one tracked pattern
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PatternContext {
    pub kind: PatternKind,
    pub codes: Vec<ScenarioCode>,
    pub start_index: usize,
    /// (index, high, low) of the inside bar
    pub inside_bar: Option<(usize, f64, f64)>,
    pub direction: Option<Direction>,
    pub trigger: Option<f64>,
    pub stop: Option<f64>,
    /// Nearest first
    pub targets: Vec<f64>,
    pub trigger_time: Option<DateTime<Utc>>,
    pub entry_price: Option<f64>,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    last_high: f64,
    last_low: f64,
}

/// Snapshot of a pattern for reporting
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LifecycleSummary {
    pub id: LifecycleId,
    pub state: PatternState,
    pub context: PatternContext,
}

#[derive(Debug, Clone)]
struct Slot {
    state: PatternState,
    context: PatternContext,
}

// ============================================================
// MACHINE
// ============================================================

#[derive(Debug, Clone)]
pub struct LifecycleMachine {
    /// `slots[i]` holds id `first + i`
    slots: VecDeque<Option<Slot>>,
    first: usize,
    tolerance: f64,
}

impl Default for LifecycleMachine {
    fn default() -> Self {
        Self::new(helpers::DEFAULT_TOLERANCE)
    }
}

impl LifecycleMachine {
    pub fn new(tolerance: f64) -> Self {
        Self {
            slots: VecDeque::new(),
            first: 0,
            tolerance,
        }
    }

    /// Start tracking a pattern at its first bar
    pub fn start<T: OHLCV>(&mut self, kind: PatternKind, first_code: ScenarioCode, index: usize, bar: &T) -> LifecycleId {
        let id = LifecycleId(self.first + self.slots.len());
        self.slots.push_back(Some(Slot {
            state: PatternState::Scanning,
            context: PatternContext {
                kind,
                codes: vec![first_code],
                start_index: index,
                inside_bar: None,
                direction: None,
                trigger: None,
                stop: None,
                targets: Vec::new(),
                trigger_time: None,
                entry_price: None,
                entry_time: None,
                exit_price: None,
                exit_time: None,
                last_high: bar.high(),
                last_low: bar.low(),
            },
        }));
        tracing::debug!(id = id.0, pattern = %kind, index, "tracking pattern");
        id
    }

    /// Feed the next bar of the pattern's window
    pub fn observe<T: OHLCV>(&mut self, id: LifecycleId, code: ScenarioCode, index: usize, bar: &T) -> Step {
        let tolerance = self.tolerance;
        let slot = match self.slot_mut(id) {
            Ok(slot) => slot,
            Err(step) => return step,
        };
        if !matches!(slot.state, PatternState::Scanning | PatternState::Pending) {
            return wrong_state(PatternState::Scanning, slot.state);
        }

        let from = slot.state;
        let ctx = &mut slot.context;
        let kind = ctx.kind;
        ctx.codes.push(code);
        let position = ctx.codes.len() - 1;

        let to = if kind.inside_position() == Some(position) {
            if code == ScenarioCode::Inside {
                ctx.inside_bar = Some((index, bar.high(), bar.low()));
                PatternState::Pending
            } else {
                PatternState::Failed
            }
        } else if ctx.codes.len() == kind.window() {
            match kind.match_codes(&ctx.codes) {
                Some(direction) => {
                    let (setup_high, setup_low) = (ctx.last_high, ctx.last_low);
                    let (trigger, stop) = match direction {
                        Direction::Bullish => (setup_high + tolerance, setup_low),
                        Direction::Bearish => (setup_low - tolerance, setup_high),
                    };
                    ctx.direction = Some(direction);
                    ctx.trigger = Some(trigger);
                    ctx.stop = Some(stop);
                    PatternState::Triggered
                },
                None => PatternState::Failed,
            }
        } else {
            from
        };

        ctx.last_high = bar.high();
        ctx.last_low = bar.low();
        transition(id, slot, to)
    }

    /// Replace the targets, keeping only those beyond the trigger, nearest first
    pub fn set_targets(&mut self, id: LifecycleId, targets: &[f64]) -> Step {
        let slot = match self.slot_mut(id) {
            Ok(slot) => slot,
            Err(step) => return step,
        };
        let (Some(direction), Some(trigger)) = (slot.context.direction, slot.context.trigger) else {
            return wrong_state(PatternState::Triggered, slot.state);
        };
        if slot.state.is_terminal() {
            return wrong_state(PatternState::Triggered, slot.state);
        }

        let sign = direction.sign();
        let mut kept: Vec<f64> = targets
            .iter()
            .copied()
            .filter(|t| t.is_finite() && (t - trigger) * sign > 0.0)
            .collect();
        kept.sort_by(|a, b| (a - trigger).abs().total_cmp(&(b - trigger).abs()));
        kept.dedup();
        slot.context.targets = kept;
        Step::Unchanged(slot.state)
    }

    /// Triggered -> InForce when the bar crosses the trigger
    pub fn check_trigger<T: OHLCV>(&mut self, id: LifecycleId, bar: &T) -> Step {
        let slot = match self.slot_mut(id) {
            Ok(slot) => slot,
            Err(step) => return step,
        };
        if slot.state != PatternState::Triggered {
            return wrong_state(PatternState::Triggered, slot.state);
        }
        let (Some(direction), Some(trigger)) = (slot.context.direction, slot.context.trigger) else {
            return Step::Unchanged(slot.state);
        };

        let crossed = match direction {
            Direction::Bullish => bar.high() >= trigger,
            Direction::Bearish => bar.low() <= trigger,
        };
        if !crossed {
            return Step::Unchanged(slot.state);
        }
        slot.context.trigger_time = Some(bar.timestamp());
        transition(id, slot, PatternState::InForce)
    }

    /// Triggered -> Failed when the bar reaches the stop before the trigger was crossed
    pub fn invalidate<T: OHLCV>(&mut self, id: LifecycleId, bar: &T) -> Step {
        let slot = match self.slot_mut(id) {
            Ok(slot) => slot,
            Err(step) => return step,
        };
        if slot.state != PatternState::Triggered {
            return wrong_state(PatternState::Triggered, slot.state);
        }
        let (Some(direction), Some(stop)) = (slot.context.direction, slot.context.stop) else {
            return Step::Unchanged(slot.state);
        };
        if stop_hit(direction, stop, bar) {
            transition(id, slot, PatternState::Failed)
        } else {
            Step::Unchanged(slot.state)
        }
    }

    /// InForce -> Entered at a confirmed fill
    pub fn enter(&mut self, id: LifecycleId, price: f64, time: DateTime<Utc>) -> Step {
        let slot = match self.slot_mut(id) {
            Ok(slot) => slot,
            Err(step) => return step,
        };
        if slot.state != PatternState::InForce {
            return wrong_state(PatternState::InForce, slot.state);
        }
        slot.context.entry_price = Some(price);
        slot.context.entry_time = Some(time);
        transition(id, slot, PatternState::Entered)
    }

    /// Entered -> Failed on the stop (checked first) or Complete on the nearest target
    pub fn check_exit<T: OHLCV>(&mut self, id: LifecycleId, bar: &T) -> Step {
        let slot = match self.slot_mut(id) {
            Ok(slot) => slot,
            Err(step) => return step,
        };
        if slot.state != PatternState::Entered {
            return wrong_state(PatternState::Entered, slot.state);
        }
        let Some(direction) = slot.context.direction else {
            return Step::Unchanged(slot.state);
        };

        if let Some(stop) = slot.context.stop {
            if stop_hit(direction, stop, bar) {
                slot.context.exit_price = Some(stop);
                slot.context.exit_time = Some(bar.timestamp());
                return transition(id, slot, PatternState::Failed);
            }
        }

        if let Some(&target) = slot.context.targets.first() {
            let reached = match direction {
                Direction::Bullish => bar.high() >= target,
                Direction::Bearish => bar.low() <= target,
            };
            if reached {
                slot.context.exit_price = Some(target);
                slot.context.exit_time = Some(bar.timestamp());
                return transition(id, slot, PatternState::Complete);
            }
        }

        Step::Unchanged(slot.state)
    }

    /// Replay a detected candidate's window; the result is Triggered unless
    /// the candidate's codes do not form its pattern.
    pub fn track_candidate<T: OHLCV>(&mut self, candidate: &PatternCandidate, bars: &[T]) -> Option<LifecycleId> {
        let start = candidate.start_index;
        let first = candidate.codes.first()?;
        let first_bar = bars.get(start)?;

        let id = self.start(candidate.kind, *first, start, first_bar);
        for (offset, &code) in candidate.codes.iter().enumerate().skip(1) {
            let bar = bars.get(start + offset)?;
            self.observe(id, code, start + offset, bar);
        }
        Some(id)
    }

    pub fn state(&self, id: LifecycleId) -> Option<PatternState> {
        self.slot(id).map(|s| s.state)
    }

    pub fn context(&self, id: LifecycleId) -> Option<&PatternContext> {
        self.slot(id).map(|s| &s.context)
    }

    pub fn summary(&self, id: LifecycleId) -> Option<LifecycleSummary> {
        self.slot(id).map(|slot| LifecycleSummary {
            id,
            state: slot.state,
            context: slot.context.clone(),
        })
    }

    /// Patterns not yet Complete or Failed
    pub fn active(&self) -> usize {
        self.slots.iter().flatten().filter(|s| !s.state.is_terminal()).count()
    }

    /// Patterns held in the arena, finished or not
    pub fn tracked(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Arena length, including freed slots behind the oldest live pattern
    pub fn capacity_used(&self) -> usize {
        self.slots.len()
    }

    /// Drop every finished pattern; returns how many were freed
    pub fn reap(&mut self) -> usize {
        let mut freed = 0;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|s| s.state.is_terminal()) {
                *slot = None;
                freed += 1;
            }
        }
        self.compact();
        freed
    }

    /// Stop tracking a pattern in whatever state it is in, returning its final snapshot
    pub fn release(&mut self, id: LifecycleId) -> Option<LifecycleSummary> {
        let index = id.0.checked_sub(self.first)?;
        let slot = self.slots.get_mut(index)?.take()?;
        if !slot.state.is_terminal() {
            tracing::debug!(id = id.0, pattern = %slot.context.kind, state = ?slot.state, "released open pattern");
        }
        self.compact();
        Some(LifecycleSummary {
            id,
            state: slot.state,
            context: slot.context,
        })
    }

    /// Forget every pattern. Ids keep counting up.
    pub fn clear(&mut self) {
        self.first += self.slots.len();
        self.slots.clear();
    }

    fn compact(&mut self) {
        while matches!(self.slots.front(), Some(None)) {
            self.slots.pop_front();
            self.first += 1;
        }
    }

    fn slot(&self, id: LifecycleId) -> Option<&Slot> {
        self.slots.get(id.0.checked_sub(self.first)?)?.as_ref()
    }

    fn slot_mut(&mut self, id: LifecycleId) -> std::result::Result<&mut Slot, Step> {
        let unknown = Step::NotApplicable(NotApplicable::UnknownPattern(id));
        let Some(index) = id.0.checked_sub(self.first) else {
            return Err(unknown);
        };
        self.slots.get_mut(index).and_then(Option::as_mut).ok_or(unknown)
    }
}

#[inline]
fn stop_hit<T: OHLCV>(direction: Direction, stop: f64, bar: &T) -> bool {
    match direction {
        Direction::Bullish => bar.low() <= stop,
        Direction::Bearish => bar.high() >= stop,
    }
}

#[inline]
fn wrong_state(expected: PatternState, actual: PatternState) -> Step {
    Step::NotApplicable(NotApplicable::WrongState { expected, actual })
}

fn transition(id: LifecycleId, slot: &mut Slot, to: PatternState) -> Step {
    let from = slot.state;
    if from == to {
        return Step::Unchanged(from);
    }
    slot.state = to;
    match to {
        PatternState::Complete | PatternState::Failed => {
            tracing::info!(id = id.0, pattern = %slot.context.kind, ?from, ?to, "pattern finished")
        },
        _ => tracing::debug!(id = id.0, pattern = %slot.context.kind, ?from, ?to, "pattern transition"),
    }
    Step::Transitioned { from, to }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;
    use chrono::{Duration, TimeZone};
    use crate::scenario::ScenarioCode::{Down, Inside, Outside, Up};

    fn bar(i: i64, h: f64, l: f64) -> Bar {
        let start = Utc.with_ymd_and_hms(2024, 2, 5, 0, 0, 0).unwrap();
        Bar::new(start + Duration::days(i), (h + l) / 2.0, h, l, (h + l) / 2.0, 1000.0)
    }

    /// 2U-1-2U through observe; trigger 101.01, stop 98
    fn triggered(m: &mut LifecycleMachine) -> LifecycleId {
        let id = m.start(PatternKind::TwoOneTwo, Up, 1, &bar(1, 103.0, 97.0));
        assert_eq!(
            m.observe(id, Inside, 2, &bar(2, 101.0, 98.0)),
            Step::Transitioned {
                from: PatternState::Scanning,
                to: PatternState::Pending
            }
        );
        assert_eq!(
            m.observe(id, Up, 3, &bar(3, 105.0, 98.0)),
            Step::Transitioned {
                from: PatternState::Pending,
                to: PatternState::Triggered
            }
        );
        id
    }

    #[test]
    fn full_sequence_resolves_levels() {
        let mut m = LifecycleMachine::default();
        let id = triggered(&mut m);
        let ctx = m.context(id).unwrap();
        assert_eq!(ctx.direction, Some(Direction::Bullish));
        assert!((ctx.trigger.unwrap() - 101.01).abs() < 1e-9);
        assert_eq!(ctx.stop, Some(98.0));
        assert_eq!(ctx.inside_bar, Some((2, 101.0, 98.0)));
    }

    #[test]
    fn trade_runs_to_target() {
        let mut m = LifecycleMachine::default();
        let id = triggered(&mut m);
        m.set_targets(id, &[110.0, 95.0, 107.01]);
        assert_eq!(m.context(id).unwrap().targets, vec![107.01, 110.0]);

        assert_eq!(m.check_trigger(id, &bar(3, 105.0, 98.0)).state(), Some(PatternState::InForce));
        assert_eq!(m.enter(id, 101.01, bar(3, 0.0, 0.0).timestamp).state(), Some(PatternState::Entered));
        assert_eq!(m.check_exit(id, &bar(4, 106.0, 100.0)), Step::Unchanged(PatternState::Entered));
        assert_eq!(m.check_exit(id, &bar(5, 108.0, 101.0)).state(), Some(PatternState::Complete));
        assert_eq!(m.context(id).unwrap().exit_price, Some(107.01));
    }

    #[test]
    fn stop_is_checked_before_target() {
        let mut m = LifecycleMachine::default();
        let id = triggered(&mut m);
        m.set_targets(id, &[107.01]);
        m.check_trigger(id, &bar(3, 105.0, 98.0));
        m.enter(id, 101.01, Utc::now());
        // Outside bar touches both levels
        assert_eq!(m.check_exit(id, &bar(4, 110.0, 97.0)).state(), Some(PatternState::Failed));
    }

    #[test]
    fn wrong_state_is_not_applicable_and_leaves_state() {
        let mut m = LifecycleMachine::default();
        let id = triggered(&mut m);
        let step = m.check_exit(id, &bar(4, 110.0, 90.0));
        assert_eq!(
            step,
            Step::NotApplicable(NotApplicable::WrongState {
                expected: PatternState::Entered,
                actual: PatternState::Triggered
            })
        );
        assert_eq!(m.state(id), Some(PatternState::Triggered));
        assert!(!m.enter(id, 101.0, Utc::now()).is_applicable());
    }

    #[test]
    fn broken_sequence_fails() {
        let mut m = LifecycleMachine::default();
        let id = m.start(PatternKind::TwoOneTwo, Up, 0, &bar(0, 103.0, 97.0));
        assert_eq!(m.observe(id, Down, 1, &bar(1, 102.0, 95.0)).state(), Some(PatternState::Failed));

        let id = m.start(PatternKind::ThreeTwoTwo, Outside, 0, &bar(0, 110.0, 90.0));
        m.observe(id, Up, 1, &bar(1, 112.0, 95.0));
        assert_eq!(m.observe(id, Down, 2, &bar(2, 111.0, 94.0)).state(), Some(PatternState::Failed));
    }

    #[test]
    fn untriggered_pattern_invalidated_by_stop() {
        let mut m = LifecycleMachine::default();
        let id = triggered(&mut m);
        assert_eq!(m.check_trigger(id, &bar(4, 100.0, 99.0)), Step::Unchanged(PatternState::Triggered));
        assert_eq!(m.invalidate(id, &bar(5, 100.0, 97.5)).state(), Some(PatternState::Failed));
    }

    #[test]
    fn reap_frees_terminal_slots_without_reusing_ids() {
        let mut m = LifecycleMachine::default();
        let done = m.start(PatternKind::TwoOneTwo, Up, 0, &bar(0, 103.0, 97.0));
        m.observe(done, Down, 1, &bar(1, 102.0, 95.0));
        let live = triggered(&mut m);

        assert_eq!(m.reap(), 1);
        assert_eq!(m.state(done), None);
        assert_eq!(m.active(), 1);
        assert_eq!(
            m.check_trigger(done, &bar(2, 200.0, 0.0)),
            Step::NotApplicable(NotApplicable::UnknownPattern(done))
        );
        let next = m.start(PatternKind::ThreeTwo, Outside, 5, &bar(5, 120.0, 80.0));
        assert!(next > live);
    }

    #[test]
    fn released_slots_are_compacted() {
        let mut m = LifecycleMachine::default();
        let first = triggered(&mut m);
        let second = triggered(&mut m);
        assert_eq!(m.capacity_used(), 2);

        // Releasing the newer one leaves a hole behind the older live pattern
        let summary = m.release(second).unwrap();
        assert_eq!(summary.state, PatternState::Triggered);
        assert_eq!(m.capacity_used(), 2);
        assert_eq!(m.tracked(), 1);
        assert!(m.release(second).is_none());

        m.release(first);
        assert_eq!(m.capacity_used(), 0);
        assert_eq!(m.tracked(), 0);
        assert_eq!(m.active(), 0);

        let third = triggered(&mut m);
        assert!(third > second);
        assert_eq!(m.state(third), Some(PatternState::Triggered));
        assert_eq!(m.state(first), None);
        assert!(!m.check_trigger(first, &bar(4, 200.0, 0.0)).is_applicable());
    }

    #[test]
    fn clear_keeps_ids_increasing() {
        let mut m = LifecycleMachine::default();
        let before = triggered(&mut m);
        m.clear();
        assert_eq!(m.state(before), None);
        let after = triggered(&mut m);
        assert!(after > before);
        assert_eq!(m.capacity_used(), 1);
    }
}
