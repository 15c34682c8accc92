//! Bounded memory of recently emitted candidates
//!
//! Overlapping windows and repeated runs over the same bars can produce the
//! same candidate more than once. The deduplicator remembers the last
//! `capacity` fingerprints and evicts the oldest first.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::{
    detectors::{PatternCandidate, PatternKind},
    Direction,
};

pub const DEFAULT_DEDUP_CAPACITY: usize = 50;

/// Identity of a candidate: pattern, trigger time, levels rounded to cents, direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub kind: PatternKind,
    pub timestamp: DateTime<Utc>,
    pub trigger_cents: i64,
    pub stop_cents: i64,
    pub target_cents: i64,
    pub direction: Direction,
}

#[inline]
fn cents(price: f64) -> i64 {
    (price * 100.0).round() as i64
}

impl Fingerprint {
    pub fn of(candidate: &PatternCandidate) -> Self {
        Self {
            kind: candidate.kind,
            timestamp: candidate.timestamp,
            trigger_cents: cents(candidate.trigger),
            stop_cents: cents(candidate.stop),
            target_cents: cents(candidate.target),
            direction: candidate.direction,
        }
    }
}

/// FIFO ring of fingerprints
#[derive(Debug, Clone)]
pub struct Deduplicator {
    seen: VecDeque<Fingerprint>,
    capacity: usize,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl Deduplicator {
    /// `capacity` is clamped to at least 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// True if an identical candidate is still remembered. Otherwise the
    /// candidate is remembered and `false` is returned.
    pub fn is_duplicate(&mut self, candidate: &PatternCandidate) -> bool {
        let fingerprint = Fingerprint::of(candidate);
        if self.seen.contains(&fingerprint) {
            return true;
        }
        if self.seen.len() == self.capacity {
            self.seen.pop_front();
        }
        self.seen.push_back(fingerprint);
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
