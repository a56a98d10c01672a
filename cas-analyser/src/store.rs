//! Averaged-row store
//!
//! Append-only history of an estimator's output, one [`AveragedRow`] per
//! accumulated row, with two values that are revised after the fact:
//!
//! * whole-pull duration, set on both rows of a whole pull when its
//!   backstroke arrives;
//! * the in-changes flag, which is reclassified when a short run of rows
//!   turns out to be noise between two longer runs.
//!
//! Revisions are recorded against the store length at which they were made,
//! so a [`TouchStats`] snapshot reads them as they stood when it was taken.
//! All mutation and all reads happen under one lock.

use std::sync::{Arc, Mutex};

use cas_common::Row;
use tracing::trace;

use crate::averaged::{AveragedRow, StrikingThresholds};
use crate::stats::TouchStats;

/// Duration assumed for a first row with a single strike
const SINGLE_STRIKE_ROW_DURATION_MS: i64 = 1000;

/// A value with its revision history, keyed by store length
#[derive(Debug, Clone)]
struct Versioned<T> {
    history: Vec<(usize, T)>,
}

impl<T: Copy + PartialEq> Versioned<T> {
    fn new(version: usize, value: T) -> Self {
        Self {
            history: vec![(version, value)],
        }
    }

    fn current(&self) -> T {
        self.history[self.history.len() - 1].1
    }

    fn set(&mut self, version: usize, value: T) {
        if self.current() == value {
            return;
        }
        match self.history.last_mut() {
            Some(last) if last.0 == version => last.1 = value,
            _ => self.history.push((version, value)),
        }
    }

    fn as_of(&self, version: usize) -> T {
        self.history
            .iter()
            .rev()
            .find(|(v, _)| *v <= version)
            .map(|(_, value)| *value)
            .unwrap_or(self.history[0].1)
    }
}

#[derive(Debug)]
struct StoredRow {
    averaged: Arc<AveragedRow>,
    whole_pull_duration: Versioned<i64>,
    in_changes: Versioned<bool>,
    /// Rows before this one with the same naive classification
    in_changes_count: usize,
}

impl StoredRow {
    fn estimate_as_of(&self, version: usize) -> RowEstimate {
        RowEstimate {
            averaged: Arc::clone(&self.averaged),
            whole_pull_duration: self.whole_pull_duration.as_of(version),
            in_changes: self.in_changes.as_of(version),
            in_changes_count: self.in_changes_count,
        }
    }
}

/// One stored estimate with its revisable values resolved
#[derive(Debug, Clone)]
pub struct RowEstimate {
    pub averaged: Arc<AveragedRow>,
    /// Handstroke plus backstroke duration; 0 until the backstroke is known
    pub whole_pull_duration: i64,
    /// Row counts as part of the touch rather than rounds
    pub in_changes: bool,
    /// Length of the same-classification run before this row
    pub in_changes_count: usize,
}

#[derive(Debug, Default)]
struct StoreInner {
    rows: Vec<StoredRow>,
    n_bells: usize,
}

/// Append-only store of averaged rows
#[derive(Debug)]
pub struct AveragedRowStore {
    inner: Mutex<StoreInner>,
    in_changes_sensitivity: usize,
    thresholds: StrikingThresholds,
}

impl AveragedRowStore {
    pub fn new(in_changes_sensitivity: usize, thresholds: StrikingThresholds) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            in_changes_sensitivity: in_changes_sensitivity.max(1),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> StrikingThresholds {
        self.thresholds
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest bell number over all stored rows
    pub fn n_bells(&self) -> usize {
        self.inner.lock().unwrap().n_bells
    }

    /// Append an estimate, deriving its duration from the previous row end
    ///
    /// The first row has no previous end; its duration is its own span plus
    /// `1 + handstroke_gap` average gaps (a handstroke lead-in).
    pub fn add_row(&self, row: Arc<Row>, end_time: i64, handstroke_gap: f64) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let duration = match inner.rows.last() {
            Some(prev) => end_time - prev.averaged.end_time(),
            None if row.len() > 1 => {
                let span = row.duration();
                span + ((1.0 + handstroke_gap) * span as f64 / (row.len() - 1) as f64) as i64
            }
            None => SINGLE_STRIKE_ROW_DURATION_MS,
        };
        self.append(&mut inner, row, end_time, handstroke_gap, duration)
    }

    /// Append an estimate with an explicit duration; returns the new length
    pub fn add_row_with_duration(
        &self,
        row: Arc<Row>,
        end_time: i64,
        handstroke_gap: f64,
        duration: i64,
    ) -> usize {
        let mut inner = self.inner.lock().unwrap();
        self.append(&mut inner, row, end_time, handstroke_gap, duration)
    }

    fn append(
        &self,
        inner: &mut StoreInner,
        row: Arc<Row>,
        end_time: i64,
        handstroke_gap: f64,
        duration: i64,
    ) -> usize {
        let averaged = Arc::new(AveragedRow::new(
            row,
            end_time,
            handstroke_gap,
            duration,
            self.thresholds,
        ));
        let n = inner.rows.len() + 1;
        inner.n_bells = inner.n_bells.max(averaged.n_bells());

        // At each backstroke, the whole pull is the pair's combined duration
        let mut whole_pull = 0;
        if !averaged.is_handstroke() {
            whole_pull = averaged.duration();
            if let Some(hand) = inner.rows.last_mut() {
                whole_pull += hand.averaged.duration();
                hand.whole_pull_duration.set(n, whole_pull);
            }
        }

        // Naively, a row is in changes if it isn't close to rounds
        let in_changes = !averaged.is_close_to_rounds();
        let mut count = 0;
        if let Some(prev) = inner.rows.last() {
            if prev.in_changes.current() == in_changes {
                count = prev.in_changes_count + 1;
            }
        }

        inner.rows.push(StoredRow {
            averaged,
            whole_pull_duration: Versioned::new(n, whole_pull),
            in_changes: Versioned::new(n, in_changes),
            in_changes_count: count,
        });

        if count >= self.in_changes_sensitivity {
            let end = n as isize - count as isize - 2;
            self.reclassify_short_runs(&mut inner.rows, in_changes, end, n);
        }
        n
    }

    /// Relabel short runs ending at `end` (and any short runs before them) to
    /// match the now-certain current run
    ///
    /// Stops at the first run that reached the sensitivity; if the current run
    /// is in changes, that run's last row is marked in changes too, so the
    /// transition row counts as part of the touch. The first row of the store
    /// is never relabelled.
    fn reclassify_short_runs(
        &self,
        rows: &mut [StoredRow],
        in_changes: bool,
        mut end: isize,
        version: usize,
    ) {
        while end > 0 {
            let e = end as usize;
            let prev_count = rows[e].in_changes_count;
            if prev_count < self.in_changes_sensitivity {
                for row in &mut rows[e.saturating_sub(prev_count)..=e] {
                    row.in_changes.set(version, in_changes);
                }
                trace!(
                    "Reclassified rows {}..={} as in_changes={}",
                    e.saturating_sub(prev_count) + 1,
                    e + 1,
                    in_changes
                );
                end -= prev_count as isize + 1;
            } else {
                if in_changes {
                    rows[e].in_changes.set(version, true);
                }
                break;
            }
        }
    }

    /// Current state of the estimate at `index`
    pub fn estimate(&self, index: usize) -> Option<RowEstimate> {
        let inner = self.inner.lock().unwrap();
        let version = inner.rows.len();
        inner.rows.get(index).map(|r| r.estimate_as_of(version))
    }

    /// Estimate at `index` as it stood when the store held `version` rows
    pub fn estimate_as_of(&self, index: usize, version: usize) -> Option<RowEstimate> {
        if index >= version {
            return None;
        }
        let inner = self.inner.lock().unwrap();
        inner.rows.get(index).map(|r| r.estimate_as_of(version))
    }

    /// The first `version` estimates as they stood at that length
    pub fn estimates_as_of(&self, version: usize) -> Vec<RowEstimate> {
        let inner = self.inner.lock().unwrap();
        inner
            .rows
            .iter()
            .take(version)
            .map(|r| r.estimate_as_of(version))
            .collect()
    }

    /// Point-in-time statistics over the rows stored so far
    pub fn snapshot(self: &Arc<Self>) -> TouchStats {
        let (n_rows, n_bells) = {
            let inner = self.inner.lock().unwrap();
            (inner.rows.len(), inner.n_bells)
        };
        TouchStats::new(Arc::clone(self), n_rows, n_bells)
    }
}
