//! Row accumulation
//!
//! Terminal stage of the correction chain. Groups the corrected, stroke-tagged
//! strike stream into completed rows and appends them to a [`RowStore`],
//! which the estimators later read by index.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cas_common::{Bong, Row, Stroke};
use tracing::{debug, warn};

use crate::correction::TwoRowWindow;

/// Pull-based access to a growing sequence of rows
pub trait RowSource: Send + Sync {
    /// Rows available through this source
    fn n_rows(&self) -> usize;

    fn row(&self, index: usize) -> Option<Arc<Row>>;

    /// Largest bell number seen so far
    fn n_bells(&self) -> usize;
}

/// Append-only store of completed rows
#[derive(Debug, Default)]
pub struct RowStore {
    rows: Mutex<Vec<Arc<Row>>>,
    n_bells: AtomicUsize,
}

impl RowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed row, returning the new row count
    pub fn append(&self, row: Row) -> usize {
        self.n_bells.fetch_max(row.n_bells(), Ordering::AcqRel);
        let mut rows = self.rows.lock().unwrap();
        rows.push(Arc::new(row));
        rows.len()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all rows currently stored
    pub fn rows(&self) -> Vec<Arc<Row>> {
        self.rows.lock().unwrap().clone()
    }

    /// View of the first `n_rows` rows
    pub fn prefix(self: &Arc<Self>, n_rows: usize) -> RowPrefix {
        RowPrefix {
            store: Arc::clone(self),
            n_rows,
        }
    }
}

impl RowSource for RowStore {
    fn n_rows(&self) -> usize {
        self.len()
    }

    fn row(&self, index: usize) -> Option<Arc<Row>> {
        self.rows.lock().unwrap().get(index).cloned()
    }

    fn n_bells(&self) -> usize {
        self.n_bells.load(Ordering::Acquire)
    }
}

/// Fixed-length view of a [`RowStore`]
///
/// Handed to estimator jobs so a job sees the row count that was announced
/// when it was submitted.
#[derive(Debug, Clone)]
pub struct RowPrefix {
    store: Arc<RowStore>,
    n_rows: usize,
}

impl RowSource for RowPrefix {
    fn n_rows(&self) -> usize {
        self.n_rows
    }

    fn row(&self, index: usize) -> Option<Arc<Row>> {
        if index < self.n_rows {
            self.store.row(index)
        } else {
            None
        }
    }

    fn n_bells(&self) -> usize {
        self.store.n_bells()
    }
}

/// Groups corrected strikes into rows
///
/// A row closes when the stroke changes. A second strike of a bell with the
/// same stroke tag is an anomaly: it is logged and dropped. Strikes with no
/// stroke tag join the row being filled unless that bell is already in it,
/// in which case they start the next row.
pub struct RowAccumulator {
    window: TwoRowWindow,
    store: Arc<RowStore>,
}

impl RowAccumulator {
    pub fn new(store: Arc<RowStore>) -> Self {
        Self {
            window: TwoRowWindow::new(true),
            store,
        }
    }

    pub fn store(&self) -> &Arc<RowStore> {
        &self.store
    }

    /// Add one strike; returns the new row count if a row was completed
    pub fn push(&mut self, bong: Bong) -> Option<usize> {
        if bong.stroke == Stroke::Unknown {
            return self.push_untagged(bong);
        }

        // Until the second row starts, fill the first
        if self.window.next.is_empty() && self.window.current.matches_stroke(&bong) {
            Self::add_or_warn(&mut self.window.current, bong, self.store.len() + 1);
            return None;
        }
        if self.window.next.matches_stroke(&bong) {
            Self::add_or_warn(&mut self.window.next, bong, self.store.len() + 2);
            return None;
        }

        let published = self.finish_row();
        self.window.next.push(bong);
        published
    }

    fn push_untagged(&mut self, bong: Bong) -> Option<usize> {
        let filling = if self.window.next.is_empty() {
            &mut self.window.current
        } else {
            &mut self.window.next
        };
        if !filling.contains_bell(bong.bell) {
            filling.push(bong);
            return None;
        }

        if self.window.next.is_empty() {
            self.window.next.push(bong);
            return None;
        }
        let published = self.finish_row();
        self.window.next.push(bong);
        published
    }

    fn add_or_warn(row: &mut Row, bong: Bong, row_number: usize) {
        if row.contains_bell(bong.bell) {
            warn!(
                "Bell {} sounded twice in row {}; ignoring second strike at {}ms",
                bong.bell, row_number, bong.time
            );
        } else {
            row.push(bong);
        }
    }

    fn finish_row(&mut self) -> Option<usize> {
        let row = self.window.finish_row();
        self.publish(row)
    }

    fn publish(&self, row: Row) -> Option<usize> {
        if row.is_empty() {
            return None;
        }
        debug!("Row {}: {}", self.store.len() + 1, row);
        Some(self.store.append(row))
    }

    /// End of input: store the rows still buffered and return the final count
    ///
    /// A trailing handstroke row is dropped, as statistics work on whole pulls.
    pub fn finish(&mut self) -> usize {
        let current = std::mem::replace(&mut self.window.current, Row::new(true));
        let next = std::mem::replace(&mut self.window.next, Row::new(false));

        self.publish(current);
        if next.is_handstroke() {
            if !next.is_empty() {
                debug!("Dropping final handstroke row {}", next);
            }
        } else {
            self.publish(next);
        }
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulate(strikes: &[(u8, i64, Stroke)]) -> Vec<Arc<Row>> {
        let store = Arc::new(RowStore::new());
        let mut acc = RowAccumulator::new(Arc::clone(&store));
        for &(bell, time, stroke) in strikes {
            acc.push(Bong::new(bell, time, stroke));
        }
        acc.finish();
        store.rows()
    }

    fn whole_pulls(n: usize, bells: u8) -> Vec<(u8, i64, Stroke)> {
        let mut out = Vec::new();
        for row in 0..n * 2 {
            let stroke = if row % 2 == 0 { Stroke::Hand } else { Stroke::Back };
            for bell in 1..=bells {
                out.push((bell, (row as i64) * 1000 + bell as i64 * 150, stroke));
            }
        }
        out
    }

    #[test]
    fn test_rows_close_on_stroke_change() {
        let rows = accumulate(&whole_pulls(2, 5));
        assert_eq!(rows.len(), 4);
        assert!(rows[0].is_handstroke());
        assert!(!rows[1].is_handstroke());
        assert!(rows.iter().all(|r| r.len() == 5));
    }

    #[test]
    fn test_push_reports_row_count() {
        let store = Arc::new(RowStore::new());
        let mut acc = RowAccumulator::new(Arc::clone(&store));
        let mut published = Vec::new();
        for (bell, time, stroke) in whole_pulls(2, 3) {
            if let Some(n) = acc.push(Bong::new(bell, time, stroke)) {
                published.push(n);
            }
        }
        // Row one completes when row three starts, row two when row four starts
        assert_eq!(published, vec![1, 2]);
        assert_eq!(acc.finish(), 4);
        assert_eq!(store.n_bells(), 3);
    }

    #[test]
    fn test_duplicate_bell_dropped() {
        let mut strikes = whole_pulls(1, 4);
        strikes.insert(2, (2, 260, Stroke::Hand));
        let rows = accumulate(&strikes);
        assert_eq!(rows[0].len(), 4);
        assert_eq!(rows[0].strike_time(2), Some(300));
    }

    #[test]
    fn test_trailing_handstroke_dropped() {
        let mut strikes = whole_pulls(1, 4);
        strikes.extend((1..=4).map(|bell| (bell, 2000 + bell as i64 * 150, Stroke::Hand)));
        let rows = accumulate(&strikes);
        assert_eq!(rows.len(), 2);
        assert!(!rows[1].is_handstroke());
    }

    #[test]
    fn test_untagged_strikes_split_on_repeat() {
        let strikes: Vec<(u8, i64, Stroke)> = [1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3]
            .iter()
            .enumerate()
            .map(|(i, &bell)| (bell, i as i64 * 200, Stroke::Unknown))
            .collect();
        let rows = accumulate(&strikes);
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.notation() == "123"));
    }

    #[test]
    fn test_row_prefix_is_fixed_length() {
        let store = Arc::new(RowStore::new());
        store.append(Row::from_bongs(true, [Bong::new(1, 0, Stroke::Hand)]));
        let prefix = store.prefix(1);
        store.append(Row::from_bongs(false, [Bong::new(1, 500, Stroke::Back)]));

        assert_eq!(prefix.n_rows(), 1);
        assert!(prefix.row(1).is_none());
        assert_eq!(store.n_rows(), 2);
    }
}
