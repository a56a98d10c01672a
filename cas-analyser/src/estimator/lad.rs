//! Least-absolute-deviation line fit

use std::sync::Arc;

use cas_common::Row;

use super::{EstimateSink, Estimator};

/// Fits each row to the evenly spaced line that minimises total absolute
/// deviation, trying the line through every pair of strikes
///
/// Robust to one or two badly struck bells, which barely move the fit.
pub struct LeastAbsoluteDeviation {
    handstroke_gap: f64,
}

impl LeastAbsoluteDeviation {
    pub fn new(handstroke_gap: f64) -> Self {
        Self { handstroke_gap }
    }

    /// Best `(start, gap)` for `times`; the first strike with no gap when
    /// there are no pairs
    fn fit(times: &[i64]) -> (i64, i64) {
        let Some(&first) = times.first() else {
            return (0, 0);
        };
        let mut best = (first, 0);
        let mut best_deviation = i64::MAX;
        for i in 0..times.len() {
            for j in i + 1..times.len() {
                let gap = (times[j] - times[i]) / (j - i) as i64;
                let start = times[i] - i as i64 * gap;
                let deviation: i64 = times
                    .iter()
                    .enumerate()
                    .map(|(k, &t)| (t - (start + k as i64 * gap)).abs())
                    .sum();
                if deviation < best_deviation {
                    best_deviation = deviation;
                    best = (start, gap);
                }
            }
        }
        best
    }
}

impl Estimator for LeastAbsoluteDeviation {
    fn name(&self) -> &str {
        "Simple LAD Visualiser"
    }

    fn info(&self) -> String {
        format!(
            "The LAD visualiser fits a straight line through each row's strikes, choosing the \
             line through two of the strikes that gives the least total absolute deviation. \
             Handstroke gap is a constant {}.",
            self.handstroke_gap
        )
    }

    fn new_row(&mut self, row: Arc<Row>, sink: &mut EstimateSink<'_>) {
        if row.is_empty() {
            return;
        }
        let times: Vec<i64> = row.iter().map(|b| b.time).collect();
        let (start, gap) = Self::fit(&times);
        let end = start + (times.len() as i64 - 1) * gap;
        let mut row_start = start - gap;
        if row.is_handstroke() {
            row_start -= (gap as f64 * self.handstroke_gap) as i64;
        }
        sink.add_row_with_duration(row, end, self.handstroke_gap, end - row_start);
    }
}
