//! Running-average estimator

use std::sync::Arc;

use cas_common::Row;

use super::{EstimateSink, Estimator};

/// Ideal row length is the mean of the measured length and the running
/// average for that stroke
///
/// The measured length runs from the previous ideal row end to this row's
/// last strike. The first row is assumed to start two average gaps before
/// its lead (one gap plus a nominal handstroke gap).
pub struct SimpleAverager {
    handstroke_gap: f64,
    previous_end: Option<i64>,
    /// Running duration per stroke: handstroke, backstroke
    average_duration: [i64; 2],
}

impl SimpleAverager {
    pub fn new(handstroke_gap: f64) -> Self {
        Self {
            handstroke_gap,
            previous_end: None,
            average_duration: [0; 2],
        }
    }
}

impl Estimator for SimpleAverager {
    fn name(&self) -> &str {
        "Simple Averager"
    }

    fn info(&self) -> String {
        format!(
            "The Simple Averager takes each row's length as the mean of its measured length \
             and the running average length of rows at the same stroke, ending the row there. \
             Handstroke gap is a constant {}.",
            self.handstroke_gap
        )
    }

    fn new_row(&mut self, row: Arc<Row>, sink: &mut EstimateSink<'_>) {
        let (Some(first), Some(last)) = (row.first_strike_time(), row.last_strike_time()) else {
            return;
        };
        let n_bells = row.n_bells() as i64;
        let average_gap = if n_bells > 1 { (last - first) / (n_bells - 1) } else { 0 };
        let previous_end = self.previous_end.unwrap_or(first - 2 * average_gap);

        let measured = last - previous_end;
        let stroke = usize::from(!row.is_handstroke());
        let mut running = self.average_duration[stroke];
        if running <= 0 {
            running = measured;
        }
        let duration = (running + measured) / 2;
        let end = previous_end + duration;

        self.average_duration[stroke] = duration;
        self.previous_end = Some(end);
        sink.add_row_with_duration(row, end, self.handstroke_gap, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use cas_common::{Bong, Stroke};

    #[test]
    fn test_perfect_ringing_has_no_error() {
        let store = run(Box::new(SimpleAverager::new(1.0)), perfect_rows(8, 6, 200));
        for i in 0..8 {
            let estimate = store.estimate(i).unwrap();
            assert_eq!(estimate.averaged.variance(), 0.0, "row {}", i);
        }
        let first = store.estimate(0).unwrap();
        assert_eq!(first.averaged.end_time(), 1000);
        assert_eq!(first.averaged.duration(), 1400);
    }

    #[test]
    fn test_slow_row_is_averaged() {
        let mut rows = perfect_rows(4, 6, 200);
        // Third row (handstroke) rung 120ms slow overall
        let slow: Vec<Bong> = rows[2]
            .iter()
            .enumerate()
            .map(|(i, b)| Bong::new(b.bell, b.time + 20 * (i as i64 + 1), Stroke::Hand))
            .collect();
        rows[2] = Row::from_bongs(true, slow);

        let store = run(Box::new(SimpleAverager::new(1.0)), rows);
        let estimate = store.estimate(2).unwrap();
        // Measured 1520, running 1400
        assert_eq!(estimate.averaged.duration(), 1460);
        assert_eq!(estimate.averaged.end_time(), 2200 + 1460);
    }
}
