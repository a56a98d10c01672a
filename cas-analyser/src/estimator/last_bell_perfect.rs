//! The last bell of each row defines the row end

use std::sync::Arc;

use cas_common::Row;

use super::{EstimateSink, Estimator};

/// Assumes the last bell in every row strikes perfectly
pub struct LastBellPerfect {
    handstroke_gap: f64,
}

impl LastBellPerfect {
    pub fn new(handstroke_gap: f64) -> Self {
        Self { handstroke_gap }
    }
}

impl Estimator for LastBellPerfect {
    fn name(&self) -> &str {
        "Last Bell Perfect"
    }

    fn info(&self) -> String {
        format!(
            "The Last Bell Perfect visualiser assumes the last bell in each row strikes at \
             exactly the right time, and spaces the rest of the row evenly back to the end of \
             the previous row. Handstroke gap is a constant {}.",
            self.handstroke_gap
        )
    }

    fn new_row(&mut self, row: Arc<Row>, sink: &mut EstimateSink<'_>) {
        if let Some(end) = row.last_strike_time() {
            sink.add_row(row, end, self.handstroke_gap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_row_ends_on_last_strike() {
        let mut rows = perfect_rows(2, 4, 250);
        let late = rows[1].pop().unwrap();
        rows[1].push(cas_common::Bong::new(late.bell, late.time + 100, late.stroke));

        let store = run(Box::new(LastBellPerfect::new(1.0)), rows);
        let hand = store.estimate(0).unwrap();
        assert_eq!(hand.averaged.end_time(), 750);
        // Span 750 plus two gaps
        assert_eq!(hand.averaged.duration(), 1250);

        let back = store.estimate(1).unwrap();
        assert_eq!(back.averaged.end_time(), 1850);
        assert_eq!(back.averaged.duration(), 1100);
        assert_eq!(back.averaged.lateness(4), 0);
    }
}
