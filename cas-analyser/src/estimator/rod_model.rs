//! Whole-pull midpoint model
//!
//! Keeps a sliding window of three whole pulls. The ideal whole-pull length
//! is the average advance of the whole-pull midpoints (mean strike time of
//! both rows) across the window, which gives the ideal inter-bell gap once
//! the handstroke gap is taken out. Each whole pull is placed about its own
//! midpoint, so estimates trail the input by one whole pull until the last
//! row is rung.

use std::sync::Arc;

use cas_common::Row;
use tracing::debug;

use super::{EstimateSink, Estimator};

const WHOLE_PULLS: usize = 3;
const WINDOW_ROWS: usize = WHOLE_PULLS * 2;

/// Handstroke gap measured from the rows seen so far
///
/// Mean gap into each handstroke over the mean per-row inter-bell gap, less
/// the one ordinary gap it contains. The result is in the same units as a
/// constant handstroke gap, so a lead gap of three inter-bell gaps measures 2.
#[derive(Debug, Default)]
struct RunningHandstrokeGap {
    previous: Option<Arc<Row>>,
    total_interbell_gap: f64,
    interbell_rows: usize,
    total_lead_gap: f64,
    lead_gaps: usize,
}

impl RunningHandstrokeGap {
    fn observe(&mut self, row: &Arc<Row>) {
        if let (Some(first), Some(last)) = (row.first_strike_time(), row.last_strike_time()) {
            if row.len() > 1 {
                self.total_interbell_gap += ((last - first) / (row.len() as i64 - 1)) as f64;
                self.interbell_rows += 1;
            }
            if row.is_handstroke() {
                if let Some(prev_last) = self.previous.as_ref().and_then(|p| p.last_strike_time()) {
                    self.total_lead_gap += (first - prev_last) as f64;
                    self.lead_gaps += 1;
                }
            }
        }
        self.previous = Some(Arc::clone(row));
    }

    fn ratio(&self) -> f64 {
        if self.lead_gaps == 0 || self.total_interbell_gap <= 0.0 {
            return 0.0;
        }
        let mean_lead = self.total_lead_gap / self.lead_gaps as f64;
        let mean_interbell = self.total_interbell_gap / self.interbell_rows as f64;
        (mean_lead / mean_interbell - 1.0).max(0.0)
    }
}

#[derive(Debug)]
enum HandstrokeGap {
    Constant(f64),
    Running(RunningHandstrokeGap),
}

/// Rod model estimator, with a constant or a measured handstroke gap
pub struct RodModel {
    handstroke_gap: HandstrokeGap,
    window: Vec<Arc<Row>>,
    /// Window index of the next whole pull to emit
    empty: usize,
    interbell_gap: f64,
}

impl RodModel {
    /// Handstroke gap fixed at `handstroke_gap` inter-bell gaps
    pub fn constant(handstroke_gap: f64) -> Self {
        Self::with_gap(HandstrokeGap::Constant(handstroke_gap))
    }

    /// Handstroke gap taken from the ringing so far
    pub fn running() -> Self {
        Self::with_gap(HandstrokeGap::Running(RunningHandstrokeGap::default()))
    }

    fn with_gap(handstroke_gap: HandstrokeGap) -> Self {
        Self {
            handstroke_gap,
            window: Vec::with_capacity(WINDOW_ROWS),
            empty: 0,
            interbell_gap: 0.0,
        }
    }

    fn current_handstroke_gap(&self) -> f64 {
        match &self.handstroke_gap {
            HandstrokeGap::Constant(gap) => *gap,
            HandstrokeGap::Running(running) => running.ratio(),
        }
    }

    /// Mean strike time over the whole pull starting at window index `start`
    fn midpoint(&self, start: usize) -> f64 {
        let (sum, count) = self.window[start..]
            .iter()
            .take(2)
            .flat_map(|row| row.iter())
            .fold((0.0, 0usize), |(s, c), b| (s + b.time as f64, c + 1));
        if count > 0 {
            sum / count as f64
        } else {
            0.0
        }
    }

    /// Mean measured gap over the window, for when it never filled
    fn measured_interbell_gap(&self) -> f64 {
        let gaps: Vec<f64> = self
            .window
            .iter()
            .filter(|row| row.len() > 1)
            .map(|row| row.duration() as f64 / (row.len() - 1) as f64)
            .collect();
        if gaps.is_empty() {
            0.0
        } else {
            gaps.iter().sum::<f64>() / gaps.len() as f64
        }
    }

    fn row_duration(row: &Row, gap: f64, handstroke_gap: f64) -> i64 {
        let duration = (gap * row.n_bells() as f64) as i64;
        if row.is_handstroke() {
            (duration as f64 + handstroke_gap * gap) as i64
        } else {
            duration
        }
    }

    fn emit_whole_pull(&self, sink: &mut EstimateSink<'_>) {
        let gap = self.interbell_gap;
        let handstroke_gap = self.current_handstroke_gap();
        let n_bells = sink.n_bells() as f64;

        // Handstroke ends half a gap before the whole-pull midpoint
        let hand = &self.window[self.empty];
        let end = (self.midpoint(self.empty) - 0.5 * gap) as i64;
        sink.add_row_with_duration(
            Arc::clone(hand),
            end,
            handstroke_gap,
            Self::row_duration(hand, gap, handstroke_gap),
        );

        if let Some(back) = self.window.get(self.empty + 1) {
            let end = (end as f64 + n_bells * gap) as i64;
            sink.add_row_with_duration(
                Arc::clone(back),
                end,
                handstroke_gap,
                Self::row_duration(back, gap, handstroke_gap),
            );
        }
    }
}

impl Estimator for RodModel {
    fn name(&self) -> &str {
        match self.handstroke_gap {
            HandstrokeGap::Constant(_) => "RodModel5",
            HandstrokeGap::Running(_) => "RodModel2",
        }
    }

    fn info(&self) -> String {
        let base = format!(
            "The {} visualiser calculates the desired length of a whole pull, minus handstroke \
             gap, by averaging the advance of the midpoint of the bells striking in each whole \
             pull over a window of {} whole pulls.",
            self.name(),
            WHOLE_PULLS
        );
        match self.handstroke_gap {
            HandstrokeGap::Constant(gap) => format!("{} Handstroke gap is a constant {}.", base, gap),
            HandstrokeGap::Running(_) => {
                format!("{} Handstroke gap is the average gap for the ringing so far.", base)
            }
        }
    }

    fn new_row(&mut self, row: Arc<Row>, sink: &mut EstimateSink<'_>) {
        if let HandstrokeGap::Running(running) = &mut self.handstroke_gap {
            running.observe(&row);
        }
        self.window.push(row);
        if self.window.len() < WINDOW_ROWS {
            return;
        }

        let whole_pull =
            (self.midpoint(WINDOW_ROWS - 2) - self.midpoint(0)) / (WHOLE_PULLS - 1) as f64;
        self.interbell_gap =
            whole_pull / (self.current_handstroke_gap() + 2.0 * sink.n_bells() as f64);

        // First fill emits the first two whole pulls, later ones only the middle
        while self.empty <= (WINDOW_ROWS / 4) * 2 {
            self.emit_whole_pull(sink);
            self.empty += 2;
        }
        self.empty -= 2;
        self.window.drain(..2);
    }

    fn flush(&mut self, sink: &mut EstimateSink<'_>) {
        if self.interbell_gap <= 0.0 {
            self.interbell_gap = self.measured_interbell_gap();
            debug!(
                "Fewer than {} rows; using measured gap {:.1}ms",
                WINDOW_ROWS, self.interbell_gap
            );
        }
        while self.empty < self.window.len() {
            self.emit_whole_pull(sink);
            self.empty += 2;
        }
        self.window.clear();
        self.empty = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::EstimateSink;
    use super::*;
    use crate::averaged::StrikingThresholds;
    use crate::store::AveragedRowStore;
    use cas_common::{Bong, Stroke};

    #[test]
    fn test_estimates_trail_by_one_whole_pull() {
        let store = AveragedRowStore::new(1, StrikingThresholds::default());
        let listener = RecordingListener::default();
        let mut sink = EstimateSink::new("rod", &store, &listener, 6);
        let mut rod = RodModel::constant(1.0);

        let mut lengths = Vec::new();
        for row in perfect_rows(8, 6, 200) {
            rod.new_row(Arc::new(row), &mut sink);
            lengths.push(store.len());
        }
        assert_eq!(lengths, vec![0, 0, 0, 0, 0, 4, 4, 6]);

        rod.flush(&mut sink);
        assert_eq!(store.len(), 8);
        assert_eq!(*listener.estimates.lock().unwrap(), (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_perfect_ringing_fits_exactly() {
        for estimator in [RodModel::constant(1.0), RodModel::running()] {
            let store = run(Box::new(estimator), perfect_rows(10, 6, 200));
            for i in 0..10 {
                let estimate = store.estimate(i).unwrap();
                assert_eq!(estimate.averaged.variance(), 0.0, "row {}", i);
            }
            let hand = store.estimate(2).unwrap();
            assert_eq!(hand.averaged.end_time(), 3600);
            assert_eq!(hand.averaged.duration(), 1400);
            assert_eq!(store.estimate(3).unwrap().averaged.duration(), 1200);
        }
    }

    #[test]
    fn test_running_gap_measured() {
        let mut running = RunningHandstrokeGap::default();
        assert_eq!(running.ratio(), 0.0);
        for row in perfect_rows(4, 6, 200) {
            running.observe(&Arc::new(row));
        }
        assert!((running.ratio() - 1.0).abs() < 1e-9);
    }

    /// Rows `gap` apart with `lead` ms between a backstroke and the next handstroke
    fn rows_with_lead(n_rows: usize, bells: u8, gap: i64, lead: i64) -> Vec<Row> {
        let mut rows = Vec::new();
        let mut t = 0;
        for i in 0..n_rows {
            let handstroke = i % 2 == 0;
            if i > 0 {
                t += if handstroke { lead } else { gap };
            }
            let stroke = Stroke::from_handstroke(handstroke);
            let mut row = Row::new(handstroke);
            for bell in 1..=bells {
                if bell > 1 {
                    t += gap;
                }
                row.push(Bong::new(bell, t, stroke));
            }
            rows.push(row);
        }
        rows
    }

    #[test]
    fn test_running_gap_at_wide_lead() {
        let mut running = RunningHandstrokeGap::default();
        let rows = rows_with_lead(6, 6, 200, 600);
        assert_eq!(rows[2].first_strike_time(), Some(2800));
        for row in rows {
            running.observe(&Arc::new(row));
        }
        // 600ms lead is two gaps more than the 200ms row gap
        assert!((running.ratio() - 2.0).abs() < 1e-9);

        let mut narrow = RunningHandstrokeGap::default();
        for row in rows_with_lead(6, 6, 200, 200) {
            narrow.observe(&Arc::new(row));
        }
        assert_eq!(narrow.ratio(), 0.0);
    }

    #[test]
    fn test_running_gap_fits_wide_lead_exactly() {
        let store = run(Box::new(RodModel::running()), rows_with_lead(10, 6, 200, 600));
        assert_eq!(store.len(), 10);
        for i in 0..10 {
            assert_eq!(store.estimate(i).unwrap().averaged.variance(), 0.0, "row {}", i);
        }
        let hand = store.estimate(2).unwrap();
        assert_eq!(hand.averaged.end_time(), 3800);
        assert_eq!(hand.averaged.duration(), 1600);
    }

    #[test]
    fn test_short_touch_uses_measured_gap() {
        let store = run(Box::new(RodModel::constant(1.0)), perfect_rows(2, 6, 200));
        assert_eq!(store.len(), 2);
        let hand = store.estimate(0).unwrap();
        assert_eq!(hand.averaged.end_time(), 1000);
        assert_eq!(hand.averaged.variance(), 0.0);
    }

    #[test]
    fn test_names() {
        assert_eq!(RodModel::constant(1.0).name(), "RodModel5");
        assert_eq!(RodModel::running().name(), "RodModel2");
        assert!(RodModel::running().info().contains("ringing so far"));
    }
}
