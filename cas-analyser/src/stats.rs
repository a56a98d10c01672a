//! Touch statistics
//!
//! A [`TouchStats`] is a snapshot of an [`AveragedRowStore`]: it captures the
//! row count when built and only ever looks at that many rows, resolving
//! revisable per-row values as they stood at capture. Every metric is
//! available over whole pulls, handstrokes or backstrokes, optionally
//! restricted to rows in changes, and each combination is computed once and
//! cached for the life of the snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};

use crate::store::{AveragedRowStore, RowEstimate};

/// Default proportion of a row's mean gap below which two strikes clash
pub const DEFAULT_FAULT_FACTOR: f64 = 0.75;

/// Default cap on faults counted in a single row
pub const DEFAULT_MAX_FAULTS_PER_ROW: usize = 4;

/// Which rows a metric is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeSubset {
    /// Every row
    Whole,
    Hand,
    Back,
}

/// One metric computed over each of the three row subsets
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HandBackWhole<T> {
    pub hand: T,
    pub back: T,
    pub whole: T,
}

impl<T> HandBackWhole<T> {
    fn compute(mut f: impl FnMut(StrokeSubset) -> T) -> Self {
        Self {
            hand: f(StrokeSubset::Hand),
            back: f(StrokeSubset::Back),
            whole: f(StrokeSubset::Whole),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Metric {
    Faults,
    RowCount,
    MinDuration,
    MaxDuration,
    MinWholePull,
    MaxWholePull,
    MeanInterbellGap,
    MeanRowLength,
    RowLengthSd,
    StrikingRmse,
    DiscreteRmse,
    BellLateness(u8),
    BellSd(u8),
    BellRmse(u8),
    MeanHandstrokeGap,
    HandstrokeGapSd,
    MeanBellHandstrokeGap(u8),
    BellHandstrokeGapSd(u8),
}

type CacheKey = (Metric, StrokeSubset, bool);

/// Point-in-time statistics over an averaged-row store
#[derive(Debug)]
pub struct TouchStats {
    store: Arc<AveragedRowStore>,
    n_rows: usize,
    n_bells: usize,
    fault_factor: f64,
    max_faults_per_row: usize,
    rows: OnceLock<Vec<RowEstimate>>,
    cache: Mutex<HashMap<CacheKey, f64>>,
}

impl TouchStats {
    /// Statistics over the first `n_rows` rows of `store`
    pub fn new(store: Arc<AveragedRowStore>, n_rows: usize, n_bells: usize) -> Self {
        Self {
            store,
            n_rows,
            n_bells,
            fault_factor: DEFAULT_FAULT_FACTOR,
            max_faults_per_row: DEFAULT_MAX_FAULTS_PER_ROW,
            rows: OnceLock::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Override the fault rule; call before any fault metric is read
    pub fn with_fault_rule(mut self, fault_factor: f64, max_faults_per_row: usize) -> Self {
        self.fault_factor = fault_factor;
        self.max_faults_per_row = max_faults_per_row;
        self
    }

    /// Rows captured by this snapshot
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_bells(&self) -> usize {
        self.n_bells
    }

    pub fn fault_factor(&self) -> f64 {
        self.fault_factor
    }

    pub fn max_faults_per_row(&self) -> usize {
        self.max_faults_per_row
    }

    /// The estimate at `index`, as of capture
    pub fn row(&self, index: usize) -> Option<&RowEstimate> {
        self.rows().get(index)
    }

    fn rows(&self) -> &[RowEstimate] {
        self.rows
            .get_or_init(|| self.store.estimates_as_of(self.n_rows))
    }

    /// Rows in `subset`, alternating from the first row of the right stroke
    fn visit(&self, subset: StrokeSubset, in_changes: bool) -> impl Iterator<Item = &RowEstimate> {
        let rows = self.rows();
        let first_is_hand = rows
            .first()
            .map_or(true, |r| r.averaged.is_handstroke());
        let (start, step) = match subset {
            StrokeSubset::Whole => (0, 1),
            StrokeSubset::Hand => (usize::from(!first_is_hand), 2),
            StrokeSubset::Back => (usize::from(first_is_hand), 2),
        };
        rows.iter()
            .skip(start)
            .step_by(step)
            .filter(move |r| !in_changes || r.in_changes)
    }

    fn cached(
        &self,
        metric: Metric,
        subset: StrokeSubset,
        in_changes: bool,
        compute: impl FnOnce() -> f64,
    ) -> f64 {
        let key = (metric, subset, in_changes);
        if let Some(value) = self.cache.lock().unwrap().get(&key) {
            return *value;
        }
        let value = compute();
        self.cache.lock().unwrap().insert(key, value);
        value
    }

    fn row_mean(
        &self,
        subset: StrokeSubset,
        in_changes: bool,
        value: impl Fn(&RowEstimate) -> f64,
    ) -> f64 {
        mean(self.visit(subset, in_changes).map(value))
    }

    fn bell_mean(
        &self,
        bell: u8,
        subset: StrokeSubset,
        in_changes: bool,
        value: impl Fn(&RowEstimate, usize) -> f64,
    ) -> f64 {
        mean(self.visit(subset, in_changes).filter_map(|r| {
            r.averaged.find_bell(bell).map(|place| value(r, place))
        }))
    }

    /// Total clashes over the touch, using the snapshot's fault factor
    pub fn faults(&self, in_changes: bool) -> usize {
        self.faults_with_factor(in_changes, self.fault_factor)
    }

    /// Total clashes: adjacent strikes closer than `fault_factor` of the
    /// row's mean gap, capped per row
    ///
    /// The previous strike carries across rows so a clash over the
    /// hand-to-back boundary counts; the handstroke lead is never compared
    /// with the strike before it.
    pub fn faults_with_factor(&self, in_changes: bool, fault_factor: f64) -> usize {
        let compute = || {
            let mut previous: Option<i64> = None;
            let mut total = 0;
            for estimate in self.visit(StrokeSubset::Whole, in_changes) {
                let row = estimate.averaged.row();
                let max_good_gap = fault_factor * estimate.averaged.mean_interbell_gap();
                if row.is_handstroke() {
                    previous = None;
                }
                let mut faults = 0;
                for bong in row.iter() {
                    if let Some(t) = previous {
                        if (((bong.time - t).abs()) as f64) < max_good_gap {
                            faults += 1;
                        }
                    }
                    previous = Some(bong.time);
                }
                total += faults.min(self.max_faults_per_row);
            }
            total as f64
        };
        if fault_factor == self.fault_factor {
            self.cached(Metric::Faults, StrokeSubset::Whole, in_changes, compute) as usize
        } else {
            compute() as usize
        }
    }

    /// Proportion of the maximum possible faults that did not occur
    pub fn fault_free_fraction(&self, in_changes: bool) -> f64 {
        let n_rows = self.cached(Metric::RowCount, StrokeSubset::Whole, in_changes, || {
            self.visit(StrokeSubset::Whole, in_changes).count() as f64
        });
        let max = n_rows * self.max_faults_per_row as f64;
        if max > 0.0 {
            (max - self.faults(in_changes) as f64) / max
        } else {
            0.0
        }
    }

    /// Quickest row per stroke; the whole-pull figure is the quickest pair
    pub fn min_duration(&self, in_changes: bool) -> HandBackWhole<i64> {
        HandBackWhole::compute(|subset| self.duration_extreme(subset, in_changes, false))
    }

    /// Slowest row per stroke; the whole-pull figure is the slowest pair
    pub fn max_duration(&self, in_changes: bool) -> HandBackWhole<i64> {
        HandBackWhole::compute(|subset| self.duration_extreme(subset, in_changes, true))
    }

    fn duration_extreme(&self, subset: StrokeSubset, in_changes: bool, max: bool) -> i64 {
        // Whole pulls are read off their backstrokes
        let (metric, visited, whole) = match (subset, max) {
            (StrokeSubset::Whole, false) => (Metric::MinWholePull, StrokeSubset::Back, true),
            (StrokeSubset::Whole, true) => (Metric::MaxWholePull, StrokeSubset::Back, true),
            (_, false) => (Metric::MinDuration, subset, false),
            (_, true) => (Metric::MaxDuration, subset, false),
        };
        self.cached(metric, visited, in_changes, || {
            let durations = self.visit(visited, in_changes).map(|r| {
                if whole {
                    r.whole_pull_duration
                } else {
                    r.averaged.duration()
                }
            });
            let extreme = if max { durations.max() } else { durations.min() };
            extreme.unwrap_or(0) as f64
        }) as i64
    }

    pub fn mean_interbell_gap(&self, in_changes: bool) -> HandBackWhole<f64> {
        HandBackWhole::compute(|subset| {
            self.cached(Metric::MeanInterbellGap, subset, in_changes, || {
                self.row_mean(subset, in_changes, |r| r.averaged.mean_interbell_gap())
            })
        })
    }

    pub fn mean_row_length(&self, in_changes: bool) -> HandBackWhole<f64> {
        HandBackWhole::compute(|subset| self.mean_row_length_for(subset, in_changes))
    }

    fn mean_row_length_for(&self, subset: StrokeSubset, in_changes: bool) -> f64 {
        self.cached(Metric::MeanRowLength, subset, in_changes, || {
            self.row_mean(subset, in_changes, |r| r.averaged.duration() as f64)
        })
    }

    pub fn row_length_sd(&self, in_changes: bool) -> HandBackWhole<f64> {
        HandBackWhole::compute(|subset| {
            let row_mean = self.mean_row_length_for(subset, in_changes);
            self.cached(Metric::RowLengthSd, subset, in_changes, || {
                self.row_mean(subset, in_changes, |r| {
                    let x = r.averaged.duration() as f64 - row_mean;
                    x * x
                })
                .sqrt()
            })
        })
    }

    pub fn striking_rmse(&self, in_changes: bool) -> HandBackWhole<f64> {
        HandBackWhole::compute(|subset| {
            self.cached(Metric::StrikingRmse, subset, in_changes, || {
                self.row_mean(subset, in_changes, |r| r.averaged.variance())
                    .sqrt()
            })
        })
    }

    pub fn discrete_rmse(&self, in_changes: bool) -> HandBackWhole<f64> {
        HandBackWhole::compute(|subset| {
            self.cached(Metric::DiscreteRmse, subset, in_changes, || {
                self.row_mean(subset, in_changes, |r| r.averaged.discrete_variance())
                    .sqrt()
            })
        })
    }

    /// Mean ms late for `bell`, over the rows it rang in
    pub fn lateness(&self, bell: u8, in_changes: bool) -> HandBackWhole<f64> {
        HandBackWhole::compute(|subset| self.lateness_for(bell, subset, in_changes))
    }

    fn lateness_for(&self, bell: u8, subset: StrokeSubset, in_changes: bool) -> f64 {
        self.cached(Metric::BellLateness(bell), subset, in_changes, || {
            self.bell_mean(bell, subset, in_changes, |r, place| {
                r.averaged.lateness(place) as f64
            })
        })
    }

    /// Spread of `bell`'s errors about its own mean lateness
    pub fn bell_sd(&self, bell: u8, in_changes: bool) -> HandBackWhole<f64> {
        HandBackWhole::compute(|subset| {
            let mean_lateness = self.lateness_for(bell, subset, in_changes);
            self.cached(Metric::BellSd(bell), subset, in_changes, || {
                self.bell_deviation(bell, subset, in_changes, mean_lateness)
            })
        })
    }

    /// Spread of `bell`'s errors about the correct time
    pub fn bell_rmse(&self, bell: u8, in_changes: bool) -> HandBackWhole<f64> {
        HandBackWhole::compute(|subset| {
            self.cached(Metric::BellRmse(bell), subset, in_changes, || {
                self.bell_deviation(bell, subset, in_changes, 0.0)
            })
        })
    }

    fn bell_deviation(&self, bell: u8, subset: StrokeSubset, in_changes: bool, about: f64) -> f64 {
        self.bell_mean(bell, subset, in_changes, |r, place| {
            let x = r.averaged.lateness(place) as f64 - about;
            x * x
        })
        .sqrt()
    }

    /// Mean handstroke gap in ms
    pub fn mean_handstroke_gap(&self, in_changes: bool) -> f64 {
        self.cached(Metric::MeanHandstrokeGap, StrokeSubset::Hand, in_changes, || {
            self.row_mean(StrokeSubset::Hand, in_changes, |r| {
                r.averaged.handstroke_gap_ms()
            })
        })
    }

    pub fn handstroke_gap_sd(&self, in_changes: bool) -> f64 {
        let hg_mean = self.mean_handstroke_gap(in_changes);
        self.cached(Metric::HandstrokeGapSd, StrokeSubset::Hand, in_changes, || {
            self.row_mean(StrokeSubset::Hand, in_changes, |r| {
                let x = r.averaged.handstroke_gap_ms() - hg_mean;
                x * x
            })
            .sqrt()
        })
    }

    /// Mean handstroke gap over the handstrokes `bell` led
    pub fn mean_bell_handstroke_gap(&self, bell: u8, in_changes: bool) -> f64 {
        self.cached(
            Metric::MeanBellHandstrokeGap(bell),
            StrokeSubset::Hand,
            in_changes,
            || {
                mean(
                    self.led_by(bell, in_changes)
                        .map(|r| r.averaged.handstroke_gap_ms()),
                )
            },
        )
    }

    pub fn bell_handstroke_gap_sd(&self, bell: u8, in_changes: bool) -> f64 {
        let hg_mean = self.mean_bell_handstroke_gap(bell, in_changes);
        self.cached(
            Metric::BellHandstrokeGapSd(bell),
            StrokeSubset::Hand,
            in_changes,
            || {
                mean(self.led_by(bell, in_changes).map(|r| {
                    let x = r.averaged.handstroke_gap_ms() - hg_mean;
                    x * x
                }))
                .sqrt()
            },
        )
    }

    fn led_by(&self, bell: u8, in_changes: bool) -> impl Iterator<Item = &RowEstimate> {
        self.visit(StrokeSubset::Hand, in_changes)
            .filter(move |r| r.averaged.find_bell(bell) == Some(1))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::averaged::StrikingThresholds;
    use cas_common::{Bong, Row, Stroke};

    fn row(handstroke: bool, bells: &[u8], times: &[i64]) -> Arc<Row> {
        let stroke = Stroke::from_handstroke(handstroke);
        Arc::new(Row::from_bongs(
            handstroke,
            bells
                .iter()
                .zip(times)
                .map(|(&b, &t)| Bong::new(b, t, stroke)),
        ))
    }

    fn rounds(handstroke: bool, start: i64, gap: i64) -> Arc<Row> {
        let times: Vec<i64> = (0..6).map(|i| start + i * gap).collect();
        row(handstroke, &[1, 2, 3, 4, 5, 6], &times)
    }

    fn new_store() -> Arc<AveragedRowStore> {
        Arc::new(AveragedRowStore::new(1, StrikingThresholds::default()))
    }

    #[test]
    fn test_fault_counted_for_close_pair() {
        let store = new_store();
        // Mean gap 120ms, so anything under 90ms is a clash
        store.add_row_with_duration(
            row(true, &[1, 2, 3, 4, 5, 6], &[0, 120, 240, 360, 400, 600]),
            600,
            1.0,
            840,
        );
        let stats = store.snapshot();
        assert_eq!(stats.faults(false), 1);
        assert!((stats.fault_free_fraction(false) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_faults_capped_per_row() {
        let store = new_store();
        store.add_row_with_duration(
            row(false, &[1, 2, 3, 4, 5, 6], &[0, 10, 20, 30, 40, 1000]),
            1000,
            1.0,
            1200,
        );
        let stats = store.snapshot();
        assert_eq!(stats.faults(false), 4);
        assert_eq!(stats.faults_with_factor(false, 0.01), 0);
    }

    #[test]
    fn test_fault_across_hand_back_boundary() {
        let store = new_store();
        store.add_row_with_duration(rounds(true, 0, 200), 1000, 1.0, 1400);
        // Backstroke lead 50ms after the handstroke lie
        store.add_row_with_duration(rounds(false, 1050, 200), 2050, 1.0, 1050);
        let stats = store.snapshot();
        assert_eq!(stats.faults(false), 1);
    }

    #[test]
    fn test_stroke_subsets() {
        let store = new_store();
        store.add_row_with_duration(rounds(true, 0, 200), 1000, 1.0, 1400);
        store.add_row_with_duration(rounds(false, 1400, 200), 2400, 1.0, 1400);
        store.add_row_with_duration(rounds(true, 3000, 200), 4000, 1.0, 1600);
        store.add_row_with_duration(rounds(false, 4200, 200), 5200, 1.0, 1200);
        let stats = store.snapshot();

        let min = stats.min_duration(false);
        assert_eq!(min.hand, 1400);
        assert_eq!(min.back, 1200);
        assert_eq!(min.whole, 2800);

        let max = stats.max_duration(false);
        assert_eq!(max.hand, 1600);
        assert_eq!(max.back, 1400);
        assert_eq!(max.whole, 2800);

        let mean = stats.mean_row_length(false);
        assert!((mean.hand - 1500.0).abs() < 1e-9);
        assert!((mean.whole - 1400.0).abs() < 1e-9);
        assert!((stats.row_length_sd(false).back - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_perfect_striking_has_zero_error() {
        let store = new_store();
        store.add_row_with_duration(rounds(true, 0, 200), 1000, 1.0, 1400);
        store.add_row_with_duration(rounds(false, 1200, 200), 2200, 1.0, 1200);
        let stats = store.snapshot();

        assert_eq!(stats.striking_rmse(false).whole, 0.0);
        assert_eq!(stats.discrete_rmse(false).whole, 0.0);
        assert_eq!(stats.lateness(3, false).whole, 0.0);
        assert!((stats.mean_interbell_gap(false).whole - 200.0).abs() < 1e-9);
        assert!((stats.mean_handstroke_gap(false) - 200.0).abs() < 1e-9);
        assert!((stats.mean_bell_handstroke_gap(1, false) - 200.0).abs() < 1e-9);
        assert_eq!(stats.mean_bell_handstroke_gap(2, false), 0.0);
    }

    #[test]
    fn test_bell_lateness_and_spread() {
        let store = new_store();
        // Bell 6 is 40ms late at hand and 20ms early at back
        store.add_row_with_duration(
            row(true, &[1, 2, 3, 4, 5, 6], &[0, 200, 400, 600, 800, 1040]),
            1000,
            1.0,
            1400,
        );
        store.add_row_with_duration(
            row(false, &[1, 2, 3, 4, 5, 6], &[1200, 1400, 1600, 1800, 2000, 2180]),
            2200,
            1.0,
            1200,
        );
        let stats = store.snapshot();
        let late = stats.lateness(6, false);
        assert!((late.hand - 40.0).abs() < 1e-9);
        assert!((late.back + 20.0).abs() < 1e-9);
        assert!((late.whole - 10.0).abs() < 1e-9);
        assert!((stats.bell_sd(6, false).whole - 30.0).abs() < 1e-9);
        assert!((stats.bell_rmse(6, false).whole - 1000f64.sqrt()).abs() < 1e-9);
        assert_eq!(stats.bell_rmse(1, false).whole, 0.0);
    }

    #[test]
    fn test_in_changes_filter() {
        let store = new_store();
        store.add_row_with_duration(rounds(true, 0, 200), 1000, 1.0, 1400);
        store.add_row_with_duration(rounds(false, 1200, 200), 2200, 1.0, 1200);
        store.add_row_with_duration(
            row(true, &[2, 1, 4, 3, 6, 5], &[2600, 2800, 3000, 3200, 3400, 3600]),
            3600,
            1.0,
            1400,
        );
        store.add_row_with_duration(
            row(false, &[2, 4, 1, 6, 3, 5], &[3800, 4000, 4200, 4400, 4600, 5000]),
            4800,
            1.0,
            1200,
        );
        let stats = store.snapshot();

        // The last row of rounds is the transition into changes
        let in_changes: Vec<bool> = (0..4).map(|i| stats.row(i).unwrap().in_changes).collect();
        assert_eq!(in_changes, vec![false, true, true, true]);
        assert!(stats.striking_rmse(true).whole > 0.0);
        assert_eq!(stats.min_duration(true).hand, 1400);
        assert_eq!(stats.max_duration(true).whole, 2600);
    }

    #[test]
    fn test_snapshot_stable_under_appends() {
        let store = new_store();
        store.add_row_with_duration(rounds(true, 0, 200), 1000, 1.0, 1400);
        store.add_row_with_duration(rounds(false, 1200, 200), 2200, 1.0, 1200);
        let stats = store.snapshot();
        let rmse = stats.striking_rmse(false);

        store.add_row_with_duration(
            row(true, &[1, 2, 3, 4, 5, 6], &[2600, 2900, 3000, 3200, 3400, 3500]),
            3600,
            1.0,
            1400,
        );
        assert_eq!(stats.n_rows(), 2);
        assert_eq!(stats.striking_rmse(false), rmse);
        assert_eq!(stats.max_duration(false).hand, 1400);
        assert_eq!(store.snapshot().n_rows(), 3);
    }

    #[test]
    fn test_empty_snapshot() {
        let stats = new_store().snapshot();
        assert_eq!(stats.n_rows(), 0);
        assert_eq!(stats.faults(false), 0);
        assert_eq!(stats.fault_free_fraction(false), 0.0);
        assert_eq!(stats.min_duration(false), HandBackWhole::default());
        assert_eq!(stats.striking_rmse(false).whole, 0.0);
    }
}
