//! Averaged rows
//!
//! An [`AveragedRow`] is an estimator's judgement of where a row *should*
//! have been struck: the ideal end time of the row and its duration. From
//! these, every place has a correct strike time, evenly spaced back from the
//! row end, with the handstroke gap adding to the duration of handstroke rows.

use std::sync::Arc;

use cas_common::config::CasConfig;
use cas_common::{Bong, Row};
use serde::{Deserialize, Serialize};

/// Fixed thresholds used to judge striking accuracy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrikingThresholds {
    /// Errors are truncated to multiples of this for discrete variance
    pub discrete_threshold_ms: f64,
    /// Standard deviation at or below which a row is good
    pub good_cutoff_ms: f64,
    /// Standard deviation at or above which a row is bad
    pub bad_cutoff_ms: f64,
    /// Adjacent-swap tolerance for "close to rounds"
    pub rounds_swap_tolerance_ms: i64,
}

impl Default for StrikingThresholds {
    fn default() -> Self {
        Self {
            discrete_threshold_ms: 30.0,
            good_cutoff_ms: 30.0,
            bad_cutoff_ms: 60.0,
            rounds_swap_tolerance_ms: cas_common::row::DEFAULT_ROUNDS_SWAP_TOLERANCE_MS,
        }
    }
}

impl From<&CasConfig> for StrikingThresholds {
    fn from(config: &CasConfig) -> Self {
        Self {
            discrete_threshold_ms: config.analysis.discrete_threshold_ms,
            good_cutoff_ms: config.analysis.good_cutoff_ms,
            bad_cutoff_ms: config.analysis.bad_cutoff_ms,
            rounds_swap_tolerance_ms: config.rows.rounds_swap_tolerance_ms,
        }
    }
}

/// Estimated ideal timing for one row
///
/// Immutable once built; all derived values are computed in [`AveragedRow::new`].
#[derive(Debug, Clone)]
pub struct AveragedRow {
    row: Arc<Row>,
    end_time: i64,
    handstroke_gap: f64,
    duration: i64,
    average_gap: f64,
    variance: f64,
    discrete_variance: f64,
    thresholds: StrikingThresholds,
}

impl AveragedRow {
    /// Build an estimate for `row`
    ///
    /// * `end_time` - ideal strike time of the last place
    /// * `handstroke_gap` - handstroke gap as a proportion of the inter-bell gap
    /// * `duration` - ideal time from the previous row end to this row end
    pub fn new(
        row: Arc<Row>,
        end_time: i64,
        handstroke_gap: f64,
        duration: i64,
        thresholds: StrikingThresholds,
    ) -> Self {
        let mut gaps = row.n_bells() as f64;
        if row.is_handstroke() {
            gaps += handstroke_gap;
        }
        let average_gap = if gaps > 0.0 { duration as f64 / gaps } else { 0.0 };

        let mut averaged = Self {
            row,
            end_time,
            handstroke_gap,
            duration,
            average_gap,
            variance: 0.0,
            discrete_variance: 0.0,
            thresholds,
        };
        averaged.calc_variance();
        averaged
    }

    fn calc_variance(&mut self) {
        let n = self.row.len();
        if n == 0 {
            return;
        }
        let threshold = self.thresholds.discrete_threshold_ms;
        let mut sum = 0.0;
        let mut discrete_sum = 0.0;
        for place in 1..=n {
            let error = self.lateness(place) as f64;
            sum += error * error;
            let quantised = (error.abs() / threshold).floor() * threshold;
            discrete_sum += quantised * quantised;
        }
        self.variance = sum / n as f64;
        self.discrete_variance = discrete_sum / n as f64;
    }

    pub fn row(&self) -> &Arc<Row> {
        &self.row
    }

    pub fn bong(&self, place: usize) -> Option<&Bong> {
        self.row.bong(place)
    }

    pub fn find_bell(&self, bell: u8) -> Option<usize> {
        self.row.find_bell(bell)
    }

    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }

    pub fn n_bells(&self) -> usize {
        self.row.n_bells()
    }

    pub fn is_handstroke(&self) -> bool {
        self.row.is_handstroke()
    }

    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn handstroke_gap(&self) -> f64 {
        self.handstroke_gap
    }

    /// Handstroke gap in milliseconds
    pub fn handstroke_gap_ms(&self) -> f64 {
        self.handstroke_gap * self.average_gap
    }

    /// Ideal gap between successive bells
    pub fn average_gap(&self) -> f64 {
        self.average_gap
    }

    /// Ideal strike time for `place` (1-based)
    pub fn correct_strike_time(&self, place: usize) -> i64 {
        let places_from_end = self.n_bells() as f64 - place as f64;
        self.end_time - (self.average_gap * places_from_end) as i64
    }

    /// Actual minus ideal strike time for `place`; 0 for an empty place
    pub fn lateness(&self, place: usize) -> i64 {
        match self.row.strike_time(place) {
            Some(t) => t - self.correct_strike_time(place),
            None => 0,
        }
    }

    /// Mean squared striking error over the row
    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// Mean squared error with sub-threshold jitter removed
    pub fn discrete_variance(&self) -> f64 {
        self.discrete_variance
    }

    pub fn standard_deviation(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Standard deviation as a proportion of the ideal gap
    pub fn percentage_deviation(&self) -> f64 {
        if self.average_gap > 0.0 {
            self.standard_deviation() / self.average_gap
        } else {
            0.0
        }
    }

    pub fn is_good(&self) -> bool {
        self.standard_deviation() <= self.thresholds.good_cutoff_ms
    }

    pub fn is_bad(&self) -> bool {
        self.standard_deviation() >= self.thresholds.bad_cutoff_ms
    }

    /// Actual mean gap between the first and last strikes (whole ms)
    pub fn mean_interbell_gap(&self) -> f64 {
        let n = self.row.len() as i64;
        if n > 1 {
            (self.row.duration() / (n - 1)) as f64
        } else {
            0.0
        }
    }

    pub fn is_close_to_rounds(&self) -> bool {
        self.row
            .is_close_to_rounds(self.thresholds.rounds_swap_tolerance_ms)
    }
}
