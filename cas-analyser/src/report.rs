//! Statistics report
//!
//! Flattens a [`TouchStats`] snapshot into a serialisable summary, rendered
//! as plain text (one `metric, whole, hand, back` line per metric) or JSON.
//! A [`RankingReport`] does the same for the ranking of several touches.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stats::{HandBackWhole, TouchStats};
use crate::summary::{Band, BandOrder, Summary};

/// Per-bell figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BellReport {
    pub bell: u8,
    pub std_deviation: HandBackWhole<f64>,
    pub rms_error: HandBackWhole<f64>,
    /// Mean ms late; negative is early
    pub lateness: HandBackWhole<f64>,
    /// Mean handstroke gap when this bell leads, in ms
    pub handstroke_gap_when_leading: f64,
}

/// Summary of one estimator's view of a touch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub estimator: String,
    pub in_changes_only: bool,
    pub n_rows: usize,
    pub n_bells: usize,
    pub faults: usize,
    /// Share of the maximum possible faults avoided, as a percentage
    pub fault_free_percent: f64,
    pub striking_rmse: HandBackWhole<f64>,
    pub discrete_rmse: HandBackWhole<f64>,
    pub interval_mean: HandBackWhole<f64>,
    pub quickest_row: HandBackWhole<i64>,
    pub slowest_row: HandBackWhole<i64>,
    pub row_length_sd: HandBackWhole<f64>,
    pub handstroke_gap_mean: f64,
    pub handstroke_gap_sd: f64,
    pub bells: Vec<BellReport>,
}

impl StatsReport {
    pub fn new(stats: &TouchStats, estimator: &str, in_changes_only: bool) -> Self {
        let bells = (1..=stats.n_bells() as u8)
            .map(|bell| BellReport {
                bell,
                std_deviation: stats.bell_sd(bell, in_changes_only),
                rms_error: stats.bell_rmse(bell, in_changes_only),
                lateness: stats.lateness(bell, in_changes_only),
                handstroke_gap_when_leading: stats
                    .mean_bell_handstroke_gap(bell, in_changes_only),
            })
            .collect();

        Self {
            estimator: estimator.to_string(),
            in_changes_only,
            n_rows: stats.n_rows(),
            n_bells: stats.n_bells(),
            faults: stats.faults(in_changes_only),
            fault_free_percent: stats.fault_free_fraction(in_changes_only) * 100.0,
            striking_rmse: stats.striking_rmse(in_changes_only),
            discrete_rmse: stats.discrete_rmse(in_changes_only),
            interval_mean: stats.mean_interbell_gap(in_changes_only),
            quickest_row: stats.min_duration(in_changes_only),
            slowest_row: stats.max_duration(in_changes_only),
            row_length_sd: stats.row_length_sd(in_changes_only),
            handstroke_gap_mean: stats.mean_handstroke_gap(in_changes_only),
            handstroke_gap_sd: stats.handstroke_gap_sd(in_changes_only),
            bells,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn write_three<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    values: &HandBackWhole<T>,
) -> fmt::Result {
    writeln!(f, "{}, {}, {}, {}", label, values.whole, values.hand, values.back)
}

fn rounded(values: &HandBackWhole<f64>) -> HandBackWhole<String> {
    HandBackWhole {
        hand: format!("{:.1}", values.hand),
        back: format!("{:.1}", values.back),
        whole: format!("{:.1}", values.whole),
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Touch stats calculated from {} rows ({}{})",
            self.n_rows,
            self.estimator,
            if self.in_changes_only { ", in changes only" } else { "" }
        )?;
        writeln!(f, "Faults: {}, {:.1}%", self.faults, self.fault_free_percent)?;
        writeln!(f, "Metric, whole, hand, back")?;
        write_three(f, "Striking RMSE", &rounded(&self.striking_rmse))?;
        write_three(f, "Discrete RMSE", &rounded(&self.discrete_rmse))?;
        write_three(f, "Interval mean", &rounded(&self.interval_mean))?;
        write_three(f, "Quickest row", &self.quickest_row)?;
        write_three(f, "Slowest row", &self.slowest_row)?;
        write_three(f, "Row length SD", &rounded(&self.row_length_sd))?;
        writeln!(
            f,
            "Handstroke gap, {:.1}, SD {:.1}",
            self.handstroke_gap_mean, self.handstroke_gap_sd
        )?;
        for bell in &self.bells {
            writeln!(f, "Bell {}", bell.bell)?;
            write_three(f, "Std deviation", &rounded(&bell.std_deviation))?;
            write_three(f, "RMS Error", &rounded(&bell.rms_error))?;
            write_three(f, "Av ms late", &rounded(&bell.lateness))?;
        }
        Ok(())
    }
}

/// One analysis's ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReport {
    pub analysis: String,
    /// Band letters, best first
    pub ranking: String,
    pub results: Vec<(char, f64)>,
}

impl From<&BandOrder> for OrderReport {
    fn from(order: &BandOrder) -> Self {
        Self {
            analysis: order.analysis.clone(),
            ranking: order.letters(),
            results: order.results.iter().map(|r| (r.band, r.result)).collect(),
        }
    }
}

/// Ranking of several touches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingReport {
    pub in_changes_only: bool,
    pub bands: Vec<Band>,
    pub orders: Vec<OrderReport>,
    pub average: Option<OrderReport>,
}

impl RankingReport {
    pub fn new(summary: &Summary) -> Self {
        Self {
            in_changes_only: summary.in_changes_only,
            bands: summary.bands.clone(),
            orders: summary.orders.iter().map(OrderReport::from).collect(),
            average: summary.average.as_ref().map(OrderReport::from),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn write_order(f: &mut fmt::Formatter<'_>, order: &OrderReport, precision: usize) -> fmt::Result {
    let results: Vec<String> = order
        .results
        .iter()
        .map(|(band, result)| format!("{} {:.*}", band, precision, result))
        .collect();
    writeln!(f, "{}: {} ({})", order.analysis, order.ranking, results.join(", "))
}

impl fmt::Display for RankingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Ranking of {} touches{}",
            self.bands.len(),
            if self.in_changes_only { ", in changes only" } else { "" }
        )?;
        for band in &self.bands {
            writeln!(f, "{}: {} ({} rows)", band.letter, band.source, band.n_rows)?;
        }
        for order in &self.orders {
            write_order(f, order, 0)?;
        }
        if let Some(average) = &self.average {
            write_order(f, average, 2)?;
        }
        Ok(())
    }
}
