//! Estimators
//!
//! An estimator decides where each row *should* have been struck. It is a
//! resumable stream consumer: each batch it picks up from the last row it
//! estimated, emits exactly one [`AveragedRow`](crate::averaged::AveragedRow)
//! per row (possibly some rows later), and flushes anything held back when
//! the last row has been rung.
//!
//! The shared bookkeeping (rows consumed, cancellation, notification) lives in
//! [`EstimatorRunner`]; concrete estimators only implement the estimation rule.

mod lad;
mod last_bell_perfect;
mod rod_model;
mod simple_averager;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cas_common::Row;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::accumulator::RowSource;
use crate::error::{Error, Result};
use crate::scheduler::CancelToken;
use crate::store::AveragedRowStore;

pub use lad::LeastAbsoluteDeviation;
pub use last_bell_perfect::LastBellPerfect;
pub use rod_model::RodModel;
pub use simple_averager::SimpleAverager;

/// An estimation rule
pub trait Estimator: Send {
    /// Short display name
    fn name(&self) -> &str;

    /// One-paragraph description of the rule
    fn info(&self) -> String;

    /// Consume the next row, emitting zero or more estimates into `sink`
    fn new_row(&mut self, row: Arc<Row>, sink: &mut EstimateSink<'_>);

    /// Emit any estimates still held back; called once after the last row
    fn flush(&mut self, _sink: &mut EstimateSink<'_>) {}
}

/// Receives estimator progress
///
/// Called on the estimator worker; implementations hand off anything slow.
pub trait AnalysisListener: Send + Sync {
    /// An estimate was appended; the store now holds `n_rows`
    fn new_estimate_available(&self, estimator: &str, n_rows: usize);

    /// The final row has been estimated and any held-back rows flushed
    fn analysis_complete(&self, estimator: &str, n_rows: usize);
}

/// Where an estimator writes its estimates
pub struct EstimateSink<'a> {
    name: &'a str,
    store: &'a AveragedRowStore,
    listener: &'a dyn AnalysisListener,
    n_bells: usize,
}

impl<'a> EstimateSink<'a> {
    fn new(
        name: &'a str,
        store: &'a AveragedRowStore,
        listener: &'a dyn AnalysisListener,
        n_bells: usize,
    ) -> Self {
        Self {
            name,
            store,
            listener,
            n_bells,
        }
    }

    /// Number of bells ringing, as far as the input has shown
    pub fn n_bells(&self) -> usize {
        self.n_bells
    }

    /// Append an estimate whose duration runs from the previous estimate's end
    pub fn add_row(&mut self, row: Arc<Row>, end_time: i64, handstroke_gap: f64) {
        let n_rows = self.store.add_row(row, end_time, handstroke_gap);
        self.listener.new_estimate_available(self.name, n_rows);
    }

    /// Append an estimate with an explicit duration
    pub fn add_row_with_duration(
        &mut self,
        row: Arc<Row>,
        end_time: i64,
        handstroke_gap: f64,
        duration: i64,
    ) {
        let n_rows = self
            .store
            .add_row_with_duration(row, end_time, handstroke_gap, duration);
        self.listener.new_estimate_available(self.name, n_rows);
    }
}

/// Drives one estimator over a growing row source into its own store
pub struct EstimatorRunner {
    estimator: Box<dyn Estimator>,
    store: Arc<AveragedRowStore>,
    rows_processed: usize,
    flushed: bool,
}

impl EstimatorRunner {
    pub fn new(estimator: Box<dyn Estimator>, store: Arc<AveragedRowStore>) -> Self {
        Self {
            estimator,
            store,
            rows_processed: 0,
            flushed: false,
        }
    }

    pub fn name(&self) -> &str {
        self.estimator.name()
    }

    pub fn info(&self) -> String {
        self.estimator.info()
    }

    pub fn store(&self) -> &Arc<AveragedRowStore> {
        &self.store
    }

    /// Rows consumed from the source so far
    pub fn rows_processed(&self) -> usize {
        self.rows_processed
    }

    pub fn is_complete(&self) -> bool {
        self.flushed
    }

    /// Estimate every row from where this runner left off up to the source's
    /// current length
    ///
    /// Checks `cancel` before each row and returns early, leaving later rows
    /// for the next batch. Returns the number of rows consumed.
    pub fn new_rows_available(
        &mut self,
        source: &dyn RowSource,
        cancel: &CancelToken,
        listener: &dyn AnalysisListener,
    ) -> usize {
        let available = source.n_rows();
        let start = self.rows_processed;
        let name = self.estimator.name().to_string();
        let mut sink = EstimateSink::new(&name, &self.store, listener, source.n_bells());
        while self.rows_processed < available {
            if cancel.is_cancelled() {
                debug!(
                    "{} interrupted after {} of {} rows",
                    name, self.rows_processed, available
                );
                break;
            }
            let Some(row) = source.row(self.rows_processed) else {
                break;
            };
            self.estimator.new_row(row, &mut sink);
            self.rows_processed += 1;
        }
        self.rows_processed - start
    }

    /// Flush held-back rows and report completion
    ///
    /// The flush happens once; later calls only repeat the completion notice.
    pub fn last_row_rung(&mut self, source: &dyn RowSource, listener: &dyn AnalysisListener) {
        let name = self.estimator.name().to_string();
        if !self.flushed {
            let mut sink = EstimateSink::new(&name, &self.store, listener, source.n_bells());
            self.estimator.flush(&mut sink);
            self.flushed = true;
        }
        let n_rows = self.store.len();
        info!("{} analysis complete: {} rows", name, n_rows);
        listener.analysis_complete(&name, n_rows);
    }
}

/// The available estimators, selectable by name
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum EstimatorKind {
    SimpleAverager,
    LastBellPerfect,
    LeastAbsoluteDeviation,
    RodModel,
    RodModelRunning,
}

impl EstimatorKind {
    pub const ALL: [EstimatorKind; 5] = [
        EstimatorKind::SimpleAverager,
        EstimatorKind::LastBellPerfect,
        EstimatorKind::LeastAbsoluteDeviation,
        EstimatorKind::RodModel,
        EstimatorKind::RodModelRunning,
    ];

    /// Name used in configuration and on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            EstimatorKind::SimpleAverager => "simple-averager",
            EstimatorKind::LastBellPerfect => "last-bell-perfect",
            EstimatorKind::LeastAbsoluteDeviation => "least-absolute-deviation",
            EstimatorKind::RodModel => "rod-model",
            EstimatorKind::RodModelRunning => "rod-model-running",
        }
    }

    /// Build a fresh estimator of this kind
    ///
    /// `handstroke_gap` is the nominal gap ratio; the running Rod model
    /// measures its own instead.
    pub fn create(self, handstroke_gap: f64) -> Box<dyn Estimator> {
        match self {
            EstimatorKind::SimpleAverager => Box::new(SimpleAverager::new(handstroke_gap)),
            EstimatorKind::LastBellPerfect => Box::new(LastBellPerfect::new(handstroke_gap)),
            EstimatorKind::LeastAbsoluteDeviation => {
                Box::new(LeastAbsoluteDeviation::new(handstroke_gap))
            }
            EstimatorKind::RodModel => Box::new(RodModel::constant(handstroke_gap)),
            EstimatorKind::RodModelRunning => Box::new(RodModel::running()),
        }
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EstimatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::Estimator(format!(
                    "Unknown estimator '{}' (expected one of: {})",
                    s,
                    Self::ALL.map(|k| k.as_str()).join(", ")
                ))
            })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::accumulator::RowStore;
    use crate::averaged::StrikingThresholds;
    use cas_common::{Bong, Stroke};
    use std::sync::Mutex;

    /// Listener that records what it was told
    #[derive(Default)]
    pub struct RecordingListener {
        pub estimates: Mutex<Vec<usize>>,
        pub completions: Mutex<Vec<usize>>,
    }

    impl AnalysisListener for RecordingListener {
        fn new_estimate_available(&self, _estimator: &str, n_rows: usize) {
            self.estimates.lock().unwrap().push(n_rows);
        }

        fn analysis_complete(&self, _estimator: &str, n_rows: usize) {
            self.completions.lock().unwrap().push(n_rows);
        }
    }

    /// Evenly struck rounds on `bells` bells: `gap` between bells plus one
    /// extra gap before each handstroke
    pub fn perfect_rows(n_rows: usize, bells: u8, gap: i64) -> Vec<Row> {
        let mut rows = Vec::new();
        let mut t = 0;
        for i in 0..n_rows {
            let handstroke = i % 2 == 0;
            if handstroke && i > 0 {
                t += gap;
            }
            let stroke = Stroke::from_handstroke(handstroke);
            let mut row = Row::new(handstroke);
            for bell in 1..=bells {
                row.push(Bong::new(bell, t, stroke));
                t += gap;
            }
            rows.push(row);
        }
        rows
    }

    /// Run `estimator` over `rows` to completion
    pub fn run(estimator: Box<dyn Estimator>, rows: Vec<Row>) -> Arc<AveragedRowStore> {
        let source = Arc::new(RowStore::new());
        for row in rows {
            source.append(row);
        }
        let store = Arc::new(AveragedRowStore::new(1, StrikingThresholds::default()));
        let listener = RecordingListener::default();
        let mut runner = EstimatorRunner::new(estimator, Arc::clone(&store));
        runner.new_rows_available(&*source, &CancelToken::new(), &listener);
        runner.last_row_rung(&*source, &listener);
        store
    }
}
