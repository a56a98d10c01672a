//! Analysis pipeline
//!
//! Wires an input source through the correction chain into the row
//! accumulator, and the accumulated rows through the selected estimator.
//!
//! **Threads:**
//! - the input thread drives [`PipelineInput`]: correction and accumulation
//!   run synchronously as each strike arrives;
//! - the estimator worker consumes row batches for the active estimator;
//! - the notification worker publishes estimator progress on the
//!   [`EventBus`].
//!
//! Both workers are [`WorkScheduler`]s, so a burst of row batches coalesces
//! into one pending job and an estimator switch jumps the queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cas_common::config::CasConfig;
use cas_common::events::{CasEvent, EventBus};
use cas_common::{Bong, OddStruck, Row};
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::accumulator::{RowAccumulator, RowSource, RowStore};
use crate::averaged::StrikingThresholds;
use crate::correction::CorrectionChain;
use crate::error::{Error, Result};
use crate::estimator::{AnalysisListener, EstimatorKind, EstimatorRunner};
use crate::input::{BongSink, InputFormat, ReadOptions};
use crate::scheduler::{CancelToken, JobPriority, WorkScheduler};
use crate::stats::TouchStats;
use crate::store::AveragedRowStore;

/// One analysis run over one input source
pub struct Pipeline {
    shared: Arc<Shared>,
}

struct Shared {
    id: Uuid,
    config: CasConfig,
    odd_struck: OddStruck,
    events: EventBus,
    rows: Arc<RowStore>,
    estimator_worker: WorkScheduler,
    notification_worker: Arc<WorkScheduler>,
    input_attached: AtomicBool,
    all_rows_rung: AtomicBool,
    current: Mutex<EstimatorKind>,
    runners: Mutex<HashMap<EstimatorKind, Arc<Mutex<EstimatorRunner>>>>,
}

impl Pipeline {
    /// Build a pipeline; the initial estimator comes from `config`
    pub fn new(config: CasConfig, events: EventBus) -> Result<Self> {
        config.validate()?;
        let initial: EstimatorKind = config.analysis.estimator.parse()?;
        let odd_struck = config.odd_struck.table()?;
        let id = Uuid::new_v4();

        let shared = Arc::new(Shared {
            id,
            estimator_worker: WorkScheduler::new(format!("estimator-{}", short_id(id)))?,
            notification_worker: Arc::new(WorkScheduler::new(format!(
                "notify-{}",
                short_id(id)
            ))?),
            config,
            odd_struck,
            events,
            rows: Arc::new(RowStore::new()),
            input_attached: AtomicBool::new(false),
            all_rows_rung: AtomicBool::new(false),
            current: Mutex::new(initial),
            runners: Mutex::new(HashMap::new()),
        });
        shared.runner(initial);
        info!("Pipeline {} created with estimator {}", id, initial);
        Ok(Self { shared })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn config(&self) -> &CasConfig {
        &self.shared.config
    }

    /// Reader settings matching this pipeline's configuration
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions::from(&self.shared.config)
    }

    /// Attach the input source; only one per pipeline
    pub fn input(&self, format: InputFormat, source: &str) -> Result<PipelineInput> {
        if self.shared.input_attached.swap(true, Ordering::AcqRel) {
            return Err(Error::Pipeline(format!(
                "Pipeline {} already has an input",
                self.shared.id
            )));
        }
        info!("Pipeline {}: reading {} input from {}", self.shared.id, format, source);
        self.shared.events.emit_lossy(CasEvent::InputStarted {
            pipeline_id: self.shared.id,
            source: source.to_string(),
            timestamp: Utc::now(),
        });
        Ok(PipelineInput {
            shared: Arc::clone(&self.shared),
            chain: CorrectionChain::for_format(
                format,
                &self.shared.config,
                &self.shared.odd_struck,
            ),
            accumulator: RowAccumulator::new(Arc::clone(&self.shared.rows)),
            finished: false,
        })
    }

    /// Switch the active estimator
    ///
    /// Runs ahead of any queued row batch. An estimator used before resumes
    /// from where it stopped; a new one catches up on every row so far.
    pub fn set_estimator(&self, kind: EstimatorKind) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .estimator_worker
            .submit(JobPriority::High, move |cancel| shared.switch_estimator(kind, cancel))
    }

    pub fn current_estimator(&self) -> EstimatorKind {
        *self.shared.current.lock().unwrap()
    }

    /// Rows accumulated so far
    pub fn n_rows(&self) -> usize {
        self.shared.rows.len()
    }

    pub fn rows(&self) -> Vec<Arc<Row>> {
        self.shared.rows.rows()
    }

    pub fn is_all_rows_rung(&self) -> bool {
        self.shared.all_rows_rung.load(Ordering::Acquire)
    }

    /// Statistics over the active estimator's rows so far
    pub fn snapshot(&self) -> TouchStats {
        self.snapshot_for(self.current_estimator())
    }

    /// Statistics over `kind`'s rows so far (empty if it never ran)
    pub fn snapshot_for(&self, kind: EstimatorKind) -> TouchStats {
        let analysis = &self.shared.config.analysis;
        let store = self.shared.runner(kind).lock().unwrap().store().clone();
        store
            .snapshot()
            .with_fault_rule(analysis.fault_factor, analysis.max_faults_per_row)
    }

    /// Block until both workers have nothing running or pending
    pub fn wait_idle(&self) {
        self.shared.estimator_worker.wait_idle();
        self.shared.notification_worker.wait_idle();
    }

    /// Abandon in-flight work and stop both workers
    pub fn stop(&self) {
        info!("Pipeline {} stopping", self.shared.id);
        self.shared.estimator_worker.interrupt();
        self.shared.notification_worker.interrupt();
        self.shared.estimator_worker.shutdown();
        self.shared.notification_worker.shutdown();
    }
}

impl Shared {
    /// Runner for `kind`, created on first use
    fn runner(&self, kind: EstimatorKind) -> Arc<Mutex<EstimatorRunner>> {
        let mut runners = self.runners.lock().unwrap();
        let runner = runners.entry(kind).or_insert_with(|| {
            let analysis = &self.config.analysis;
            let store = Arc::new(AveragedRowStore::new(
                analysis.in_changes_sensitivity,
                StrikingThresholds::from(&self.config),
            ));
            let estimator = kind.create(analysis.handstroke_gap);
            debug!("Created {} estimator", estimator.name());
            Arc::new(Mutex::new(EstimatorRunner::new(estimator, store)))
        });
        Arc::clone(runner)
    }

    fn notifier(&self, kind: EstimatorKind) -> Notifier {
        Notifier {
            pipeline_id: self.id,
            kind,
            events: self.events.clone(),
            worker: Arc::clone(&self.notification_worker),
        }
    }

    fn rows_available(self: &Arc<Self>, n_rows: usize) {
        self.events.emit_lossy(CasEvent::RowsAvailable {
            pipeline_id: self.id,
            n_rows,
            timestamp: Utc::now(),
        });
        let shared = Arc::clone(self);
        let submitted = self.estimator_worker.submit(JobPriority::Normal, move |cancel| {
            let kind = *shared.current.lock().unwrap();
            let runner = shared.runner(kind);
            let mut runner = runner.lock().unwrap();
            let rows = shared.rows.prefix(n_rows);
            runner.new_rows_available(&rows, cancel, &shared.notifier(kind));
        });
        if let Err(e) = submitted {
            warn!("Dropping row batch: {}", e);
        }
    }

    fn last_row_rung(self: &Arc<Self>) {
        self.all_rows_rung.store(true, Ordering::Release);
        let n_rows = self.rows.len();
        info!("Pipeline {}: last row rung, {} rows", self.id, n_rows);
        self.events.emit_lossy(CasEvent::LastRowRung {
            pipeline_id: self.id,
            n_rows,
            timestamp: Utc::now(),
        });
        let shared = Arc::clone(self);
        let submitted = self.estimator_worker.submit(JobPriority::Cleanup, move |cancel| {
            if cancel.is_cancelled() {
                return;
            }
            let kind = *shared.current.lock().unwrap();
            let runner = shared.runner(kind);
            let mut runner = runner.lock().unwrap();
            runner.last_row_rung(&*shared.rows, &shared.notifier(kind));
        });
        if let Err(e) = submitted {
            warn!("Dropping end of input: {}", e);
        }
    }

    fn switch_estimator(&self, kind: EstimatorKind, cancel: &CancelToken) {
        *self.current.lock().unwrap() = kind;
        info!("Pipeline {}: estimator set to {}", self.id, kind);
        self.events.emit_lossy(CasEvent::EstimatorSelected {
            pipeline_id: self.id,
            estimator: kind.to_string(),
            timestamp: Utc::now(),
        });

        let runner = self.runner(kind);
        let mut runner = runner.lock().unwrap();
        let notifier = self.notifier(kind);
        let rows: &RowStore = &self.rows;
        runner.new_rows_available(rows, cancel, &notifier);
        if self.all_rows_rung.load(Ordering::Acquire)
            && !cancel.is_cancelled()
            && runner.rows_processed() == rows.n_rows()
        {
            runner.last_row_rung(rows, &notifier);
        }
    }
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Hands estimator progress to the notification worker
struct Notifier {
    pipeline_id: Uuid,
    kind: EstimatorKind,
    events: EventBus,
    worker: Arc<WorkScheduler>,
}

impl Notifier {
    fn publish(&self, priority: JobPriority, event: CasEvent) {
        let events = self.events.clone();
        if let Err(e) = self.worker.submit(priority, move |_| events.emit_lossy(event)) {
            debug!("Notification dropped: {}", e);
        }
    }
}

impl AnalysisListener for Notifier {
    fn new_estimate_available(&self, _estimator: &str, n_rows: usize) {
        self.publish(
            JobPriority::Normal,
            CasEvent::EstimatesAvailable {
                pipeline_id: self.pipeline_id,
                estimator: self.kind.to_string(),
                n_rows,
                timestamp: Utc::now(),
            },
        );
    }

    fn analysis_complete(&self, _estimator: &str, n_rows: usize) {
        self.publish(
            JobPriority::Cleanup,
            CasEvent::AnalysisComplete {
                pipeline_id: self.pipeline_id,
                estimator: self.kind.to_string(),
                n_rows,
                timestamp: Utc::now(),
            },
        );
    }
}

/// Producer-side handle: feed strikes in, then signal the end
pub struct PipelineInput {
    shared: Arc<Shared>,
    chain: CorrectionChain,
    accumulator: RowAccumulator,
    finished: bool,
}

impl PipelineInput {
    fn accumulate(&mut self, bongs: Vec<Bong>) {
        let mut published = None;
        for bong in bongs {
            if let Some(n_rows) = self.accumulator.push(bong) {
                published = Some(n_rows);
            }
        }
        if let Some(n_rows) = published {
            self.shared.rows_available(n_rows);
        }
    }

    /// Flush the chain and accumulator and tell the estimator no more rows
    /// are coming
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let flushed = self.chain.finish();
        self.accumulate(flushed);
        let before = self.shared.rows.len();
        let n_rows = self.accumulator.finish();
        if n_rows > before {
            self.shared.rows_available(n_rows);
        }
        self.shared.last_row_rung();
    }
}

impl BongSink for PipelineInput {
    fn bong(&mut self, bong: Bong) {
        if self.finished {
            warn!("Strike after end of input ignored: {}", bong);
            return;
        }
        let corrected = self.chain.push(bong);
        self.accumulate(corrected);
    }

    fn input_complete(&mut self) {
        info!("Pipeline {}: input complete", self.shared.id);
        self.finish();
    }

    fn input_error(&mut self, err: &cas_common::Error) {
        error!("Pipeline {}: input failed: {}", self.shared.id, err);
        self.shared.events.emit_lossy(CasEvent::InputFailed {
            pipeline_id: self.shared.id,
            error: err.to_string(),
            timestamp: Utc::now(),
        });
        // Analyse what was read before the error
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas_common::Stroke;

    fn feed_rounds(input: &mut PipelineInput, n_rows: usize, bells: u8) {
        let mut t = 0;
        for i in 0..n_rows {
            let handstroke = i % 2 == 0;
            if handstroke && i > 0 {
                t += 200;
            }
            for bell in 1..=bells {
                input.bong(Bong::new(bell, t, Stroke::from_handstroke(handstroke)));
                t += 200;
            }
        }
    }

    #[test]
    fn test_rows_flow_through_to_estimates() {
        let pipeline = Pipeline::new(CasConfig::default(), EventBus::new(1000)).unwrap();
        let mut input = pipeline.input(InputFormat::Cas, "test").unwrap();
        feed_rounds(&mut input, 8, 6);
        input.input_complete();
        pipeline.wait_idle();

        assert_eq!(pipeline.n_rows(), 8);
        assert!(pipeline.is_all_rows_rung());
        let stats = pipeline.snapshot();
        assert_eq!(stats.n_rows(), 8);
        assert_eq!(stats.n_bells(), 6);
    }

    #[test]
    fn test_second_input_rejected() {
        let pipeline = Pipeline::new(CasConfig::default(), EventBus::new(16)).unwrap();
        let _input = pipeline.input(InputFormat::Cas, "first").unwrap();
        assert!(pipeline.input(InputFormat::Lowndes, "second").is_err());
    }

    #[test]
    fn test_unknown_estimator_in_config_rejected() {
        let mut config = CasConfig::default();
        config.analysis.estimator = "guesswork".to_string();
        assert!(Pipeline::new(config, EventBus::new(16)).is_err());
    }

    #[test]
    fn test_switching_estimator_catches_up() {
        let pipeline = Pipeline::new(CasConfig::default(), EventBus::new(1000)).unwrap();
        let mut input = pipeline.input(InputFormat::Cas, "test").unwrap();
        feed_rounds(&mut input, 10, 6);
        input.input_complete();
        pipeline.wait_idle();

        pipeline.set_estimator(EstimatorKind::RodModel).unwrap();
        pipeline.wait_idle();
        assert_eq!(pipeline.current_estimator(), EstimatorKind::RodModel);
        assert_eq!(pipeline.snapshot().n_rows(), 10);
        assert_eq!(pipeline.snapshot_for(EstimatorKind::SimpleAverager).n_rows(), 10);
        assert_eq!(pipeline.snapshot_for(EstimatorKind::LastBellPerfect).n_rows(), 0);
    }

    #[test]
    fn test_stop_rejects_further_work() {
        let pipeline = Pipeline::new(CasConfig::default(), EventBus::new(16)).unwrap();
        pipeline.stop();
        assert!(pipeline.set_estimator(EstimatorKind::RodModel).is_err());
    }
}
