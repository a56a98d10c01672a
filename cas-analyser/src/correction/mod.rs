//! Correction chain
//!
//! Raw strike events are repaired by a fixed sequence of heuristic stages
//! before they reach the row accumulator. Each stage is single-pass with a
//! bounded lookahead buffer (at most two rows) and never backtracks beyond it.
//!
//! The chain is an ordered list of stage objects composed once, at pipeline
//! start. Stages do not know about each other: each one returns the events it
//! releases and the chain feeds them to the next stage.
//!
//! No stage fails on bad data. Ambiguous cases fall back to starting a new
//! row; strikes that cannot be placed are dropped with a diagnostic.

mod echo;
mod extraneous;
mod lead_lie;
mod odd_struck;
mod overlap;
mod stroke;
mod time_order;
mod window;

pub use echo::SensorEchoStage;
pub use extraneous::ExtraneousStrikeStage;
pub use lead_lie::LeadLieStage;
pub use odd_struck::OddStruckStage;
pub use overlap::RowOverlapStage;
pub use stroke::StrokeStage;
pub use time_order::TimeOrderStage;
pub(crate) use window::TwoRowWindow;

use cas_common::bells::is_valid_bell;
use cas_common::config::CasConfig;
use cas_common::{Bong, OddStruck};
use tracing::{debug, warn};

use crate::input::{bagley, InputFormat};

/// One heuristic repair applied to the strike stream
pub trait CorrectionStage: Send {
    /// Stage name for diagnostics
    fn name(&self) -> &'static str;

    /// Accept one event and return the events released downstream, in order
    fn process(&mut self, bong: Bong) -> Vec<Bong>;

    /// End of input: release everything still buffered
    fn finish(&mut self) -> Vec<Bong>;
}

/// Ordered, immutable sequence of correction stages
pub struct CorrectionChain {
    stages: Vec<Box<dyn CorrectionStage>>,
}

impl CorrectionChain {
    pub fn new(stages: Vec<Box<dyn CorrectionStage>>) -> Self {
        Self { stages }
    }

    /// Chain with no stages: events pass straight through
    pub fn passthrough() -> Self {
        Self::new(Vec::new())
    }

    /// Standard chain for an input format
    ///
    /// CAS data may be out of time order, so it gets the time-ordering stage
    /// first. Lowndes data is written in time order and starts at the echo
    /// stage. Bagley data carries guessed strokes only, so it stops after
    /// extraneous-strike removal and leaves row forming to the accumulator.
    ///
    /// Odd-struck offsets, when any are set, are applied ahead of everything
    /// else for the formats whose strikes arrive with a stroke.
    pub fn for_format(format: InputFormat, config: &CasConfig, offsets: &OddStruck) -> Self {
        let c = &config.correction;
        let swap_tolerance_ms = config.rows.rounds_swap_tolerance_ms;

        let mut stages: Vec<Box<dyn CorrectionStage>> = Vec::with_capacity(7);
        if format != InputFormat::Lowndes && !offsets.is_empty() {
            stages.push(Box::new(OddStruckStage::new(*offsets)));
        }
        match format {
            InputFormat::Cas => {
                stages.push(Box::new(TimeOrderStage::new(c.time_order_window_ms)))
            }
            InputFormat::Bagley => {
                stages.push(Box::new(TimeOrderStage::new(bagley::SEQUENCE_ERROR_MS)))
            }
            InputFormat::Lowndes => {}
        }
        stages.push(Box::new(SensorEchoStage::new(c.echo_window_ms)));
        stages.push(Box::new(ExtraneousStrikeStage::new(c.extraneous_span_factor)));
        if format != InputFormat::Bagley {
            stages.push(Box::new(RowOverlapStage::new(c.overlap_tolerance)));
            stages.push(Box::new(StrokeStage::new(c.initial_handstroke)));
            stages.push(Box::new(LeadLieStage::new(
                c.lead_lie_front_divisor,
                swap_tolerance_ms,
            )));
        }

        let chain = Self::new(stages);
        debug!("Correction chain for {:?}: {:?}", format, chain.stage_names());
        chain
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run one event through every stage
    ///
    /// Returns the events that emerge from the final stage. Events with a
    /// bell number outside the supported range are dropped here.
    pub fn push(&mut self, bong: Bong) -> Vec<Bong> {
        if !is_valid_bell(bong.bell) {
            warn!("Ignoring strike of unsupported bell {} at {}ms", bong.bell, bong.time);
            return Vec::new();
        }

        let mut events = vec![bong];
        for stage in self.stages.iter_mut() {
            if events.is_empty() {
                break;
            }
            events = events.into_iter().flat_map(|b| stage.process(b)).collect();
        }
        events
    }

    /// Flush every stage, front to back
    ///
    /// Whatever a stage releases on flush is processed by the following
    /// stages before they are flushed in turn.
    pub fn finish(&mut self) -> Vec<Bong> {
        let mut carried = Vec::new();
        for stage in self.stages.iter_mut() {
            let mut released: Vec<Bong> = carried.into_iter().flat_map(|b| stage.process(b)).collect();
            released.extend(stage.finish());
            carried = released;
        }
        carried
    }
}
