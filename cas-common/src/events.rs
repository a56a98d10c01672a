//! Event types for the analysis pipeline
//!
//! Progress of an analysis run is published as [`CasEvent`]s on an
//! [`EventBus`]. Observers (the CLI progress display, tests) subscribe; the
//! pipeline never waits for them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline progress events
///
/// Every event names the pipeline that emitted it, so a single bus can be
/// shared by several concurrent analyses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CasEvent {
    /// Input source opened and reading has begun
    InputStarted {
        pipeline_id: Uuid,
        /// Display name of the source (usually a file path)
        source: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// More complete rows are available from the row accumulator
    RowsAvailable {
        pipeline_id: Uuid,
        /// Total rows accumulated so far
        n_rows: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Input is complete and the final rows have been published
    LastRowRung {
        pipeline_id: Uuid,
        n_rows: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Input stopped with an error; no further rows will arrive
    InputFailed {
        pipeline_id: Uuid,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An estimator was selected as the active one
    EstimatorSelected {
        pipeline_id: Uuid,
        estimator: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The active estimator produced more averaged rows
    EstimatesAvailable {
        pipeline_id: Uuid,
        estimator: String,
        /// Averaged rows in the estimator's store
        n_rows: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The active estimator has processed every row of a finished input
    AnalysisComplete {
        pipeline_id: Uuid,
        estimator: String,
        n_rows: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl CasEvent {
    /// Event type name, matching the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            CasEvent::InputStarted { .. } => "InputStarted",
            CasEvent::RowsAvailable { .. } => "RowsAvailable",
            CasEvent::LastRowRung { .. } => "LastRowRung",
            CasEvent::InputFailed { .. } => "InputFailed",
            CasEvent::EstimatorSelected { .. } => "EstimatorSelected",
            CasEvent::EstimatesAvailable { .. } => "EstimatesAvailable",
            CasEvent::AnalysisComplete { .. } => "AnalysisComplete",
        }
    }

    pub fn pipeline_id(&self) -> Uuid {
        match self {
            CasEvent::InputStarted { pipeline_id, .. }
            | CasEvent::RowsAvailable { pipeline_id, .. }
            | CasEvent::LastRowRung { pipeline_id, .. }
            | CasEvent::InputFailed { pipeline_id, .. }
            | CasEvent::EstimatorSelected { pipeline_id, .. }
            | CasEvent::EstimatesAvailable { pipeline_id, .. }
            | CasEvent::AnalysisComplete { pipeline_id, .. } => *pipeline_id,
        }
    }
}

/// Broadcast bus for [`CasEvent`]s
///
/// Cloning the bus shares the underlying channel. Slow subscribers lose the
/// oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CasEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<CasEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: CasEvent) -> Result<usize, broadcast::error::SendError<CasEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CasEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
