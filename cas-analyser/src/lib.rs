//! # CAS Striking Analyser Library (cas-analyser)
//!
//! Reconstructs per-bell striking from a noisy stream of single-bell strike
//! events and derives accuracy statistics.
//!
//! **Architecture:** input reader → correction chain → row accumulator →
//! estimator (on a worker) → averaged-row store → statistics snapshot.
//!
//! The input thread drives the whole correction chain synchronously. Row
//! delivery to the active estimator, and estimate delivery to observers, go
//! through two priority-coalescing [`scheduler::WorkScheduler`]s.

pub mod accumulator;
pub mod averaged;
pub mod correction;
pub mod error;
pub mod estimator;
pub mod input;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod summary;

pub use error::{Error, Result};
pub use pipeline::Pipeline;
