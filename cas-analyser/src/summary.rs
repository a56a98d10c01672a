//! Ranking several touches
//!
//! Each touch is a "band", lettered `A`, `B`, ... in the order given. Every
//! analysis produces a [`BandOrder`]: the bands sorted best first, smaller
//! results being better. Faults are counted with the last-bell-perfect
//! estimator at three fault factors around the configured one, so a ranking
//! that only holds at one factor shows up as a change of order. The average
//! order ranks the bands by their mean normalised position across the
//! analyses.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use cas_common::config::CasConfig;
use cas_common::events::EventBus;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::estimator::EstimatorKind;
use crate::input::{self, InputFormat};
use crate::stats::TouchStats;
use crate::Pipeline;

/// Multiples of the configured fault factor used for the fault rankings
pub const FAULT_FACTOR_SCALES: [f64; 3] = [0.9, 1.0, 1.1];

/// Name of the order averaged over every analysis
pub const AVERAGE_ORDER: &str = "Average of all analyses";

/// One touch taking part in the ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub letter: char,
    pub source: String,
    pub n_rows: usize,
}

/// A band's score in one analysis; smaller is better
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandResult {
    pub band: char,
    pub result: f64,
}

/// Bands sorted by one analysis, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandOrder {
    pub analysis: String,
    pub results: Vec<BandResult>,
}

impl BandOrder {
    /// Sort `results`; equal results fall back to band letter
    pub fn new(analysis: impl Into<String>, mut results: Vec<BandResult>) -> Self {
        results.sort_by(|a, b| match a.result.total_cmp(&b.result) {
            Ordering::Equal => a.band.cmp(&b.band),
            other => other,
        });
        Self {
            analysis: analysis.into(),
            results,
        }
    }

    pub fn result(&self, band: char) -> Option<f64> {
        self.results.iter().find(|r| r.band == band).map(|r| r.result)
    }

    pub fn best(&self) -> Option<f64> {
        self.results.first().map(|r| r.result)
    }

    pub fn worst(&self) -> Option<f64> {
        self.results.last().map(|r| r.result)
    }

    /// Band's result scaled so the best is 0 and the worst 1
    ///
    /// All bands score 0 when every result is equal.
    pub fn normalised(&self, band: char) -> Option<f64> {
        let result = self.result(band)?;
        let (best, worst) = (self.best()?, self.worst()?);
        if worst > best {
            Some((result - best) / (worst - best))
        } else {
            Some(0.0)
        }
    }

    /// Band letters best first, e.g. `CAB`
    pub fn letters(&self) -> String {
        self.results.iter().map(|r| r.band).collect()
    }
}

/// Rankings of a set of touches
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub in_changes_only: bool,
    pub bands: Vec<Band>,
    pub orders: Vec<BandOrder>,
    pub average: Option<BandOrder>,
}

impl Summary {
    /// Rank touches given as `(source, last-bell-perfect statistics)`
    pub fn new(touches: &[(String, TouchStats)], in_changes_only: bool) -> Self {
        let bands: Vec<Band> = touches
            .iter()
            .enumerate()
            .map(|(i, (source, stats))| Band {
                letter: band_letter(i),
                source: source.clone(),
                n_rows: stats.n_rows(),
            })
            .collect();

        let orders: Vec<BandOrder> = FAULT_FACTOR_SCALES
            .iter()
            .map(|scale| {
                let results = bands
                    .iter()
                    .zip(touches)
                    .map(|(band, (_, stats))| BandResult {
                        band: band.letter,
                        result: stats
                            .faults_with_factor(in_changes_only, stats.fault_factor() * scale)
                            as f64,
                    })
                    .collect();
                let factor = touches
                    .first()
                    .map(|(_, stats)| stats.fault_factor() * scale)
                    .unwrap_or(*scale);
                BandOrder::new(format!("Faults (factor {:.3})", factor), results)
            })
            .collect();

        let average = (!bands.is_empty()).then(|| average_order(&bands, &orders));
        Self {
            in_changes_only,
            bands,
            orders,
            average,
        }
    }
}

fn band_letter(index: usize) -> char {
    char::from_u32('A' as u32 + index as u32).unwrap_or('?')
}

fn average_order(bands: &[Band], orders: &[BandOrder]) -> BandOrder {
    let results = bands
        .iter()
        .filter_map(|band| {
            let scores: Vec<f64> = orders
                .iter()
                .filter_map(|order| order.normalised(band.letter))
                .collect();
            (!scores.is_empty()).then(|| BandResult {
                band: band.letter,
                result: scores.iter().sum::<f64>() / scores.len() as f64,
            })
        })
        .collect();
    BandOrder::new(AVERAGE_ORDER, results)
}

/// Analyse one touch file with the last-bell-perfect estimator
///
/// A file that stops with a format error still contributes the rows read
/// before the error.
pub fn analyse_touch(path: &Path, config: &CasConfig) -> Result<TouchStats> {
    let mut config = config.clone();
    config.analysis.estimator = EstimatorKind::LastBellPerfect.to_string();

    let content = fs::read_to_string(path)?;
    let format: InputFormat = input::detect_format(&content)?;
    let pipeline = Pipeline::new(config, EventBus::new(64))?;
    let mut sink = pipeline.input(format, &path.display().to_string())?;
    let options = pipeline.read_options();
    if let Err(e) = input::read_into_with(format, content.as_bytes(), &options, &mut sink) {
        warn!("{}: {}; ranking the rows read so far", path.display(), e);
    }
    pipeline.wait_idle();
    let stats = pipeline.snapshot();
    pipeline.stop();
    Ok(stats)
}

/// Analyse and rank every file; touches with no rows are left out
pub fn summarise_files<P: AsRef<Path>>(
    paths: &[P],
    config: &CasConfig,
    in_changes_only: bool,
) -> Result<Summary> {
    let mut touches = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let stats = analyse_touch(path, config)?;
        if stats.n_rows() == 0 {
            warn!("{} has no rows; left out of the ranking", path.display());
            continue;
        }
        info!("{}: {} rows", path.display(), stats.n_rows());
        touches.push((path.display().to_string(), stats));
    }
    Ok(Summary::new(&touches, in_changes_only))
}
