//! Configuration loading and config file resolution
//!
//! All tuning knobs of the correction chain and the statistics layer live in
//! a single TOML file. Every field has a built-in default, so an empty file
//! (or no file at all) yields the standard configuration.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. `<config dir>/cas/config.toml`
//! 4. Built-in defaults (fallback)
//!
//! ```toml
//! [correction]
//! time_order_window_ms = 5000
//! echo_window_ms = 50
//!
//! [analysis]
//! estimator = "rod-model"
//! in_changes_sensitivity = 1
//!
//! [odd_struck]
//! hand = [0, 12, 0]
//! back = [0, -8, 25]
//!
//! [logging]
//! level = "debug"
//! ```

use crate::odd_struck::OddStruck;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "CAS_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CasConfig {
    #[serde(default)]
    pub correction: CorrectionConfig,

    #[serde(default)]
    pub rows: RowConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub odd_struck: OddStruckConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Thresholds for the correction stages
///
/// The values are empirically tuned; the defaults are the ones the stages
/// were tuned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Largest time error between two events that can still be out of order
    #[serde(default = "default_time_order_window_ms")]
    pub time_order_window_ms: i64,

    /// Strikes of the same bell closer together than this are sensor echoes
    #[serde(default = "default_echo_window_ms")]
    pub echo_window_ms: i64,

    /// Double-strike test: total span of the three strikes must be below
    /// this multiple of the average cross-row separation
    #[serde(default = "default_extraneous_span_factor")]
    pub extraneous_span_factor: f64,

    /// How many strikes may already have started the next row while a late
    /// bell is still accepted into the current one
    #[serde(default)]
    pub overlap_tolerance: usize,

    /// A lie bell is moved to the next lead only if its last good place is
    /// in the front `1/lead_lie_front_divisor` of the row
    #[serde(default = "default_lead_lie_front_divisor")]
    pub lead_lie_front_divisor: usize,

    /// Stroke given to the first row by stroke assignment
    #[serde(default = "default_true")]
    pub initial_handstroke: bool,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            time_order_window_ms: default_time_order_window_ms(),
            echo_window_ms: default_echo_window_ms(),
            extraneous_span_factor: default_extraneous_span_factor(),
            overlap_tolerance: 0,
            lead_lie_front_divisor: default_lead_lie_front_divisor(),
            initial_handstroke: true,
        }
    }
}

/// Row classification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowConfig {
    /// Adjacent bells this close together still count as rounds when swapped
    #[serde(default = "default_rounds_swap_tolerance_ms")]
    pub rounds_swap_tolerance_ms: i64,
}

impl Default for RowConfig {
    fn default() -> Self {
        Self {
            rounds_swap_tolerance_ms: default_rounds_swap_tolerance_ms(),
        }
    }
}

/// Estimation and statistics settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Estimator selected at startup
    #[serde(default = "default_estimator")]
    pub estimator: String,

    /// Handstroke gap, as a proportion of the inter-bell gap, for estimators
    /// that use a constant value
    #[serde(default = "default_handstroke_gap")]
    pub handstroke_gap: f64,

    /// Run length at which an in-changes/rounds classification is certain
    #[serde(default = "default_in_changes_sensitivity")]
    pub in_changes_sensitivity: usize,

    /// Errors are truncated to multiples of this for discrete variance
    #[serde(default = "default_discrete_threshold_ms")]
    pub discrete_threshold_ms: f64,

    /// Rows with a standard deviation at or below this are good
    #[serde(default = "default_good_cutoff_ms")]
    pub good_cutoff_ms: f64,

    /// Rows with a standard deviation at or above this are bad
    #[serde(default = "default_bad_cutoff_ms")]
    pub bad_cutoff_ms: f64,

    /// Adjacent strikes closer than this fraction of the row's mean gap are faults
    #[serde(default = "default_fault_factor")]
    pub fault_factor: f64,

    #[serde(default = "default_max_faults_per_row")]
    pub max_faults_per_row: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            estimator: default_estimator(),
            handstroke_gap: default_handstroke_gap(),
            in_changes_sensitivity: default_in_changes_sensitivity(),
            discrete_threshold_ms: default_discrete_threshold_ms(),
            good_cutoff_ms: default_good_cutoff_ms(),
            bad_cutoff_ms: default_bad_cutoff_ms(),
            fault_factor: default_fault_factor(),
            max_faults_per_row: default_max_faults_per_row(),
        }
    }
}

/// Reader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Bagley sensors report the sixth three times in quick succession; keep
    /// only the first and fourth of each group of four
    #[serde(default = "default_true")]
    pub bagley_drop_sixth_ghosts: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            bagley_drop_sixth_ghosts: true,
        }
    }
}

/// Odd-struck offsets, given inline or as a file in the odd-struck text form
///
/// A `file` replaces the inline lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OddStruckConfig {
    /// Handstroke offsets in ms, treble first
    #[serde(default)]
    pub hand: Vec<i64>,

    /// Backstroke offsets in ms, treble first
    #[serde(default)]
    pub back: Vec<i64>,

    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl OddStruckConfig {
    /// Build the offset table, reading `file` if one is named
    pub fn table(&self) -> Result<OddStruck> {
        match &self.file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!(
                        "Failed to read odd-struck file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let table = OddStruck::parse(&text)?;
                info!("Loaded odd-struck offsets from {}", path.display());
                Ok(table)
            }
            None => OddStruck::from_offsets(&self.hand, &self.back),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_time_order_window_ms() -> i64 {
    5000
}

fn default_echo_window_ms() -> i64 {
    50
}

fn default_extraneous_span_factor() -> f64 {
    1.2
}

fn default_lead_lie_front_divisor() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_rounds_swap_tolerance_ms() -> i64 {
    crate::row::DEFAULT_ROUNDS_SWAP_TOLERANCE_MS
}

fn default_estimator() -> String {
    "simple-averager".to_string()
}

fn default_handstroke_gap() -> f64 {
    1.0
}

fn default_in_changes_sensitivity() -> usize {
    1
}

fn default_discrete_threshold_ms() -> f64 {
    30.0
}

fn default_good_cutoff_ms() -> f64 {
    30.0
}

fn default_bad_cutoff_ms() -> f64 {
    60.0
}

fn default_fault_factor() -> f64 {
    0.75
}

fn default_max_faults_per_row() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl CasConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CasConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the config file by priority and load it, falling back to defaults
    ///
    /// An explicitly named file (CLI or environment) must exist and parse;
    /// the per-user default location is optional.
    pub fn load_resolved(cli_arg: Option<&Path>, env_var_name: &str) -> Result<Self> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return Self::load(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(env_var_name) {
            return Self::load(Path::new(&path));
        }

        // Priority 3: Per-user config file
        if let Some(path) = default_config_file() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        // Priority 4: Built-in defaults
        debug!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        let c = &self.correction;
        if c.time_order_window_ms < 0 {
            return Err(Error::Config("time_order_window_ms must not be negative".to_string()));
        }
        if c.echo_window_ms < 0 {
            return Err(Error::Config("echo_window_ms must not be negative".to_string()));
        }
        if c.extraneous_span_factor <= 0.0 {
            return Err(Error::Config("extraneous_span_factor must be positive".to_string()));
        }
        if c.lead_lie_front_divisor == 0 {
            return Err(Error::Config("lead_lie_front_divisor must be at least 1".to_string()));
        }
        if self.rows.rounds_swap_tolerance_ms < 0 {
            return Err(Error::Config("rounds_swap_tolerance_ms must not be negative".to_string()));
        }

        if self.odd_struck.file.is_none() {
            OddStruck::from_offsets(&self.odd_struck.hand, &self.odd_struck.back)?;
        }

        let a = &self.analysis;
        if a.in_changes_sensitivity == 0 {
            return Err(Error::Config("in_changes_sensitivity must be at least 1".to_string()));
        }
        if a.discrete_threshold_ms <= 0.0 {
            return Err(Error::Config("discrete_threshold_ms must be positive".to_string()));
        }
        if a.good_cutoff_ms > a.bad_cutoff_ms {
            return Err(Error::Config(format!(
                "good_cutoff_ms ({}) must not exceed bad_cutoff_ms ({})",
                a.good_cutoff_ms, a.bad_cutoff_ms
            )));
        }
        if a.fault_factor <= 0.0 {
            return Err(Error::Config("fault_factor must be positive".to_string()));
        }
        if a.handstroke_gap < 0.0 {
            return Err(Error::Config("handstroke_gap must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Per-user config file location for the platform
fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cas").join("config.toml"))
}
