//! Striking data input
//!
//! Readers turn a text source into a stream of [`Bong`]s pushed into a
//! [`BongSink`]: one `bong` per strike, then exactly one of `input_complete`
//! or `input_error`. Strikes delivered before an error remain valid.
//!
//! Three file formats are understood, told apart by their first non-comment
//! line:
//!
//! * **CAS** - a `CAS` header, then one row per line: `H 1 0 2 212 3 198 ...`
//!   with the delta in ms since the previous strike.
//! * **Lowndes** - one strike per fixed-width line, `H 1 0X1A2F`, with a
//!   16-bit hex timestamp that wraps; strokes are not trusted.
//! * **Bagley** - one strike per line, bell character then eight digits of
//!   ms, `300012345`; strokes are guessed and odd-struck offsets apply.

pub mod bagley;
mod cas;
mod lowndes;

use std::fmt;
use std::fs;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

use cas_common::config::CasConfig;
use cas_common::Bong;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{Error, Result};

pub use bagley::BagleyReader;
pub use cas::{write_cas, CasReader, CAS_HEADER};
pub use lowndes::LowndesReader;

/// Characters that start a comment line
const COMMENT_CHARS: &[char] = &['*', '#'];

/// Receives strikes from an input reader
pub trait BongSink {
    /// One strike; any order the time-ordering stage can repair is allowed
    fn bong(&mut self, bong: Bong);

    /// End of input; called once, never after `input_error`
    fn input_complete(&mut self);

    /// The source cannot be read further
    fn input_error(&mut self, error: &cas_common::Error);
}

impl BongSink for Vec<Bong> {
    fn bong(&mut self, bong: Bong) {
        self.push(bong);
    }

    fn input_complete(&mut self) {}

    fn input_error(&mut self, _error: &cas_common::Error) {}
}

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Cas,
    Lowndes,
    Bagley,
}

impl InputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            InputFormat::Cas => "cas",
            InputFormat::Lowndes => "lowndes",
            InputFormat::Bagley => "bagley",
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cas" => Ok(InputFormat::Cas),
            "lowndes" => Ok(InputFormat::Lowndes),
            "bagley" => Ok(InputFormat::Bagley),
            other => Err(Error::Input(format!("Unknown input format '{}'", other))),
        }
    }
}

/// Reader settings that come from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// A Bagley bell struck again sooner than this is a sensor fault
    pub quickest_strike_ms: i64,
    pub drop_sixth_ghosts: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::from(&CasConfig::default())
    }
}

impl From<&CasConfig> for ReadOptions {
    fn from(config: &CasConfig) -> Self {
        Self {
            quickest_strike_ms: config.correction.echo_window_ms,
            drop_sixth_ghosts: config.input.bagley_drop_sixth_ghosts,
        }
    }
}

/// True for blank lines and lines starting with a comment character
pub(crate) fn is_comment(line: &str) -> bool {
    line.is_empty() || line.starts_with(COMMENT_CHARS)
}

/// Work out the format from the first non-comment line
pub fn detect_format(content: &str) -> Result<InputFormat> {
    let line = content
        .lines()
        .map(str::trim)
        .find(|line| !is_comment(line))
        .ok_or_else(|| Error::Input("File is empty".to_string()))?;

    if CasReader::is_my_type(line) {
        Ok(InputFormat::Cas)
    } else if LowndesReader::is_my_type(line) {
        Ok(InputFormat::Lowndes)
    } else if BagleyReader::is_my_type(line) {
        Ok(InputFormat::Bagley)
    } else {
        Err(Error::Input(
            "File is not in a recognised striking data format".to_string(),
        ))
    }
}

/// Read `reader` as `format` with default reader settings
///
/// Reports a format error to the sink as well as returning it. Returns the
/// number of strikes delivered.
pub fn read_into<R: BufRead>(
    format: InputFormat,
    reader: R,
    sink: &mut dyn BongSink,
) -> Result<usize> {
    read_into_with(format, reader, &ReadOptions::default(), sink)
}

/// Read `reader` as `format`, pushing strikes into `sink`
pub fn read_into_with<R: BufRead>(
    format: InputFormat,
    reader: R,
    options: &ReadOptions,
    sink: &mut dyn BongSink,
) -> Result<usize> {
    let result = match format {
        InputFormat::Cas => CasReader::new().read(reader, sink),
        InputFormat::Lowndes => LowndesReader::new().read(reader, sink),
        InputFormat::Bagley => BagleyReader::new(options).read(reader, sink),
    };
    match result {
        Ok(n) => {
            sink.input_complete();
            Ok(n)
        }
        Err(e) => {
            error!("{} input failed: {}", format, e);
            sink.input_error(&e);
            Err(e.into())
        }
    }
}

/// Read a whole file, detecting its format unless one is given
pub fn read_file(
    path: &Path,
    format: Option<InputFormat>,
    sink: &mut dyn BongSink,
) -> Result<InputFormat> {
    read_file_with(path, format, &ReadOptions::default(), sink)
}

pub fn read_file_with(
    path: &Path,
    format: Option<InputFormat>,
    options: &ReadOptions,
    sink: &mut dyn BongSink,
) -> Result<InputFormat> {
    let content = fs::read_to_string(path)?;
    let format = match format {
        Some(format) => format,
        None => detect_format(&content)?,
    };
    info!("Reading {} as {} data", path.display(), format);
    let n = read_into_with(format, content.as_bytes(), options, sink)?;
    info!("Read {} strikes from {}", n, path.display());
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_cas() {
        let content = "# recorded at practice\n\nCAS 1.0\nH 1 0 2 200\n";
        assert_eq!(detect_format(content).unwrap(), InputFormat::Cas);
    }

    #[test]
    fn test_detect_lowndes() {
        let content = "* Lowndes export\nH 1 0X0010\nH 2 0X00D8\n";
        assert_eq!(detect_format(content).unwrap(), InputFormat::Lowndes);
    }

    #[test]
    fn test_detect_bagley() {
        let content = "# tower sensors\n100001000\n200001210\n";
        assert_eq!(detect_format(content).unwrap(), InputFormat::Bagley);
    }

    #[test]
    fn test_detect_rejects_unknown_and_empty() {
        assert!(detect_format("hello world\n").is_err());
        assert!(detect_format("").is_err());
        assert!(detect_format("# only a comment\n").is_err());
    }

    #[test]
    fn test_format_names() {
        assert_eq!("CAS".parse::<InputFormat>().unwrap(), InputFormat::Cas);
        assert_eq!("lowndes".parse::<InputFormat>().unwrap(), InputFormat::Lowndes);
        assert_eq!("Bagley".parse::<InputFormat>().unwrap(), InputFormat::Bagley);
        assert!("abel".parse::<InputFormat>().is_err());
    }

    #[derive(Default)]
    struct Recorder {
        bongs: Vec<Bong>,
        completed: usize,
        errors: Vec<String>,
    }

    impl BongSink for Recorder {
        fn bong(&mut self, bong: Bong) {
            self.bongs.push(bong);
        }

        fn input_complete(&mut self) {
            self.completed += 1;
        }

        fn input_error(&mut self, error: &cas_common::Error) {
            self.errors.push(error.to_string());
        }
    }

    #[test]
    fn test_error_stops_input_and_keeps_earlier_strikes() {
        let content = "CAS\nH 1 0 2 200\nB 1 x\nH 1 100\n";
        let mut sink = Recorder::default();
        assert!(read_into(InputFormat::Cas, content.as_bytes(), &mut sink).is_err());
        assert_eq!(sink.bongs.len(), 2);
        assert_eq!(sink.completed, 0);
        assert_eq!(sink.errors.len(), 1);
        assert!(sink.errors[0].contains("line 3"));
    }

    #[test]
    fn test_complete_called_once() {
        let mut sink = Recorder::default();
        let n = read_into(InputFormat::Cas, "CAS\nH 1 0 2 200\n".as_bytes(), &mut sink).unwrap();
        assert_eq!(n, 2);
        assert_eq!(sink.completed, 1);
        assert!(sink.errors.is_empty());
    }
}
