//! Bagley strike format
//!
//! One strike per nine-character line: the bell character followed by the
//! strike time as eight decimal digits of ms since recording started, e.g.
//! `300012345`. The sensors cannot tell the strokes apart, so each bell is
//! assumed to start at handstroke and alternate from there; the guess is
//! needed early because odd-struck offsets depend on the stroke.

use std::io::BufRead;

use cas_common::bells::{bell_from_char, BELL_CHARS, MAX_BELLS};
use cas_common::{Bong, Error, Result, Stroke};
use tracing::debug;

use super::{is_comment, BongSink, ReadOptions};

/// Largest gap between two sensor times that may still be out of order
pub const SEQUENCE_ERROR_MS: i64 = 500;

const LINE_LENGTH: usize = 9;
const GHOSTED_BELL: u8 = 6;

#[derive(Debug)]
pub struct BagleyReader {
    quickest_strike_ms: i64,
    drop_sixth_ghosts: bool,
    previous: [Option<Bong>; MAX_BELLS],
    sixth_count: u8,
}

impl Default for BagleyReader {
    fn default() -> Self {
        Self::new(&ReadOptions::default())
    }
}

impl BagleyReader {
    pub fn new(options: &ReadOptions) -> Self {
        Self {
            quickest_strike_ms: options.quickest_strike_ms,
            drop_sixth_ghosts: options.drop_sixth_ghosts,
            previous: [None; MAX_BELLS],
            sixth_count: 0,
        }
    }

    pub(crate) fn is_my_type(line: &str) -> bool {
        let mut chars = line.chars();
        line.len() == LINE_LENGTH
            && chars.next().is_some_and(|c| BELL_CHARS.contains(c))
            && chars.all(|c| c.is_ascii_digit())
    }

    pub fn read<R: BufRead>(&mut self, reader: R, sink: &mut dyn BongSink) -> Result<usize> {
        let mut count = 0;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if is_comment(line) {
                continue;
            }
            if let Some(bong) = self.read_line(index + 1, line)? {
                sink.bong(bong);
                count += 1;
            }
        }
        Ok(count)
    }

    fn read_line(&mut self, line_number: usize, line: &str) -> Result<Option<Bong>> {
        if line.len() != LINE_LENGTH || !line.is_ascii() {
            return Err(Error::format(
                line_number,
                format!("unexpected line length: '{}'", line),
            ));
        }
        let bell_char = line.as_bytes()[0] as char;
        let bell = bell_from_char(bell_char).ok_or_else(|| {
            Error::format(line_number, format!("bad bell character '{}'", bell_char))
        })?;
        if self.drop_sixth_ghosts && bell == GHOSTED_BELL && self.is_sixth_ghost() {
            debug!("Line {}: dropping sensor ghost of the sixth", line_number);
            return Ok(None);
        }
        let time: i64 = line[1..]
            .parse()
            .map_err(|_| Error::format(line_number, format!("bad time: '{}'", line)))?;

        let slot = &mut self.previous[bell as usize - 1];
        let stroke = match slot {
            Some(prev) if time - prev.time < self.quickest_strike_ms => {
                debug!(
                    "Line {}: bell {} struck again after {}ms, ignored",
                    line_number,
                    bell,
                    time - prev.time
                );
                return Ok(None);
            }
            Some(prev) => prev.stroke.flip(),
            None => Stroke::Hand,
        };
        let bong = Bong::new(bell, time, stroke);
        *slot = Some(bong);
        Ok(Some(bong))
    }

    /// Of each four consecutive reports of the sixth, the second and third
    /// are ghosts
    fn is_sixth_ghost(&mut self) -> bool {
        self.sixth_count += 1;
        if self.sixth_count > 3 {
            self.sixth_count = 0;
            false
        } else {
            self.sixth_count > 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_with(content: &str, options: &ReadOptions) -> Result<Vec<Bong>> {
        let mut bongs = Vec::new();
        BagleyReader::new(options).read(content.as_bytes(), &mut bongs)?;
        Ok(bongs)
    }

    fn read(content: &str) -> Result<Vec<Bong>> {
        read_with(content, &ReadOptions::default())
    }

    #[test]
    fn test_line_type() {
        assert!(BagleyReader::is_my_type("100001000"));
        assert!(BagleyReader::is_my_type("E00012345"));
        assert!(!BagleyReader::is_my_type("10000100"));
        assert!(!BagleyReader::is_my_type("X00001000"));
        assert!(!BagleyReader::is_my_type("H 1 0X0100"));
    }

    #[test]
    fn test_strokes_alternate_per_bell() {
        let bongs = read("100001000\n200001200\n100003000\n200003200\n100005200\n").unwrap();
        assert_eq!(
            bongs,
            vec![
                Bong::new(1, 1000, Stroke::Hand),
                Bong::new(2, 1200, Stroke::Hand),
                Bong::new(1, 3000, Stroke::Back),
                Bong::new(2, 3200, Stroke::Back),
                Bong::new(1, 5200, Stroke::Hand),
            ]
        );
    }

    #[test]
    fn test_quick_restrike_ignored() {
        let bongs = read("100001000\n100001020\n100003000\n").unwrap();
        assert_eq!(
            bongs,
            vec![Bong::new(1, 1000, Stroke::Hand), Bong::new(1, 3000, Stroke::Back)]
        );
    }

    #[test]
    fn test_sixth_ghosts_dropped() {
        let content = "600001000\n600001010\n600001020\n600003000\n600005000\n";
        let times: Vec<i64> = read(content).unwrap().iter().map(|b| b.time).collect();
        assert_eq!(times, vec![1000, 3000, 5000]);

        let options = ReadOptions {
            drop_sixth_ghosts: false,
            quickest_strike_ms: 5,
        };
        assert_eq!(read_with(content, &options).unwrap().len(), 5);
    }

    #[test]
    fn test_bad_lines() {
        assert!(matches!(
            read("100001000\n20000120\n"),
            Err(Error::Format { line: 2, .. })
        ));
        assert!(read("X00001000\n").is_err());
        assert!(read("1000O1000\n").is_err());
    }
}
