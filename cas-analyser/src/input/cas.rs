//! CAS row format reader and writer

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use cas_common::bells::{bell_char, bell_from_char};
use cas_common::{Bong, Error, Result, Row, Stroke};

use super::{is_comment, BongSink};

/// First line of a CAS file
pub const CAS_HEADER: &str = "CAS";

/// Reads CAS row lines
///
/// Deltas accumulate across the whole file, so timestamps are relative to the
/// start of the recording.
#[derive(Debug, Default)]
pub struct CasReader {
    time: i64,
}

impl CasReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_my_type(line: &str) -> bool {
        line.starts_with(CAS_HEADER)
    }

    /// Push every strike in `reader` into `sink`; stops at the first bad line
    pub fn read<R: BufRead>(&mut self, reader: R, sink: &mut dyn BongSink) -> Result<usize> {
        let mut count = 0;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if is_comment(line) || Self::is_my_type(line) {
                continue;
            }
            count += self.read_row(index + 1, line, sink)?;
        }
        Ok(count)
    }

    fn read_row(&mut self, line_number: usize, line: &str, sink: &mut dyn BongSink) -> Result<usize> {
        let mut tokens = line.split_whitespace();
        let stroke = match tokens.next() {
            Some("H") => Stroke::Hand,
            Some("B") => Stroke::Back,
            other => {
                return Err(Error::format(
                    line_number,
                    format!("bad stroke character '{}'", other.unwrap_or_default()),
                ))
            }
        };

        let mut count = 0;
        while let Some(bell_token) = tokens.next() {
            let bell = single_char(bell_token)
                .and_then(bell_from_char)
                .ok_or_else(|| {
                    Error::format(line_number, format!("bad bell character '{}'", bell_token))
                })?;
            let delta_token = tokens.next().ok_or_else(|| {
                Error::format(line_number, format!("missing time for bell {}", bell_token))
            })?;
            let delta: i64 = delta_token.parse().map_err(|_| {
                Error::format(line_number, format!("bad time '{}'", delta_token))
            })?;
            self.time += delta;
            sink.bong(Bong::new(bell, self.time, stroke));
            count += 1;
        }
        Ok(count)
    }
}

fn single_char(token: &str) -> Option<char> {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

/// Write `rows` in CAS format
///
/// Each delta is the time since the previous strike in the file; the first
/// is the time since zero, so reading the output back gives the same times.
pub fn write_cas<W: Write>(rows: &[Arc<Row>], mut out: W) -> io::Result<()> {
    writeln!(out, "{}", CAS_HEADER)?;
    let mut previous = 0;
    for row in rows {
        let mut line = String::from(row.stroke().as_str());
        for bong in row.iter() {
            let c = bell_char(bong.bell).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bell {} has no row notation character", bong.bell),
                )
            })?;
            line.push_str(&format!(" {} {}", c, bong.time - previous));
            previous = bong.time;
        }
        writeln!(out, "{}", line)?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(content: &str) -> Result<Vec<Bong>> {
        let mut bongs = Vec::new();
        CasReader::new().read(content.as_bytes(), &mut bongs)?;
        Ok(bongs)
    }

    #[test]
    fn test_deltas_accumulate_across_lines() {
        let bongs = read("CAS\nH 1 100 2 200\nB 2 250 1 200\n").unwrap();
        let times: Vec<i64> = bongs.iter().map(|b| b.time).collect();
        assert_eq!(times, vec![100, 300, 550, 750]);
        assert_eq!(bongs[2], Bong::new(2, 550, Stroke::Back));
    }

    #[test]
    fn test_high_bell_characters() {
        let bongs = read("CAS\nH 0 0 E 10 T 10 O 10\n").unwrap();
        let bells: Vec<u8> = bongs.iter().map(|b| b.bell).collect();
        assert_eq!(bells, vec![10, 11, 12, 10]);
    }

    #[test]
    fn test_bad_lines_rejected() {
        assert!(matches!(
            read("CAS\nX 1 0\n"),
            Err(Error::Format { line: 2, .. })
        ));
        assert!(read("CAS\nH 1 0 Z 10\n").is_err());
        assert!(read("CAS\nH 1 0 2\n").is_err());
        assert!(read("CAS\nH 1 0 2 soon\n").is_err());
    }

    #[test]
    fn test_written_rows_read_back() {
        let hand = Row::from_bongs(
            true,
            [(1, 1000), (2, 1210), (3, 1400)].map(|(b, t)| Bong::new(b, t, Stroke::Hand)),
        );
        let back = Row::from_bongs(
            false,
            [(2, 1600), (1, 1790), (3, 2005)].map(|(b, t)| Bong::new(b, t, Stroke::Back)),
        );
        let rows = vec![Arc::new(hand), Arc::new(back)];

        let mut out = Vec::new();
        write_cas(&rows, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "CAS\nH 1 1000 2 210 3 190\nB 2 200 1 190 3 215\n");

        let expected: Vec<Bong> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        assert_eq!(read(&text).unwrap(), expected);
    }
}
