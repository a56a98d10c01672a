//! Lowndes fixed-width strike format
//!
//! Lines are exactly ten characters: `S B XXXX` with the stroke at 0, the
//! bell at 2 and a 16-bit hex time at 6..10. The time wraps; every time it
//! goes backwards another 0x10000 ms is added. Stroke characters are checked
//! but not used, since the data usually comes from sensors or audio that
//! cannot tell the strokes apart.

use std::io::BufRead;

use cas_common::bells::bell_from_char;
use cas_common::{Bong, Error, Result, Stroke};
use tracing::warn;

use super::{is_comment, BongSink};

const LINE_LENGTH: usize = 10;
const TIME_WRAP: i64 = 0x10000;

#[derive(Debug, Default)]
pub struct LowndesReader {
    last_time: i64,
    high_time: i64,
}

impl LowndesReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_my_type(line: &str) -> bool {
        line.len() == LINE_LENGTH && (line.starts_with("H ") || line.starts_with("B "))
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
        let bytes = line.as_bytes();
        if !matches!(bytes[0], b'H' | b'B') {
            return Err(Error::format(
                line_number,
                format!("bad stroke character '{}'", bytes[0] as char),
            ));
        }
        let Some(bell) = bell_from_char(bytes[2] as char) else {
            warn!("Line {}: skipping unknown bell '{}'", line_number, bytes[2] as char);
            return Ok(None);
        };
        let time = i64::from_str_radix(&line[6..LINE_LENGTH], 16)
            .map_err(|_| Error::format(line_number, format!("bad hex time: '{}'", line)))?;

        if time < self.last_time {
            self.high_time += TIME_WRAP;
        }
        self.last_time = time;
        Ok(Some(Bong::new(bell, time + self.high_time, Stroke::Unknown)))
    }
}
