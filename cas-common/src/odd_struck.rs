//! Odd-struck offsets
//!
//! Some bells have a consistent timing bias at one or both strokes, usually
//! because of where the sensor sits. An [`OddStruck`] table holds a fixed
//! offset in ms for each bell and stroke; adding it to a strike time moves the
//! strike to where it was actually heard.
//!
//! The text form has one line per bell, treble first, giving the handstroke
//! and backstroke offsets separated by commas or whitespace:
//!
//! ```text
//! 0, 0
//! 12, -8
//! 0, 25
//! ```

use serde::{Deserialize, Serialize};

use crate::bells::MAX_BELLS;
use crate::{Bong, Error, Result, Stroke};

/// Widest allowed gap between the smallest and largest offset in a table
pub const MAX_OFFSET_SPREAD_MS: i64 = 500;

/// Per-bell, per-stroke strike time offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OddStruck {
    hand: [i64; MAX_BELLS],
    back: [i64; MAX_BELLS],
}

impl Default for OddStruck {
    fn default() -> Self {
        Self {
            hand: [0; MAX_BELLS],
            back: [0; MAX_BELLS],
        }
    }
}

impl OddStruck {
    /// Table with every offset zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from handstroke and backstroke offsets, treble first
    ///
    /// Missing bells get zero offsets.
    pub fn from_offsets(hand: &[i64], back: &[i64]) -> Result<Self> {
        if hand.len() > MAX_BELLS || back.len() > MAX_BELLS {
            return Err(Error::Config(format!(
                "odd-struck table has more than {} bells",
                MAX_BELLS
            )));
        }
        let mut table = Self::new();
        table.hand[..hand.len()].copy_from_slice(hand);
        table.back[..back.len()].copy_from_slice(back);
        table.validate()?;
        Ok(table)
    }

    /// Parse the text form; blank and comment lines are skipped
    pub fn parse(text: &str) -> Result<Self> {
        let mut hand = Vec::new();
        let mut back = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(['*', '#']) {
                continue;
            }
            let mut fields = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|f| !f.is_empty());
            let mut offset = |stroke: &str| -> Result<i64> {
                let field = fields.next().ok_or_else(|| {
                    Error::format(index + 1, format!("missing {} offset", stroke))
                })?;
                field
                    .parse()
                    .map_err(|_| Error::format(index + 1, format!("bad offset '{}'", field)))
            };
            hand.push(offset("handstroke")?);
            back.push(offset("backstroke")?);
        }
        Self::from_offsets(&hand, &back)
    }

    /// Reject tables whose offsets are too far apart to be a sensor bias
    pub fn validate(&self) -> Result<()> {
        let all = self.hand.iter().chain(self.back.iter());
        let min = all.clone().min().copied().unwrap_or(0);
        let max = all.max().copied().unwrap_or(0);
        if max - min > MAX_OFFSET_SPREAD_MS {
            return Err(Error::Config(format!(
                "difference between smallest and largest odd-struck offsets too great: {}ms",
                max - min
            )));
        }
        Ok(())
    }

    /// True if no offset is set
    pub fn is_empty(&self) -> bool {
        self.hand.iter().chain(self.back.iter()).all(|&o| o == 0)
    }

    /// Offset for `bell` at `stroke`; zero for unknown strokes and bells
    pub fn offset(&self, bell: u8, stroke: Stroke) -> i64 {
        let Some(i) = (bell as usize).checked_sub(1).filter(|&i| i < MAX_BELLS) else {
            return 0;
        };
        match stroke {
            Stroke::Hand => self.hand[i],
            Stroke::Back => self.back[i],
            Stroke::Unknown => 0,
        }
    }

    pub fn set(&mut self, bell: u8, stroke: Stroke, offset: i64) {
        if let Some(i) = (bell as usize).checked_sub(1).filter(|&i| i < MAX_BELLS) {
            match stroke {
                Stroke::Hand => self.hand[i] = offset,
                Stroke::Back => self.back[i] = offset,
                Stroke::Unknown => {}
            }
        }
    }

    /// `bong` with its time moved by the offset for its bell and stroke
    pub fn apply(&self, bong: Bong) -> Bong {
        Bong {
            time: bong.time + self.offset(bong.bell, bong.stroke),
            ..bong
        }
    }
}
