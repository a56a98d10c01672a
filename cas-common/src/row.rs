//! Rows (changes)
//!
//! A [`Row`] is one change: an ordered sequence of strikes, each bell at most
//! once, with the stroke the row was rung at. Places are 1-based, so place 1
//! is the lead and place `len()` the lie.
//!
//! Rows are filled incrementally by correction stages and the accumulator.
//! Once handed downstream (wrapped in an `Arc`) they are never mutated.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bells::bell_char;
use crate::bong::{Bong, Stroke};

/// Default tolerance for adjacent swaps when judging "close to rounds"
pub const DEFAULT_ROUNDS_SWAP_TOLERANCE_MS: i64 = 90;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    bongs: Vec<Bong>,
    handstroke: bool,
    /// Largest bell number seen in this row
    n_bells: u8,
}

impl Row {
    /// Create an empty row at the given stroke
    pub fn new(handstroke: bool) -> Self {
        Self {
            bongs: Vec::new(),
            handstroke,
            n_bells: 0,
        }
    }

    /// Create a row from strikes already in order
    pub fn from_bongs(handstroke: bool, bongs: impl IntoIterator<Item = Bong>) -> Self {
        let mut row = Self::new(handstroke);
        for bong in bongs {
            row.push(bong);
        }
        row
    }

    pub fn bongs(&self) -> &[Bong] {
        &self.bongs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bong> {
        self.bongs.iter()
    }

    /// Number of bells that struck in this row
    pub fn len(&self) -> usize {
        self.bongs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bongs.is_empty()
    }

    /// Largest bell number that has struck in this row
    pub fn n_bells(&self) -> usize {
        self.n_bells as usize
    }

    pub fn is_handstroke(&self) -> bool {
        self.handstroke
    }

    pub fn set_handstroke(&mut self, handstroke: bool) {
        self.handstroke = handstroke;
    }

    pub fn stroke(&self) -> Stroke {
        Stroke::from_handstroke(self.handstroke)
    }

    /// True if the strike is tagged with this row's stroke
    pub fn matches_stroke(&self, bong: &Bong) -> bool {
        bong.stroke == self.stroke()
    }

    /// Strike at `place` (1-based)
    pub fn bong(&self, place: usize) -> Option<&Bong> {
        place.checked_sub(1).and_then(|i| self.bongs.get(i))
    }

    pub fn bell_at(&self, place: usize) -> Option<u8> {
        self.bong(place).map(|b| b.bell)
    }

    pub fn strike_time(&self, place: usize) -> Option<i64> {
        self.bong(place).map(|b| b.time)
    }

    pub fn first(&self) -> Option<&Bong> {
        self.bongs.first()
    }

    pub fn last(&self) -> Option<&Bong> {
        self.bongs.last()
    }

    pub fn first_strike_time(&self) -> Option<i64> {
        self.first().map(|b| b.time)
    }

    pub fn last_strike_time(&self) -> Option<i64> {
        self.last().map(|b| b.time)
    }

    /// Place (1-based) of `bell` in this row
    pub fn find_bell(&self, bell: u8) -> Option<usize> {
        self.bongs.iter().position(|b| b.bell == bell).map(|i| i + 1)
    }

    pub fn contains_bell(&self, bell: u8) -> bool {
        self.find_bell(bell).is_some()
    }

    /// Append a strike at the lie
    pub fn push(&mut self, bong: Bong) {
        self.n_bells = self.n_bells.max(bong.bell);
        self.bongs.push(bong);
    }

    /// Insert a strike at the lead
    pub fn push_front(&mut self, bong: Bong) {
        self.n_bells = self.n_bells.max(bong.bell);
        self.bongs.insert(0, bong);
    }

    /// Remove and return the strike at the lie
    pub fn pop(&mut self) -> Option<Bong> {
        self.bongs.pop()
    }

    /// Remove and return the strike at `place` (1-based)
    pub fn remove(&mut self, place: usize) -> Option<Bong> {
        let index = place.checked_sub(1)?;
        if index < self.bongs.len() {
            Some(self.bongs.remove(index))
        } else {
            None
        }
    }

    /// Consume the row, yielding its strikes in order
    pub fn into_bongs(self) -> Vec<Bong> {
        self.bongs
    }

    /// Time between the first and last strikes (excludes the inter-row gap)
    pub fn duration(&self) -> i64 {
        match (self.first_strike_time(), self.last_strike_time()) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }

    /// True if it looks like the band was trying to ring rounds
    ///
    /// All bells strike in increasing bell-number order, except that an
    /// adjacent pair of bells may be swapped if they struck no more than
    /// `swap_tolerance_ms` apart. Works with missing bells.
    pub fn is_close_to_rounds(&self, swap_tolerance_ms: i64) -> bool {
        self.bongs.windows(2).all(|pair| {
            let (b1, b2) = (&pair[0], &pair[1]);
            if b1.bell > b2.bell {
                b1.bell - b2.bell <= 1 && b2.time - b1.time <= swap_tolerance_ms
            } else {
                true
            }
        })
    }

    /// Row notation, e.g. `13254`, with `h`/`b` after any bell whose own
    /// stroke tag differs from the row's stroke
    pub fn notation(&self) -> String {
        if self.bongs.is_empty() {
            return "Empty Row".to_string();
        }
        let mut s = String::with_capacity(self.bongs.len() * 2);
        for bong in &self.bongs {
            s.push(bell_char(bong.bell).unwrap_or('?'));
            if bong.stroke != Stroke::Unknown && (bong.stroke == Stroke::Hand) != self.handstroke {
                s.push(if bong.stroke == Stroke::Hand { 'h' } else { 'b' });
            }
        }
        s
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.stroke().as_str(), self.notation())
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a Bong;
    type IntoIter = std::slice::Iter<'a, Bong>;

    fn into_iter(self) -> Self::IntoIter {
        self.bongs.iter()
    }
}
