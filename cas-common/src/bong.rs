//! Single-bell strike events
//!
//! A [`Bong`] is one recorded strike of one bell: the bell number, a
//! millisecond timestamp and, where known, the stroke it was struck at.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Stroke a bell was struck at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stroke {
    Hand,
    Back,
    Unknown,
}

impl Stroke {
    /// The other stroke of the whole pull; Unknown stays Unknown
    pub fn flip(self) -> Self {
        match self {
            Stroke::Hand => Stroke::Back,
            Stroke::Back => Stroke::Hand,
            Stroke::Unknown => Stroke::Unknown,
        }
    }

    /// Stroke for a row's handstroke flag
    pub fn from_handstroke(handstroke: bool) -> Self {
        if handstroke {
            Stroke::Hand
        } else {
            Stroke::Back
        }
    }

    /// Single-character form used in text formats (`H`, `B`, or empty)
    pub fn as_str(self) -> &'static str {
        match self {
            Stroke::Hand => "H",
            Stroke::Back => "B",
            Stroke::Unknown => "",
        }
    }
}

/// One strike of one bell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bong {
    /// Bell number, 1 (treble) upwards
    pub bell: u8,
    /// Strike time in milliseconds
    pub time: i64,
    pub stroke: Stroke,
}

impl Bong {
    pub fn new(bell: u8, time: i64, stroke: Stroke) -> Self {
        Self { bell, time, stroke }
    }

    /// Same strike with the stroke flipped
    pub fn swapped_stroke(self) -> Self {
        Self {
            stroke: self.stroke.flip(),
            ..self
        }
    }

    /// Same strike re-tagged with `stroke`
    pub fn with_stroke(self, stroke: Stroke) -> Self {
        Self { stroke, ..self }
    }
}

impl fmt::Display for Bong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.bell, self.time, self.stroke.as_str())
    }
}

/// Parses the `<bell> <time> [H|B]` line form used by raw event streams
impl FromStr for Bong {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let bell = parts
            .next()
            .and_then(|b| b.parse::<u8>().ok())
            .ok_or_else(|| Error::InvalidInput(format!("Bad bong: {}", s)))?;
        let time = parts
            .next()
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or_else(|| Error::InvalidInput(format!("Bad bong: {}", s)))?;
        let stroke = match parts.next() {
            Some("H") => Stroke::Hand,
            Some("B") => Stroke::Back,
            _ => Stroke::Unknown,
        };
        Ok(Bong::new(bell, time, stroke))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_alternates_known_strokes() {
        assert_eq!(Stroke::Hand.flip(), Stroke::Back);
        assert_eq!(Stroke::Back.flip(), Stroke::Hand);
        assert_eq!(Stroke::Unknown.flip(), Stroke::Unknown);
    }

    #[test]
    fn test_parse_bong_line() {
        let bong: Bong = "3 1015 B".parse().unwrap();
        assert_eq!(bong, Bong::new(3, 1015, Stroke::Back));

        let bong: Bong = "12 20".parse().unwrap();
        assert_eq!(bong.stroke, Stroke::Unknown);

        assert!("nonsense".parse::<Bong>().is_err());
    }

    #[test]
    fn test_display_matches_parse_form() {
        let bong = Bong::new(5, 400, Stroke::Hand);
        assert_eq!(bong.to_string(), "5 400 H");
        assert_eq!(bong.to_string().parse::<Bong>().unwrap(), bong);
    }
}
