//! Stroke assignment
//!
//! Rows alternate handstroke and backstroke. The second strike of any bell
//! since the last flip marks a row boundary: the stroke flips and every strike
//! from there on is tagged with the new stroke.

use cas_common::bells::MAX_BELLS;
use cas_common::{Bong, Stroke};

use super::CorrectionStage;

pub struct StrokeStage {
    stroke: Stroke,
    seen: [bool; MAX_BELLS],
}

impl StrokeStage {
    pub fn new(initial_handstroke: bool) -> Self {
        Self {
            stroke: Stroke::from_handstroke(initial_handstroke),
            seen: [false; MAX_BELLS],
        }
    }
}

impl CorrectionStage for StrokeStage {
    fn name(&self) -> &'static str {
        "stroke"
    }

    fn process(&mut self, bong: Bong) -> Vec<Bong> {
        if let Some(index) = (bong.bell as usize).checked_sub(1).filter(|&i| i < MAX_BELLS) {
            if self.seen[index] {
                self.stroke = self.stroke.flip();
                self.seen = [false; MAX_BELLS];
            }
            self.seen[index] = true;
        }
        vec![bong.with_stroke(self.stroke)]
    }

    fn finish(&mut self) -> Vec<Bong> {
        Vec::new()
    }
}
