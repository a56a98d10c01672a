//! Odd-struck correction
//!
//! Moves each strike by its bell's offset for the strike's stroke. Strikes
//! without a known stroke pass through unchanged.

use cas_common::{Bong, OddStruck};

use super::CorrectionStage;

pub struct OddStruckStage {
    offsets: OddStruck,
}

impl OddStruckStage {
    pub fn new(offsets: OddStruck) -> Self {
        Self { offsets }
    }
}

impl CorrectionStage for OddStruckStage {
    fn name(&self) -> &'static str {
        "odd-struck"
    }

    fn process(&mut self, bong: Bong) -> Vec<Bong> {
        vec![self.offsets.apply(bong)]
    }

    fn finish(&mut self) -> Vec<Bong> {
        Vec::new()
    }
}
