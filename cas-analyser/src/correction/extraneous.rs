//! Extraneous strike suppression
//!
//! Catches a bell recorded twice within what should be one row interval
//! (a double strike or stray sensor trigger), which would otherwise force a
//! spurious row boundary.
//!
//! When a bell already has a strike in the next row, the three strikes of that
//! bell (in current, in next, and the new one) are compared with the average
//! separation of the other bells between the two rows. If all three fit inside
//! `span_factor` times that separation, one of them is extraneous: the
//! middle strike is dropped if it sits closer to the first, otherwise the new
//! strike is dropped if it follows the middle one by under half a separation.

use cas_common::Bong;
use tracing::debug;

use super::{CorrectionStage, TwoRowWindow};

pub struct ExtraneousStrikeStage {
    span_factor: f64,
    window: TwoRowWindow,
}

impl ExtraneousStrikeStage {
    pub fn new(span_factor: f64) -> Self {
        Self {
            span_factor,
            window: TwoRowWindow::default(),
        }
    }

    /// Separations (current → next) of `bell` and its new strike, plus the
    /// average separation of the other bells present in both rows
    fn separations(&self, bong: &Bong) -> (i64, i64, i64) {
        let mut total = 0;
        let mut count = 0;
        let mut mine = (0, 0);
        for b2 in self.window.next.iter() {
            let Some(b1) = self.window.current.iter().find(|b| b.bell == b2.bell) else {
                continue;
            };
            if b2.bell == bong.bell {
                mine = (b2.time - b1.time, bong.time - b2.time);
            } else {
                total += b2.time - b1.time;
                count += 1;
            }
        }
        let average = if count > 0 { total / count } else { 0 };
        (mine.0, mine.1, average)
    }
}

impl CorrectionStage for ExtraneousStrikeStage {
    fn name(&self) -> &'static str {
        "extraneous-strike"
    }

    fn process(&mut self, bong: Bong) -> Vec<Bong> {
        let in_current = self.window.current.contains_bell(bong.bell);

        // Fill the first row
        if self.window.next.is_empty() && !in_current {
            self.window.current.push(bong);
            return Vec::new();
        }

        let Some(place_in_next) = self.window.next.find_bell(bong.bell) else {
            self.window.next.push(bong);
            return Vec::new();
        };

        let (sep1, sep2, average) = self.separations(&bong);
        let span = sep1 + sep2;
        if span > 0 && (span as f64) < average as f64 * self.span_factor {
            if sep1 < sep2 {
                debug!(
                    "Dropping extraneous middle strike of bell {} (separations {}ms, {}ms)",
                    bong.bell, sep1, sep2
                );
                self.window.next.remove(place_in_next);
                self.window.next.push(bong);
                return Vec::new();
            } else if sep2 < average / 2 {
                debug!(
                    "Dropping extraneous strike of bell {} at {}ms ({}ms after previous)",
                    bong.bell, bong.time, sep2
                );
                return Vec::new();
            }
        }

        let released = self.window.finish_row().into_bongs();
        self.window.next.push(bong);
        released
    }

    fn finish(&mut self) -> Vec<Bong> {
        let mut released = self.window.finish_row().into_bongs();
        released.extend(self.window.finish_row().into_bongs());
        released
    }
}
