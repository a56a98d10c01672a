//! Row de-interleaving
//!
//! A bell striking very late can land after the first strikes of the next
//! row. A new strike goes into the current row if that bell is missing there
//! and no more than `overlap_tolerance` strikes have started the next row;
//! otherwise into the next row; otherwise the window moves on.
//!
//! One retroactive fix: if the bell is already in the next row (and not in
//! current) as that row's earliest strike, that strike was really the late
//! tail of the current row. It is moved back before the new strike is placed.

use cas_common::Bong;
use tracing::debug;

use super::{CorrectionStage, TwoRowWindow};

pub struct RowOverlapStage {
    overlap_tolerance: usize,
    window: TwoRowWindow,
}

impl RowOverlapStage {
    pub fn new(overlap_tolerance: usize) -> Self {
        Self {
            overlap_tolerance,
            window: TwoRowWindow::default(),
        }
    }
}

impl CorrectionStage for RowOverlapStage {
    fn name(&self) -> &'static str {
        "row-overlap"
    }

    fn process(&mut self, bong: Bong) -> Vec<Bong> {
        let place_in_current = self.window.current.find_bell(bong.bell);
        let place_in_next = self.window.next.find_bell(bong.bell);

        match (place_in_current, place_in_next) {
            (None, Some(place)) => {
                let earlier = self.window.next.bong(place).copied();
                if let Some(earlier) = earlier {
                    if Some(earlier.time) == self.window.next.first_strike_time() {
                        debug!(
                            "Moving bell {} at {}ms back to the end of the current row",
                            earlier.bell, earlier.time
                        );
                        self.window.next.remove(place);
                        self.window.current.push(earlier);
                        self.window.next.push(bong);
                        return Vec::new();
                    }
                }
                // Two strikes of one bell can't go in the same row; fall through
            }
            (None, None) => {
                if self.window.next.len() <= self.overlap_tolerance {
                    self.window.current.push(bong);
                    return Vec::new();
                }
            }
            (Some(_), _) => {}
        }

        if place_in_next.is_none() {
            self.window.next.push(bong);
            return Vec::new();
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

#[cfg(test)]
mod tests {
    use super::*;
    use cas_common::{Row, Stroke};

    fn feed(stage: &mut RowOverlapStage, strikes: &[(u8, i64)]) -> Vec<(u8, i64)> {
        let mut out: Vec<Bong> = strikes
            .iter()
            .flat_map(|&(bell, time)| stage.process(Bong::new(bell, time, Stroke::Unknown)))
            .collect();
        out.extend(stage.finish());
        out.into_iter().map(|b| (b.bell, b.time)).collect()
    }

    #[test]
    fn test_late_bell_returned_to_current_row() {
        let mut stage = RowOverlapStage::new(0);
        // Bell 4 is missing from the current row; its strike at 650 was
        // taken as the start of the next row.
        stage.window.current = Row::from_bongs(
            true,
            [(1, 0), (2, 200), (3, 400)].map(|(bell, t)| Bong::new(bell, t, Stroke::Unknown)),
        );
        stage.window.next = Row::from_bongs(
            false,
            [(4, 650), (1, 800)].map(|(bell, t)| Bong::new(bell, t, Stroke::Unknown)),
        );

        assert!(stage.process(Bong::new(4, 1400, Stroke::Unknown)).is_empty());

        let current: Vec<(u8, i64)> = stage.window.current.iter().map(|b| (b.bell, b.time)).collect();
        let next: Vec<(u8, i64)> = stage.window.next.iter().map(|b| (b.bell, b.time)).collect();
        assert_eq!(current, vec![(1, 0), (2, 200), (3, 400), (4, 650)]);
        assert_eq!(next, vec![(1, 800), (4, 1400)]);
    }

    #[test]
    fn test_bell_twice_in_next_starts_new_row() {
        let mut stage = RowOverlapStage::new(0);
        let out = feed(&mut stage, &[(1, 0), (2, 200), (1, 500), (2, 700), (1, 1000)]);
        assert_eq!(out, vec![(1, 0), (2, 200), (1, 500), (2, 700), (1, 1000)]);
    }

    #[test]
    fn test_overlap_tolerance_admits_late_bell() {
        let input = [(1, 0), (2, 200), (1, 400), (3, 450), (2, 600), (3, 800)];

        // With no tolerance the late 3 goes to the second row
        let mut strict = RowOverlapStage::new(0);
        let out = feed(&mut strict, &input);
        assert_eq!(out[..2], [(1, 0), (2, 200)]);

        // With a tolerance of one it completes the first row
        let mut lenient = RowOverlapStage::new(1);
        let out = feed(&mut lenient, &input);
        assert_eq!(out[..3], [(1, 0), (2, 200), (3, 450)]);
    }
}
