//! Lead/lie repair
//!
//! A missed strike elsewhere in a row can leave a bell that should lead the
//! next row recorded as the lie of this one (and the reverse). Each bell's
//! place in the last finished row is remembered; a full row whose lie bell
//! was last seen near the front is taken to have lost its lead, and that bell
//! moves across the row boundary with its stroke flipped.
//!
//! Before that history exists (the first whole pull), a different check looks
//! for recording that started mid-row: if both of the first two rows are
//! rounds once rotated at the same split point, the trailing bells of each
//! are moved across the boundary.

use cas_common::bells::MAX_BELLS;
use cas_common::{Bong, Row, Stroke};
use tracing::{debug, warn};

use super::{CorrectionStage, TwoRowWindow};

pub struct LeadLieStage {
    front_divisor: usize,
    swap_tolerance_ms: i64,
    n_bells: usize,
    /// Place (1-based) of each bell in the last finished row it rang in
    last_good_place: [usize; MAX_BELLS],
    window: TwoRowWindow,
    started: bool,
    rows_processed: usize,
}

impl LeadLieStage {
    pub fn new(front_divisor: usize, swap_tolerance_ms: i64) -> Self {
        Self {
            front_divisor: front_divisor.max(1),
            swap_tolerance_ms,
            n_bells: 0,
            last_good_place: [0; MAX_BELLS],
            window: TwoRowWindow::default(),
            started: false,
            rows_processed: 0,
        }
    }

    fn last_good_place(&self, bell: u8) -> usize {
        (bell as usize)
            .checked_sub(1)
            .and_then(|i| self.last_good_place.get(i))
            .copied()
            .unwrap_or(0)
    }

    fn finish_row(&mut self) -> Vec<Bong> {
        let row = self.window.finish_row();
        for (i, bong) in row.iter().enumerate() {
            if let Some(slot) = (bong.bell as usize)
                .checked_sub(1)
                .and_then(|b| self.last_good_place.get_mut(b))
            {
                *slot = i + 1;
            }
        }
        self.rows_processed += 1;
        row.into_bongs()
    }

    /// First row: fill current until the stroke changes
    fn fill_first_row(&mut self, bong: Bong) {
        if !self.started {
            self.window = TwoRowWindow::new(bong.stroke == Stroke::Hand);
            self.started = true;
        }
        if !self.window.current.matches_stroke(&bong) {
            self.window.next.push(bong);
            self.rows_processed += 1;
        } else if !self.window.current.contains_bell(bong.bell) {
            self.window.current.push(bong);
        } else {
            warn!(
                "Bell {} sounded twice in the first row; ignoring strike at {}ms",
                bong.bell, bong.time
            );
        }
    }

    /// Split point at which `row` rotates into (close to) rounds
    ///
    /// The split is the first place where the bell number falls by at least
    /// `n_bells - 2`, i.e. where the back bells are followed by the front.
    fn cyclic_split(&self, row: &Row) -> Option<usize> {
        let bongs = row.bongs();
        let mut prev = bongs.first()?;
        let mut split = 1;
        for bong in &bongs[1..] {
            if prev.bell as i64 - bong.bell as i64 >= self.n_bells as i64 - 2 {
                break;
            }
            prev = bong;
            split += 1;
        }
        if split >= bongs.len() {
            return None;
        }

        let rotated = Row::from_bongs(
            row.is_handstroke(),
            bongs[split..].iter().chain(&bongs[..split]).copied(),
        );
        rotated
            .is_close_to_rounds(self.swap_tolerance_ms)
            .then_some(split)
    }

    /// Repairs possible during the first whole pull, before any history
    fn realign_first_rows(&mut self, bong: Bong) -> Option<Vec<Bong>> {
        // Move lie bells of row one to the lead of row two while they fit
        while self.window.current.len() > 1 {
            let lie = *self.window.current.last()?;
            if self.window.next.contains_bell(lie.bell) {
                break;
            }
            self.window.current.pop();
            self.window.next.push_front(lie.swapped_stroke());
            debug!("Moved bell {} from the lie of row 1 to the lead of row 2", lie.bell);
        }

        let split = self.cyclic_split(&self.window.current)?;
        if self.cyclic_split(&self.window.next) != Some(split) {
            return None;
        }
        // The bells moving to row three must not collide with the new strike
        if self.window.next.bongs()[split..].iter().any(|b| b.bell == bong.bell) {
            return None;
        }

        debug!(
            "First two rows are rotated rounds (split after place {}); realigning",
            split
        );
        let mut extra = Row::new(!self.window.next.is_handstroke());
        for _ in split..self.window.next.len() {
            if let Some(b) = self.window.next.pop() {
                extra.push_front(b.swapped_stroke());
            }
            if let Some(b) = self.window.current.pop() {
                self.window.next.push_front(b.swapped_stroke());
            }
        }
        let released = self.finish_row();
        self.window.next = extra;
        self.window.next.push(bong);
        Some(released)
    }

    /// Move the lie of a full row to the lead of the next if it belongs there
    fn shunt_lie(&mut self, bong: Bong) -> Option<Vec<Bong>> {
        let current = &self.window.current;
        if current.len() != current.n_bells() {
            return None;
        }
        let lie = *current.last()?;
        if bong.bell == lie.bell
            || self.last_good_place(lie.bell) >= self.n_bells / self.front_divisor
        {
            return None;
        }

        match self.window.next.find_bell(lie.bell) {
            None => {
                self.window.current.pop();
                self.window.next.push_front(lie.swapped_stroke());
                debug!("Moved lie bell {} at {}ms to the next lead", lie.bell, lie.time);
                let released = self.finish_row();
                self.window.next.push(bong);
                Some(released)
            }
            Some(place) if place == self.window.next.len() => {
                // The same bell is the next row's lie: shunt it on as well
                let next_lie = self.window.next.pop()?;
                self.window.current.pop();
                self.window.next.push_front(lie.swapped_stroke());
                debug!(
                    "Moved lie bell {} at {}ms and {}ms to the following leads",
                    lie.bell, lie.time, next_lie.time
                );
                let released = self.finish_row();
                self.window.next.push(next_lie.swapped_stroke());
                self.window.next.push(bong);
                Some(released)
            }
            Some(_) => None,
        }
    }
}

impl CorrectionStage for LeadLieStage {
    fn name(&self) -> &'static str {
        "lead-lie"
    }

    fn process(&mut self, bong: Bong) -> Vec<Bong> {
        if self.rows_processed == 0 {
            self.fill_first_row(bong);
            return Vec::new();
        }

        self.n_bells = self.n_bells.max(self.window.current.n_bells());

        if self.window.next.matches_stroke(&bong) {
            if !self.window.next.contains_bell(bong.bell) {
                self.window.next.push(bong);
                return Vec::new();
            }
            // Shunted up by an earlier move; it has to start a row of its own
            let released = self.finish_row();
            self.window.next.push(bong.swapped_stroke());
            return released;
        }

        // The next row is complete; decide whether to move bells across
        let repaired = if self.rows_processed < 2 {
            self.realign_first_rows(bong)
        } else {
            self.shunt_lie(bong)
        };
        if let Some(released) = repaired {
            return released;
        }

        let released = self.finish_row();
        self.window.next.push(bong);
        released
    }

    fn finish(&mut self) -> Vec<Bong> {
        let mut released = self.finish_row();
        released.extend(self.finish_row());
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strike(bell: u8, time: i64, hand: bool) -> Bong {
        Bong::new(bell, time, Stroke::from_handstroke(hand))
    }

    fn rows_of(out: &[Bong]) -> Vec<(Stroke, Vec<u8>)> {
        let mut rows: Vec<(Stroke, Vec<u8>)> = Vec::new();
        for b in out {
            match rows.last_mut() {
                Some((stroke, bells)) if *stroke == b.stroke && !bells.contains(&b.bell) => {
                    bells.push(b.bell)
                }
                _ => rows.push((b.stroke, vec![b.bell])),
            }
        }
        rows
    }

    fn feed(stage: &mut LeadLieStage, input: &[Bong]) -> Vec<Bong> {
        let mut out: Vec<Bong> = input.iter().flat_map(|&b| stage.process(b)).collect();
        out.extend(stage.finish());
        out
    }

    #[test]
    fn test_clean_rounds_pass_through() {
        let mut input = Vec::new();
        for row in 0..4i64 {
            for bell in 1..=6u8 {
                input.push(strike(bell, row * 1400 + bell as i64 * 200, row % 2 == 0));
            }
        }
        let mut stage = LeadLieStage::new(3, 90);
        let out = feed(&mut stage, &input);
        assert_eq!(out, input);
    }

    #[test]
    fn test_mid_row_start_is_realigned() {
        // Recording began at bell 4 of a handstroke row of rounds on 6
        let mut input = Vec::new();
        let mut t = 0;
        let mut hand = true;
        for row in [&[4u8, 5, 6, 1, 2, 3][..], &[4, 5, 6, 1, 2, 3], &[4, 5, 6]] {
            for &bell in row {
                input.push(strike(bell, t, hand));
                t += 200;
            }
            hand = !hand;
        }
        input.push(strike(1, t, hand));

        let mut stage = LeadLieStage::new(3, 90);
        let rows = rows_of(&feed(&mut stage, &input));
        assert_eq!(rows[0].1, vec![4, 5, 6]);
        assert_eq!(rows[1].1, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(rows[2].1, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_lie_returned_to_lead() {
        // Rounds on 6. The treble's strike in the fourth row is missed, so the
        // next handstroke lead is heard as that row's lie, and the error
        // cascades one row further before it is repaired.
        let mut input = Vec::new();
        for row in 0..3i64 {
            for bell in 1..=6u8 {
                input.push(strike(bell, row * 1400 + bell as i64 * 200, row % 2 == 0));
            }
        }
        for bell in 2..=6u8 {
            input.push(strike(bell, 4200 + bell as i64 * 200, false));
        }
        input.push(strike(1, 5800, false));
        for bell in 2..=6u8 {
            input.push(strike(bell, 5600 + bell as i64 * 200, true));
        }
        input.push(strike(1, 7200, true));
        for bell in 2..=6u8 {
            input.push(strike(bell, 7000 + bell as i64 * 200, false));
        }

        let mut stage = LeadLieStage::new(3, 90);
        let rows = rows_of(&feed(&mut stage, &input));
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[3], (Stroke::Back, vec![2, 3, 4, 5, 6]));
        assert_eq!(rows[4], (Stroke::Hand, vec![1, 2, 3, 4, 5, 6]));
        assert_eq!(rows[5], (Stroke::Back, vec![1, 2, 3, 4, 5, 6]));
    }
}
