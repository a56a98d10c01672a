//! Time-ordering stage
//!
//! Events may arrive out of order by up to the tolerance window. They are
//! held in a small sorted buffer and released once a newer event is more
//! than the window ahead of them, so output time never decreases.

use std::collections::VecDeque;

use cas_common::Bong;

use super::CorrectionStage;

pub struct TimeOrderStage {
    window_ms: i64,
    queue: VecDeque<Bong>,
}

impl TimeOrderStage {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            queue: VecDeque::new(),
        }
    }

    /// Events currently held back
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }
}

impl CorrectionStage for TimeOrderStage {
    fn name(&self) -> &'static str {
        "time-order"
    }

    fn process(&mut self, bong: Bong) -> Vec<Bong> {
        let mut released = Vec::new();
        while let Some(front) = self.queue.front().copied() {
            if bong.time - front.time <= self.window_ms {
                break;
            }
            self.queue.pop_front();
            released.push(front);
        }

        // Equal times keep arrival order
        let pos = self
            .queue
            .iter()
            .position(|b| bong.time < b.time)
            .unwrap_or(self.queue.len());
        self.queue.insert(pos, bong);
        released
    }

    fn finish(&mut self) -> Vec<Bong> {
        self.queue.drain(..).collect()
    }
}
