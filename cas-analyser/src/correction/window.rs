//! Two-row sliding window shared by the row-building stages

use cas_common::Row;

/// The row being completed and the row after it
///
/// The first row is a handstroke unless stated otherwise; each new row takes
/// the opposite stroke to the one before it.
#[derive(Debug, Clone)]
pub(crate) struct TwoRowWindow {
    pub current: Row,
    pub next: Row,
}

impl TwoRowWindow {
    pub fn new(first_handstroke: bool) -> Self {
        Self {
            current: Row::new(first_handstroke),
            next: Row::new(!first_handstroke),
        }
    }

    /// Hand off the current row; next becomes current and a fresh next opens
    pub fn finish_row(&mut self) -> Row {
        let fresh = Row::new(!self.next.is_handstroke());
        let next = std::mem::replace(&mut self.next, fresh);
        std::mem::replace(&mut self.current, next)
    }
}

impl Default for TwoRowWindow {
    fn default() -> Self {
        Self::new(true)
    }
}
