//! Bell numbering and bell characters
//!
//! Bells are numbered 1 (treble) upwards. In row notation each bell is written
//! as a single character: `1234567890ETABCD` for bells 1 to 16.

/// Largest number of bells supported
pub const MAX_BELLS: usize = 16;

/// Row notation characters, indexed by bell number minus one
pub const BELL_CHARS: &str = "1234567890ETABCD";

/// Bell number for a row notation character
///
/// `O` is accepted as a common typo for `0` (the tenth bell).
/// Returns `None` for unrecognised characters.
pub fn bell_from_char(c: char) -> Option<u8> {
    let c = if c == 'O' { '0' } else { c };
    BELL_CHARS.find(c).map(|i| (i + 1) as u8)
}

/// Row notation character for a bell number, `None` if out of range
pub fn bell_char(bell: u8) -> Option<char> {
    if bell == 0 {
        return None;
    }
    BELL_CHARS.chars().nth(bell as usize - 1)
}

/// True if `bell` lies in `1..=MAX_BELLS`
pub fn is_valid_bell(bell: u8) -> bool {
    bell >= 1 && bell as usize <= MAX_BELLS
}
