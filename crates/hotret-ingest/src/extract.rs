//! Fixed-width field extraction
//!
//! Offsets and lengths are counted in characters, so a multi-byte character
//! occupies one position just like an ASCII one.

/// Extract `length` characters starting at the 0-based `start`, trimmed
///
/// Out-of-range requests are clamped to the line rather than rejected, the
/// same way slicing past the end of a string yields the part that exists.
/// Use [`field_in_bounds`] first when a short line must skip the field instead.
pub fn extract(line: &str, start: usize, length: usize) -> &str {
    let begin = byte_offset(line, start);
    let end = byte_offset(&line[begin..], length) + begin;
    line[begin..end].trim()
}

/// Whether `[start, start + length)` lies entirely within a line of
/// `line_len` characters
///
/// Negative starts or lengths never fit.
pub fn field_in_bounds(line_len: usize, start: i64, length: i64) -> bool {
    if start < 0 || length < 0 {
        return false;
    }
    match start.checked_add(length) {
        Some(end) => usize::try_from(end).is_ok_and(|end| end <= line_len),
        None => false,
    }
}

/// Number of characters in `line`
pub fn char_len(line: &str) -> usize {
    if line.is_ascii() {
        line.len()
    } else {
        line.chars().count()
    }
}

/// Byte offset of the `chars`-th character, or the end of the string
fn byte_offset(s: &str, chars: usize) -> usize {
    if s.is_ascii() {
        return chars.min(s.len());
    }
    s.char_indices().nth(chars).map_or(s.len(), |(idx, _)| idx)
}
