//! UTF-8 reassembly across read boundaries
//!
//! A fixed-size read can end in the middle of a multi-byte character. The
//! trailing fragment is held back and joined with the next chunk instead of
//! being replaced with U+FFFD on both sides of the split.

/// A code point is at most 4 bytes, so at most 3 can be left over
const MAX_CARRY: usize = 3;

/// Converts a byte stream to text, carrying split characters forward
#[derive(Default)]
pub struct Utf8Stream {
    carry: Vec<u8>,
}

impl Utf8Stream {
    pub fn new() -> Self {
        Self {
            carry: Vec::with_capacity(MAX_CARRY),
        }
    }

    /// Decode `data`, holding back an incomplete trailing character.
    /// Bytes that can never form valid UTF-8 become U+FFFD.
    pub fn push(&mut self, data: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(data);

        let keep = incomplete_tail_len(&bytes);
        let split = bytes.len() - keep;
        self.carry.extend_from_slice(&bytes[split..]);
        bytes.truncate(split);

        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }

    /// Release whatever is still held (end of stream).
    pub fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Length of a truncated-but-valid character prefix at the end of `bytes`
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    let window = bytes.len().min(MAX_CARRY);
    for back in 1..=window {
        let start = bytes.len() - back;
        let lead = bytes[start];
        if lead & 0xC0 == 0x80 {
            // Continuation byte, keep walking back to the lead byte
            continue;
        }
        let needed = match lead {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return 0,
        };
        return if back < needed { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut stream = Utf8Stream::new();
        assert_eq!(stream.push(b"hello"), "hello");
        assert_eq!(stream.flush(), "");
    }

    #[test]
    fn test_split_two_byte_char() {
        let bytes = "жук".as_bytes();
        let mut stream = Utf8Stream::new();
        let first = stream.push(&bytes[..1]);
        let second = stream.push(&bytes[1..]);
        assert_eq!(first, "");
        assert_eq!(second, "жук");
    }

    #[test]
    fn test_split_four_byte_char() {
        let bytes = "a🦀b".as_bytes();
        let mut stream = Utf8Stream::new();
        let mut out = stream.push(&bytes[..3]);
        out.push_str(&stream.push(&bytes[3..4]));
        out.push_str(&stream.push(&bytes[4..]));
        assert_eq!(out, "a🦀b");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut stream = Utf8Stream::new();
        assert_eq!(stream.push(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_flush_releases_truncated_tail() {
        let mut stream = Utf8Stream::new();
        assert_eq!(stream.push(&[b'x', 0xE6, 0x97]), "x");
        assert_eq!(stream.flush(), "\u{FFFD}");
    }
}
