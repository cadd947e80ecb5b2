use std::borrow::Cow;
use std::ops::Range;

/// Byte range `[begin, end)` into a caller-owned UTF-8 buffer.
///
/// Carries no reference to the buffer; every accessor takes it explicitly and
/// returns `None` when the span does not lie inside it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TokenSpan {
    pub begin: usize,
    pub end: usize,
}

impl TokenSpan {
    pub const fn new(begin: usize, end: usize) -> Self {
        TokenSpan { begin, end }
    }

    /// Native layout: `end << 32 | begin`.
    pub const fn from_packed(packed: u64) -> Self {
        TokenSpan {
            begin: (packed & 0xFFFF_FFFF) as usize,
            end: (packed >> 32) as usize,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.begin..self.end
    }

    pub fn bytes<'a>(&self, utf8: &'a [u8]) -> Option<&'a [u8]> {
        if self.begin > self.end {
            return None;
        }
        utf8.get(self.range())
    }

    /// Decoded text of the span. Invalid sequences become U+FFFD.
    pub fn to_str<'a>(&self, utf8: &'a [u8]) -> Option<Cow<'a, str>> {
        self.bytes(utf8).map(String::from_utf8_lossy)
    }

    /// Decodes the span into `dest`, returning the number of chars written,
    /// or `None` if `dest` is too small (nothing is written in that case).
    pub fn copy_chars(&self, utf8: &[u8], dest: &mut [char]) -> Option<usize> {
        let text = self.to_str(utf8)?;
        let needed = text.chars().count();
        if needed > dest.len() {
            return None;
        }
        for (slot, ch) in dest.iter_mut().zip(text.chars()) {
            *slot = ch;
        }
        Some(needed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpacks_native_layout() {
        let packed = (9u64 << 32) | 4;
        assert_eq!(TokenSpan::from_packed(packed), TokenSpan::new(4, 9));
    }

    #[test]
    fn slices_buffer() {
        let text = "Hello wörld".as_bytes();
        let span = TokenSpan::new(5, 12);
        assert_eq!(span.len(), 7);
        assert_eq!(span.bytes(text), Some(" wörld".as_bytes()));
        assert_eq!(span.to_str(text).as_deref(), Some(" wörld"));
    }

    #[test]
    fn rejects_spans_outside_buffer() {
        let text = b"abc";
        assert!(TokenSpan::new(2, 4).bytes(text).is_none());
        assert!(TokenSpan::new(3, 1).bytes(text).is_none());
        assert_eq!(TokenSpan::new(3, 3).bytes(text), Some(&b""[..]));
    }

    #[test]
    fn copy_chars_reports_undersized_destination() {
        let text = "äöü".as_bytes();
        let span = TokenSpan::new(0, text.len());

        let mut small = ['\0'; 2];
        assert_eq!(span.copy_chars(text, &mut small), None);
        assert_eq!(small, ['\0'; 2]);

        let mut dest = ['\0'; 8];
        assert_eq!(span.copy_chars(text, &mut dest), Some(3));
        assert_eq!(&dest[..3], &['ä', 'ö', 'ü']);
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(TokenSpan::new(1, 2), TokenSpan { begin: 1, end: 2 });
        assert_ne!(TokenSpan::new(1, 2), TokenSpan::new(1, 3));
    }
}
