use crate::engine::WORD_START;
use crate::error::{Error, Result};
use crate::span::TokenSpan;

/// Model-specific sentinel ids. `None` when the model has no such token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpecialTokens<Id> {
    pub unknown: Option<Id>,
    /// Sometimes called CLS.
    pub begin_of_sentence: Option<Id>,
    /// Sometimes called SEP.
    pub end_of_sentence: Option<Id>,
    pub pad: Option<Id>,
    pub mask: Option<Id>,
}

impl SpecialTokens<i32> {
    /// Engine ids `-1` mean "absent".
    pub fn from_engine(unknown: i32, bos: i32, eos: i32, pad: i32) -> Self {
        let present = |id: i32| (id >= 0).then_some(id);
        SpecialTokens {
            unknown: present(unknown),
            begin_of_sentence: present(bos),
            end_of_sentence: present(eos),
            pad: present(pad),
            mask: None,
        }
    }

    /// Layout the HuggingFace XLM-RoBERTa checkpoints expect.
    pub fn xlm_roberta() -> Self {
        SpecialTokens {
            begin_of_sentence: Some(0),
            pad: Some(1),
            end_of_sentence: Some(2),
            unknown: Some(3),
            mask: Some(250_001),
        }
    }
}

/// Ids with the byte spans they were produced from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Encoding<Id> {
    pub ids: Vec<Id>,
    pub spans: Vec<TokenSpan>,
}

impl<Id> Encoding<Id> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Byte-exact reconstruction from `utf8`, the buffer that was encoded.
    pub fn decode_with<T>(&self, tokenizer: &T, utf8: &[u8]) -> Result<String>
    where
        T: Tokenizer<Id = Id> + ?Sized,
    {
        tokenizer.decode_spans(&self.spans, utf8)
    }
}

/// Text <-> token conversion over one id space.
///
/// Two decode paths exist on purpose. `decode_ids` rebuilds text from pieces
/// and therefore returns whitespace-collapsed text; `decode_spans` copies the
/// bytes each token consumed and returns the original exactly.
pub trait Tokenizer {
    type Id: Copy;

    fn special_tokens(&self) -> &SpecialTokens<Self::Id>;

    /// Size of the id space accepted by `decode_id`.
    fn number_of_tokens(&self) -> usize;

    /// Pieces including the word-start marker. Mostly useful for debugging.
    fn encode_to_strings(&self, text: &str) -> Result<Vec<String>> {
        self.encode_utf8_to_strings(text.as_bytes())
    }

    fn encode_utf8_to_strings(&self, utf8: &[u8]) -> Result<Vec<String>>;

    /// Encodes `text`, placing `prefix` before and `suffix` after the ids.
    fn encode_to_ids(
        &self,
        text: &str,
        prefix: &[Self::Id],
        suffix: &[Self::Id],
    ) -> Result<Vec<Self::Id>> {
        self.encode_utf8_to_ids(text.as_bytes(), prefix, suffix)
    }

    fn encode_utf8_to_ids(
        &self,
        utf8: &[u8],
        prefix: &[Self::Id],
        suffix: &[Self::Id],
    ) -> Result<Vec<Self::Id>>;

    fn encode_to_spans(&self, utf8: &[u8]) -> Result<Encoding<Self::Id>>;

    fn decode_id(&self, id: Self::Id) -> Result<String>;

    fn decode_ids(&self, ids: &[Self::Id]) -> Result<String>;

    /// Rebuilds the text the spans were cut from, byte for byte.
    ///
    /// Whitespace-only input encodes to no tokens, so the round trip
    /// `decode_spans(encode_to_spans(t).spans, t) == t` holds only when `t`
    /// contains at least one non-whitespace character.
    fn decode_spans(&self, spans: &[TokenSpan], utf8: &[u8]) -> Result<String>;
}

/// Concatenates the bytes of each span. Fails with [`Error::Span`] if a span
/// leaves the buffer.
pub fn decode_spans(spans: &[TokenSpan], utf8: &[u8]) -> Result<String> {
    let total = spans.iter().map(TokenSpan::len).sum();
    let mut out = Vec::with_capacity(total);
    for span in spans {
        let bytes = span.bytes(utf8).ok_or(Error::Span {
            begin: span.begin,
            end: span.end,
            len: utf8.len(),
        })?;
        out.extend_from_slice(bytes);
    }
    Ok(match String::from_utf8(out) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// Joins pieces, turning each word-start marker into a space except at the
/// very start of the output.
pub fn join_pieces<'a, I>(pieces: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::new();
    for piece in pieces {
        match piece.strip_prefix(WORD_START) {
            Some(rest) => {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(rest);
            }
            None => out.push_str(piece),
        }
    }
    out
}
