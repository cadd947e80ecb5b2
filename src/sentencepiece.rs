//! Tokenizer over the engine's own id space.
//!
//! Owns exactly one processor handle. The handle is taken out of its slot
//! before it is released, so `dispose` and `Drop` can both run safely.
//!
//! Concurrent use of one instance is only sound if the engine build is
//! thread-safe per handle; no locking happens here.
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::affix;
use crate::engine::{Engine, Handle, PIECE_DELIMITER};
use crate::error::{Error, Result};
use crate::negotiate::{self, negotiate, Attempt};
use crate::span::TokenSpan;
use crate::tokenizer::{self, Encoding, SpecialTokens, Tokenizer};
use crate::DefaultEngine;

pub struct SentencePieceTokenizer<E: Engine = DefaultEngine> {
    engine: E,
    handle: Option<Handle>,
    special: SpecialTokens<i32>,
    number_of_tokens: usize,
    model_path: PathBuf,
}

impl<E: Engine + Default> SentencePieceTokenizer<E> {
    pub fn new(model_file: impl AsRef<Path>) -> Result<Self> {
        Self::with_engine(E::default(), model_file)
    }
}

impl<E: Engine> SentencePieceTokenizer<E> {
    pub fn with_engine(engine: E, model_file: impl AsRef<Path>) -> Result<Self> {
        let model_path = model_file.as_ref().to_path_buf();
        if !model_path.is_file() {
            return Err(Error::init(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let handle = engine
            .create_processor()
            .ok_or_else(|| Error::init("engine could not create a processor"))?;

        // From here on, dropping `tok` releases the handle.
        let mut tok = SentencePieceTokenizer {
            engine,
            handle: Some(handle),
            special: SpecialTokens::default(),
            number_of_tokens: 0,
            model_path,
        };

        let info = match tok.engine.load_model(handle, &tok.model_path) {
            Ok(info) => info,
            Err(status) => {
                warn!(path = %tok.model_path.display(), %status, "model load failed");
                return Err(Error::init_with(
                    format!("cannot load model {}", tok.model_path.display()),
                    status,
                ));
            }
        };
        tok.number_of_tokens = usize::try_from(info.vocabulary_size).map_err(|_| {
            Error::init(format!(
                "engine reported vocabulary size {}",
                info.vocabulary_size
            ))
        })?;
        tok.special = SpecialTokens::from_engine(info.unk, info.bos, info.eos, info.pad);

        debug!(
            path = %tok.model_path.display(),
            vocabulary_size = tok.number_of_tokens,
            unk = info.unk,
            bos = info.bos,
            eos = info.eos,
            pad = info.pad,
            "model loaded"
        );
        Ok(tok)
    }

    /// Overrides the ids reported by the engine, e.g. with
    /// [`SpecialTokens::xlm_roberta`].
    pub fn with_special_tokens(mut self, special: SpecialTokens<i32>) -> Self {
        self.special = special;
        self
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_none()
    }

    /// Releases the processor. Later calls are no-ops; later operations fail.
    pub fn dispose(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(path = %self.model_path.display(), "releasing processor");
            self.engine.dispose_processor(handle);
        }
    }

    fn handle(&self, operation: &'static str) -> Result<Handle> {
        self.handle
            .ok_or_else(|| Error::operation(operation, crate::engine::Status::FailedPrecondition))
    }

    fn check_id(&self, id: i32) -> Result<()> {
        match usize::try_from(id) {
            Ok(index) if index < self.number_of_tokens => Ok(()),
            _ => Err(Error::Range {
                id: i64::from(id),
                limit: self.number_of_tokens,
            }),
        }
    }

    fn delimited_pieces(&self, utf8: &[u8]) -> Result<(Vec<u8>, usize)> {
        const OP: &str = "encode_as_pieces";
        let handle = self.handle(OP)?;
        let mut buf = Vec::new();
        let out = negotiate(negotiate::piece_capacity(utf8.len()), |capacity| {
            buf.resize(capacity, 0);
            let got = self.engine.encode_as_pieces(handle, utf8, &mut buf)?;
            Ok(match Attempt::fit(got.length, capacity) {
                Attempt::Sufficient(_) => Attempt::Sufficient(got),
                Attempt::NeedsCapacity(n) => Attempt::NeedsCapacity(n),
            })
        })
        .map_err(|status| Error::operation(OP, status))?;
        buf.truncate(out.length);
        Ok((buf, out.tokens))
    }
}

/// Splits delimiter-joined piece bytes into exactly `count` strings.
///
/// The delimiter is ASCII, so it can never be a byte inside a multi-byte
/// sequence and a plain byte search is enough.
fn split_pieces(buf: &[u8], count: usize) -> Vec<String> {
    let mut pieces = Vec::with_capacity(count);
    let mut rest = buf;
    for _ in 0..count {
        let end = rest
            .iter()
            .position(|&b| b == PIECE_DELIMITER)
            .unwrap_or(rest.len());
        pieces.push(String::from_utf8_lossy(&rest[..end]).into_owned());
        rest = rest.get(end + 1..).unwrap_or_default();
    }
    pieces
}

impl<E: Engine> Tokenizer for SentencePieceTokenizer<E> {
    type Id = i32;

    fn special_tokens(&self) -> &SpecialTokens<i32> {
        &self.special
    }

    fn number_of_tokens(&self) -> usize {
        self.number_of_tokens
    }

    fn encode_utf8_to_strings(&self, utf8: &[u8]) -> Result<Vec<String>> {
        let (buf, count) = self.delimited_pieces(utf8)?;
        Ok(split_pieces(&buf, count))
    }

    fn encode_utf8_to_ids(&self, utf8: &[u8], prefix: &[i32], suffix: &[i32]) -> Result<Vec<i32>> {
        const OP: &str = "encode_as_ids";
        let handle = self.handle(OP)?;
        let mut ids = Vec::new();
        let len = negotiate(negotiate::token_capacity(utf8.len()), |capacity| {
            ids.resize(capacity, 0);
            let required = self.engine.encode_as_ids(handle, utf8, &mut ids)?;
            Ok(Attempt::fit(required, capacity))
        })
        .map_err(|status| Error::operation(OP, status))?;
        ids.truncate(len);
        Ok(affix::compose(prefix, &ids, suffix))
    }

    fn encode_to_spans(&self, utf8: &[u8]) -> Result<Encoding<i32>> {
        const OP: &str = "encode_as_spans";
        let handle = self.handle(OP)?;
        let mut ids = Vec::new();
        let mut spans = Vec::new();
        let len = negotiate(negotiate::token_capacity(utf8.len()), |capacity| {
            ids.resize(capacity, 0);
            spans.resize(capacity, TokenSpan::default());
            let required = self
                .engine
                .encode_as_spans(handle, utf8, &mut ids, &mut spans)?;
            Ok(Attempt::fit(required, capacity))
        })
        .map_err(|status| Error::operation(OP, status))?;
        ids.truncate(len);
        spans.truncate(len);
        Ok(Encoding { ids, spans })
    }

    fn decode_id(&self, id: i32) -> Result<String> {
        self.decode_ids(&[id])
    }

    fn decode_ids(&self, ids: &[i32]) -> Result<String> {
        const OP: &str = "decode_ids";
        for &id in ids {
            self.check_id(id)?;
        }
        let handle = self.handle(OP)?;
        let mut buf = Vec::new();
        let len = negotiate(negotiate::decode_capacity(ids.len()), |capacity| {
            buf.resize(capacity, 0);
            let required = self.engine.decode_ids(handle, ids, &mut buf)?;
            Ok(Attempt::fit(required, capacity))
        })
        .map_err(|status| Error::operation(OP, status))?;
        buf.truncate(len);
        Ok(match String::from_utf8(buf) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    fn decode_spans(&self, spans: &[TokenSpan], utf8: &[u8]) -> Result<String> {
        tokenizer::decode_spans(spans, utf8)
    }
}

impl<E: Engine> Drop for SentencePieceTokenizer<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_exactly_count_pieces() {
        let buf = "\u{2581}Hel lo \u{2581}wörld".as_bytes();
        assert_eq!(
            split_pieces(buf, 3),
            vec!["\u{2581}Hel", "lo", "\u{2581}wörld"]
        );
    }

    #[test]
    fn split_tolerates_short_buffers() {
        assert_eq!(split_pieces(b"a", 2), vec!["a", ""]);
        assert!(split_pieces(b"", 0).is_empty());
    }
}
