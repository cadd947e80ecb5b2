//! Tokenizer speaking an externally distributed vocabulary (Marian-style
//! `vocab.json`) on top of a [`SentencePieceTokenizer`].
use std::path::Path;

use tracing::{debug, warn};

use crate::affix;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model_proto::ModelPieces;
use crate::sentencepiece::SentencePieceTokenizer;
use crate::span::TokenSpan;
use crate::tokenizer::{join_pieces, Encoding, SpecialTokens, Tokenizer};
use crate::vocab::{Vocabulary, END_OF_SENTENCE_MARKER, PAD_MARKER, UNKNOWN_MARKER};
use crate::DefaultEngine;

pub struct RemappedTokenizer<E: Engine = DefaultEngine> {
    base: SentencePieceTokenizer<E>,
    vocabulary: Vocabulary,
    /// Indexed by engine id.
    remap: Vec<i64>,
    special: SpecialTokens<i64>,
}

impl<E: Engine + Default> RemappedTokenizer<E> {
    pub fn new(model_file: impl AsRef<Path>, vocab_file: impl AsRef<Path>) -> Result<Self> {
        Self::with_engine(E::default(), model_file, vocab_file)
    }
}

impl<E: Engine> RemappedTokenizer<E> {
    /// Any failure after the base tokenizer exists drops it, which releases
    /// its processor before the error reaches the caller.
    pub fn with_engine(
        engine: E,
        model_file: impl AsRef<Path>,
        vocab_file: impl AsRef<Path>,
    ) -> Result<Self> {
        let model_file = model_file.as_ref();
        let vocab_file = vocab_file.as_ref();
        let base = SentencePieceTokenizer::with_engine(engine, model_file)?;

        let (vocabulary, special, remap) =
            match load_remap(model_file, vocab_file, base.number_of_tokens()) {
                Ok(parts) => parts,
                Err(e) => {
                    warn!(vocab = %vocab_file.display(), error = %e, "releasing base processor");
                    return Err(e);
                }
            };

        debug!(
            vocabulary = vocabulary.len(),
            id_limit = vocabulary.id_limit(),
            remapped = remap.len(),
            "external vocabulary loaded"
        );
        Ok(RemappedTokenizer {
            base,
            vocabulary,
            remap,
            special,
        })
    }

    pub fn base(&self) -> &SentencePieceTokenizer<E> {
        &self.base
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Engine id -> external id table.
    pub fn remap_table(&self) -> &[i64] {
        &self.remap
    }

    pub fn dispose(&mut self) {
        self.base.dispose();
    }

    fn external_id(&self, engine_id: i32) -> i64 {
        usize::try_from(engine_id)
            .ok()
            .and_then(|index| self.remap.get(index).copied())
            .unwrap_or(self.unknown())
    }

    fn unknown(&self) -> i64 {
        self.special.unknown.unwrap_or_default()
    }

    fn piece(&self, id: i64) -> Result<&str> {
        let out_of_range = || Error::Range {
            id,
            limit: self.number_of_tokens(),
        };
        if id < 0 || id as u64 >= self.number_of_tokens() as u64 {
            return Err(out_of_range());
        }
        // sparse vocabularies leave ids without a piece
        self.vocabulary.piece(id).ok_or_else(out_of_range)
    }
}

fn load_remap(
    model_file: &Path,
    vocab_file: &Path,
    engine_pieces: usize,
) -> Result<(Vocabulary, SpecialTokens<i64>, Vec<i64>)> {
    let vocabulary = Vocabulary::from_file(vocab_file)?;

    let unknown = vocabulary.require(UNKNOWN_MARKER)?;
    let special = SpecialTokens {
        unknown: Some(unknown),
        begin_of_sentence: None,
        end_of_sentence: Some(vocabulary.require(END_OF_SENTENCE_MARKER)?),
        pad: Some(vocabulary.require(PAD_MARKER)?),
        mask: None,
    };

    let pieces = ModelPieces::from_file(model_file)?;
    if pieces.len() != engine_pieces {
        warn!(
            metadata = pieces.len(),
            engine = engine_pieces,
            "model metadata and engine disagree on piece count"
        );
    }
    let remap = build_remap(&pieces, &vocabulary, unknown);
    Ok((vocabulary, special, remap))
}

/// Non-normal pieces and pieces the vocabulary lacks map to `unknown`.
pub fn build_remap(pieces: &ModelPieces, vocabulary: &Vocabulary, unknown: i64) -> Vec<i64> {
    pieces
        .iter()
        .map(|p| {
            if p.is_normal() {
                vocabulary.get(&p.piece).unwrap_or(unknown)
            } else {
                unknown
            }
        })
        .collect()
}

impl<E: Engine> Tokenizer for RemappedTokenizer<E> {
    type Id = i64;

    fn special_tokens(&self) -> &SpecialTokens<i64> {
        &self.special
    }

    fn number_of_tokens(&self) -> usize {
        self.vocabulary.id_limit()
    }

    fn encode_utf8_to_strings(&self, utf8: &[u8]) -> Result<Vec<String>> {
        self.base.encode_utf8_to_strings(utf8)
    }

    fn encode_utf8_to_ids(&self, utf8: &[u8], prefix: &[i64], suffix: &[i64]) -> Result<Vec<i64>> {
        let engine_ids = self.base.encode_utf8_to_ids(utf8, &[], &[])?;
        Ok(affix::compose_with(prefix, &engine_ids, suffix, |&id| {
            self.external_id(id)
        }))
    }

    fn encode_to_spans(&self, utf8: &[u8]) -> Result<Encoding<i64>> {
        let Encoding { ids, spans } = self.base.encode_to_spans(utf8)?;
        Ok(Encoding {
            ids: ids.into_iter().map(|id| self.external_id(id)).collect(),
            spans,
        })
    }

    fn decode_id(&self, id: i64) -> Result<String> {
        self.decode_ids(&[id])
    }

    fn decode_ids(&self, ids: &[i64]) -> Result<String> {
        let pieces = ids
            .iter()
            .map(|&id| self.piece(id))
            .collect::<Result<Vec<_>>>()?;
        Ok(join_pieces(pieces))
    }

    fn decode_spans(&self, spans: &[TokenSpan], utf8: &[u8]) -> Result<String> {
        self.base.decode_spans(spans, utf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_proto::{Piece, PieceType};

    #[test]
    fn remap_follows_metadata_order() {
        let pieces = ModelPieces::new(vec![
            Piece::new("<unk>", PieceType::Unknown),
            Piece::new("<s>", PieceType::Control),
            Piece::normal("\u{2581}the"),
            Piece::normal("\u{2581}absent"),
            Piece::new("<0x41>", PieceType::Byte),
            Piece::normal("</s>"),
        ]);
        let vocabulary = Vocabulary::from_entries(vec![
            ("</s>".to_string(), 0),
            ("<unk>".to_string(), 1),
            ("\u{2581}the".to_string(), 7),
            ("<s>".to_string(), 9),
        ])
        .unwrap();

        let remap = build_remap(&pieces, &vocabulary, 1);
        // control <s> stays unknown even though the vocabulary has it
        assert_eq!(remap, vec![1, 1, 7, 1, 1, 0]);
    }
}
