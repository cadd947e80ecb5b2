//! Typed tokenize/detokenize layer over a SentencePiece engine.
//!
//! [`SentencePieceTokenizer`] works in the engine's own id space;
//! [`RemappedTokenizer`] translates to an externally distributed vocabulary.
//! Both implement [`Tokenizer`], including byte-span encoding whose spans
//! rebuild the input exactly through [`Tokenizer::decode_spans`].
pub mod affix;
pub mod engine;
pub mod error;
pub mod model_proto;
#[cfg(feature = "native")]
pub mod native;
pub mod negotiate;
pub mod reference;
pub mod remap;
pub mod sentencepiece;
pub mod span;
pub mod tokenizer;
pub mod vocab;

pub use engine::{Engine, Handle, ModelInfo, Status};
pub use error::{Error, FormatError, Result};
#[cfg(feature = "native")]
pub use native::NativeEngine;
pub use reference::ReferenceEngine;
pub use remap::RemappedTokenizer;
pub use sentencepiece::SentencePieceTokenizer;
pub use span::TokenSpan;
pub use tokenizer::{Encoding, SpecialTokens, Tokenizer};
pub use vocab::Vocabulary;

#[cfg(feature = "native")]
pub type DefaultEngine = NativeEngine;
#[cfg(not(feature = "native"))]
pub type DefaultEngine = ReferenceEngine;
