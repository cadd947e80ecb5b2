#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spmtok::engine::{Engine, Handle, ModelInfo, PiecesLen, Status};
use spmtok::model_proto::{ModelPieces, Piece, PieceType};
use spmtok::{ReferenceEngine, TokenSpan};
use tempfile::TempDir;

pub const WORDS: &[&str] = &[
    "Hello", "world", "the", "I", "a", "Tom", "Sawyer", "fence", "paint", "boy", "said", "and",
];
pub const SUFFIXES: &[&str] = &["ing", "er", "ed", "ll", "lo"];

pub struct Fixture {
    pub dir: TempDir,
    pub model: PathBuf,
    pub vocab: PathBuf,
}

/// unk=0, bos=1, eos=2, then "▁", whole words, suffixes, printable ASCII
/// and all 256 byte pieces.
pub fn model_pieces() -> Vec<Piece> {
    let mut pieces = vec![
        Piece::new("<unk>", PieceType::Unknown),
        Piece::new("<s>", PieceType::Control),
        Piece::new("</s>", PieceType::Control),
        Piece::normal("\u{2581}"),
    ];
    for w in WORDS {
        pieces.push(Piece::normal(format!("\u{2581}{w}")));
    }
    for s in SUFFIXES {
        pieces.push(Piece::normal(*s));
    }
    for c in '!'..='~' {
        pieces.push(Piece::normal(c.to_string()));
    }
    for b in 0..=255u8 {
        pieces.push(Piece::new(format!("<0x{b:02X}>"), PieceType::Byte));
    }
    pieces
}

/// Marian-style vocabulary: `</s>`=0, `<unk>`=1, then pieces in reverse
/// model order, `<pad>` last. Byte pieces are left out.
pub fn vocab_json(pieces: &[Piece]) -> String {
    let mut entries = vec![("</s>".to_string(), 0i64), ("<unk>".to_string(), 1)];
    let normal: Vec<&Piece> = pieces.iter().filter(|p| p.is_normal()).collect();
    for (i, p) in normal.iter().rev().enumerate() {
        entries.push((p.piece.clone(), i as i64 + 2));
    }
    let pad = entries.len() as i64;
    entries.push(("<pad>".to_string(), pad));
    let object: serde_json::Map<String, serde_json::Value> = entries
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::from(v)))
        .collect();
    serde_json::Value::Object(object).to_string()
}

pub fn write_model(dir: &Path, name: &str, pieces: Vec<Piece>) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, ModelPieces::new(pieces).to_bytes()).unwrap();
    path
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let pieces = model_pieces();
    let vocab = write_file(dir.path(), "vocab.json", &vocab_json(&pieces));
    let model = write_model(dir.path(), "test.model", pieces);
    Fixture { dir, model, vocab }
}

/// Folds whitespace runs to one space.
pub fn normalize(text: &str) -> String {
    let re = fancy_regex::Regex::new(r"\s+").unwrap();
    re.replace_all(text, " ").into_owned()
}

pub const SHORT_SENTENCE: &str = "Hello world, said the boy.";
pub const PARAGRAPH: &str =
    "Tom said:\tHello world!\n\nThe boy  and the fence,\r\n painting   all day. I said \"yes\".";

/// Delegates to a shared [`ReferenceEngine`], counting calls and optionally
/// failing chosen operations.
#[derive(Clone, Default)]
pub struct CountingEngine {
    pub inner: Arc<ReferenceEngine>,
    pub fail_load: Option<Status>,
    pub fail_encode: Option<Status>,
    pub fail_create: bool,
    pub id_calls: Arc<AtomicUsize>,
    pub decode_calls: Arc<AtomicUsize>,
    pub disposals: Arc<AtomicUsize>,
}

impl CountingEngine {
    pub fn id_calls(&self) -> usize {
        self.id_calls.load(Ordering::SeqCst)
    }

    pub fn decode_calls(&self) -> usize {
        self.decode_calls.load(Ordering::SeqCst)
    }

    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }
}

impl Engine for CountingEngine {
    fn create_processor(&self) -> Option<Handle> {
        if self.fail_create {
            return None;
        }
        self.inner.create_processor()
    }

    fn load_model(&self, handle: Handle, path: &Path) -> Result<ModelInfo, Status> {
        if let Some(status) = self.fail_load {
            return Err(status);
        }
        self.inner.load_model(handle, path)
    }

    fn encode_as_ids(
        &self,
        handle: Handle,
        input: &[u8],
        output: &mut [i32],
    ) -> Result<usize, Status> {
        self.id_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.fail_encode {
            return Err(status);
        }
        self.inner.encode_as_ids(handle, input, output)
    }

    fn encode_as_pieces(
        &self,
        handle: Handle,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<PiecesLen, Status> {
        if let Some(status) = self.fail_encode {
            return Err(status);
        }
        self.inner.encode_as_pieces(handle, input, output)
    }

    fn encode_as_spans(
        &self,
        handle: Handle,
        input: &[u8],
        ids: &mut [i32],
        spans: &mut [TokenSpan],
    ) -> Result<usize, Status> {
        if let Some(status) = self.fail_encode {
            return Err(status);
        }
        self.inner.encode_as_spans(handle, input, ids, spans)
    }

    fn decode_ids(&self, handle: Handle, ids: &[i32], output: &mut [u8]) -> Result<usize, Status> {
        self.decode_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.decode_ids(handle, ids, output)
    }

    fn dispose_processor(&self, handle: Handle) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.inner.dispose_processor(handle)
    }
}
