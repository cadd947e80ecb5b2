//! Pure-Rust engine honouring the native wrapper's contract.
//!
//! Segmentation is greedy longest-match over the model's pieces, not the
//! SentencePiece unigram/BPE search, so ids only agree with the native
//! library for unambiguous input. Normalization does match in spirit:
//! per-character NFKC, whitespace runs collapsed into one word-start marker,
//! leading and trailing whitespace dropped.
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::engine::{Engine, Handle, ModelInfo, PiecesLen, Status, PIECE_DELIMITER, WORD_START};
use crate::model_proto::{ModelPieces, Piece, PieceType};
use crate::span::TokenSpan;

const WORD_PATTERN: &str = r"\S+";
const UNKNOWN_SURFACE: &str = "\u{2047}";

pub struct ReferenceEngine {
    next_handle: AtomicUsize,
    processors: Mutex<HashMap<Handle, Option<Arc<Model>>>>,
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        ReferenceEngine {
            next_handle: AtomicUsize::new(1),
            processors: Mutex::new(HashMap::new()),
        }
    }
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processors created and not yet disposed.
    pub fn live_processors(&self) -> usize {
        self.processors.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn model(&self, handle: Handle) -> Result<Arc<Model>, Status> {
        let processors = self.processors.lock().map_err(|_| Status::Internal)?;
        match processors.get(&handle) {
            Some(Some(model)) => Ok(Arc::clone(model)),
            Some(None) => Err(Status::FailedPrecondition),
            None => Err(Status::InvalidArgument),
        }
    }
}

impl Engine for ReferenceEngine {
    fn create_processor(&self) -> Option<Handle> {
        let handle = Handle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))?;
        self.processors.lock().ok()?.insert(handle, None);
        Some(handle)
    }

    fn load_model(&self, handle: Handle, path: &Path) -> Result<ModelInfo, Status> {
        let data = std::fs::read(path).map_err(|_| Status::NotFound)?;
        let pieces = ModelPieces::parse(&data).map_err(|_| Status::InvalidArgument)?;
        let model = Model::new(pieces)?;
        let info = model.info;

        let mut processors = self.processors.lock().map_err(|_| Status::Internal)?;
        let slot = processors.get_mut(&handle).ok_or(Status::InvalidArgument)?;
        *slot = Some(Arc::new(model));
        debug!(handle = handle.as_raw(), size = info.vocabulary_size, "reference model loaded");
        Ok(info)
    }

    fn encode_as_ids(
        &self,
        handle: Handle,
        input: &[u8],
        output: &mut [i32],
    ) -> Result<usize, Status> {
        let tokens = self.model(handle)?.encode(input)?;
        if tokens.len() <= output.len() {
            for (slot, token) in output.iter_mut().zip(&tokens) {
                *slot = token.id;
            }
        }
        Ok(tokens.len())
    }

    fn encode_as_pieces(
        &self,
        handle: Handle,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<PiecesLen, Status> {
        let model = self.model(handle)?;
        let tokens = model.encode(input)?;
        let required: usize = tokens.iter().map(|t| t.piece.len() + 1).sum();
        if required > output.len() {
            return Ok(PiecesLen {
                length: required,
                tokens: 0,
            });
        }
        let mut off = 0;
        for token in &tokens {
            let bytes = token.piece.as_bytes();
            output[off..off + bytes.len()].copy_from_slice(bytes);
            output[off + bytes.len()] = PIECE_DELIMITER;
            off += bytes.len() + 1;
        }
        Ok(PiecesLen {
            length: required.saturating_sub(1),
            tokens: tokens.len(),
        })
    }

    fn encode_as_spans(
        &self,
        handle: Handle,
        input: &[u8],
        ids: &mut [i32],
        spans: &mut [TokenSpan],
    ) -> Result<usize, Status> {
        let tokens = self.model(handle)?.encode(input)?;
        if tokens.len() <= ids.len().min(spans.len()) {
            for (i, token) in tokens.iter().enumerate() {
                ids[i] = token.id;
                spans[i] = token.span;
            }
        }
        Ok(tokens.len())
    }

    fn decode_ids(&self, handle: Handle, ids: &[i32], output: &mut [u8]) -> Result<usize, Status> {
        let text = self.model(handle)?.decode(ids)?;
        if text.len() <= output.len() {
            output[..text.len()].copy_from_slice(&text);
        }
        Ok(text.len())
    }

    fn dispose_processor(&self, handle: Handle) {
        if let Ok(mut processors) = self.processors.lock() {
            processors.remove(&handle);
        }
    }
}

struct Token {
    id: i32,
    span: TokenSpan,
    piece: String,
}

/// One normalized character and the input bytes it came from.
struct Symbol {
    text: String,
    begin: usize,
    end: usize,
}

struct Model {
    pieces: Vec<Piece>,
    lookup: HashMap<String, i32>,
    byte_pieces: [Option<i32>; 256],
    longest_piece: usize,
    info: ModelInfo,
    words: fancy_regex::Regex,
}

impl Model {
    fn new(pieces: ModelPieces) -> Result<Self, Status> {
        let pieces = pieces.pieces().to_vec();
        let size = i32::try_from(pieces.len()).map_err(|_| Status::OutOfRange)?;
        let words = fancy_regex::Regex::new(WORD_PATTERN).map_err(|_| Status::Internal)?;

        let mut lookup = HashMap::new();
        let mut byte_pieces = [None; 256];
        let mut longest_piece = 1;
        let mut unk = None;
        let (mut bos, mut eos, mut pad) = (-1, -1, -1);

        for (id, p) in (0..size).zip(&pieces) {
            match p.kind {
                PieceType::Normal | PieceType::UserDefined => {
                    longest_piece = longest_piece.max(p.piece.chars().count());
                    lookup.entry(p.piece.clone()).or_insert(id);
                }
                PieceType::Byte => {
                    if let Some(b) = parse_byte_piece(&p.piece) {
                        byte_pieces[b as usize] = Some(id);
                    }
                }
                PieceType::Unknown => {
                    unk.get_or_insert(id);
                }
                PieceType::Control => match p.piece.as_str() {
                    "<s>" => bos = id,
                    "</s>" => eos = id,
                    "<pad>" => pad = id,
                    _ => {}
                },
                PieceType::Unused => {}
            }
        }
        let unk = unk.ok_or(Status::InvalidArgument)?;

        Ok(Model {
            pieces,
            lookup,
            byte_pieces,
            longest_piece,
            info: ModelInfo {
                bos,
                eos,
                pad,
                unk,
                vocabulary_size: size,
            },
            words,
        })
    }

    fn encode(&self, input: &[u8]) -> Result<Vec<Token>, Status> {
        let text = std::str::from_utf8(input).map_err(|_| Status::InvalidArgument)?;
        let mut tokens = Vec::new();
        for m in self.words.find_iter(text) {
            let m = match m {
                Ok(m) => m,
                Err(_) => return Err(Status::Internal),
            };
            self.encode_word(m.as_str(), m.start(), &mut tokens);
        }

        // Hand skipped whitespace to the next token so spans tile the input.
        let mut prev_end = 0;
        for token in &mut tokens {
            token.span.begin = prev_end;
            token.span.end = token.span.end.max(prev_end);
            prev_end = token.span.end;
        }
        if let Some(last) = tokens.last_mut() {
            last.span.end = text.len();
        }
        Ok(tokens)
    }

    fn encode_word(&self, word: &str, offset: usize, tokens: &mut Vec<Token>) {
        let mut symbols = vec![Symbol {
            text: WORD_START.to_string(),
            begin: offset,
            end: offset,
        }];
        for (i, ch) in word.char_indices() {
            let (begin, end) = (offset + i, offset + i + ch.len_utf8());
            for normalized in std::iter::once(ch).nfkc() {
                let normalized = if normalized.is_whitespace() {
                    WORD_START
                } else {
                    normalized
                };
                symbols.push(Symbol {
                    text: normalized.to_string(),
                    begin,
                    end,
                });
            }
        }

        let mut i = 0;
        while i < symbols.len() {
            if let Some((id, next)) = self.longest_match(&symbols, i) {
                tokens.push(Token {
                    id,
                    span: TokenSpan::new(symbols[i].begin, symbols[next - 1].end),
                    piece: self.pieces[id as usize].piece.clone(),
                });
                i = next;
            } else if let Some(ids) = self.byte_fallback(&symbols[i].text) {
                for (k, id) in ids.into_iter().enumerate() {
                    let begin = if k == 0 { symbols[i].begin } else { symbols[i].end };
                    tokens.push(Token {
                        id,
                        span: TokenSpan::new(begin, symbols[i].end),
                        piece: self.pieces[id as usize].piece.clone(),
                    });
                }
                i += 1;
            } else {
                self.push_unknown(&symbols[i], tokens);
                i += 1;
            }
        }
    }

    fn longest_match(&self, symbols: &[Symbol], start: usize) -> Option<(i32, usize)> {
        let limit = symbols.len().min(start + self.longest_piece);
        let mut candidate = String::new();
        let mut best = None;
        for (end, symbol) in (start + 1..=limit).zip(&symbols[start..limit]) {
            candidate.push_str(&symbol.text);
            if let Some(&id) = self.lookup.get(&candidate) {
                best = Some((id, end));
            }
        }
        best
    }

    fn byte_fallback(&self, text: &str) -> Option<Vec<i32>> {
        text.bytes().map(|b| self.byte_pieces[b as usize]).collect()
    }

    /// Runs of unknown symbols collapse into one unknown token.
    fn push_unknown(&self, symbol: &Symbol, tokens: &mut Vec<Token>) {
        if let Some(last) = tokens.last_mut() {
            if last.id == self.info.unk && last.span.end == symbol.begin {
                last.span.end = symbol.end;
                last.piece.push_str(&symbol.text);
                return;
            }
        }
        tokens.push(Token {
            id: self.info.unk,
            span: TokenSpan::new(symbol.begin, symbol.end),
            piece: symbol.text.clone(),
        });
    }

    fn decode(&self, ids: &[i32]) -> Result<Vec<u8>, Status> {
        let mut out = Vec::new();
        for &id in ids {
            let piece = usize::try_from(id)
                .ok()
                .and_then(|i| self.pieces.get(i))
                .ok_or(Status::OutOfRange)?;
            match piece.kind {
                PieceType::Control => {}
                PieceType::Unknown => out.extend_from_slice(UNKNOWN_SURFACE.as_bytes()),
                PieceType::Byte => match parse_byte_piece(&piece.piece) {
                    Some(b) => out.push(b),
                    None => out.extend_from_slice(piece.piece.as_bytes()),
                },
                _ => {
                    let mut buf = [0u8; 4];
                    for ch in piece.piece.chars() {
                        let ch = if ch == WORD_START { ' ' } else { ch };
                        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    }
                }
            }
        }
        if out.first() == Some(&b' ') {
            out.remove(0);
        }
        Ok(out)
    }
}

/// `<0x41>` -> `0x41`.
fn parse_byte_piece(piece: &str) -> Option<u8> {
    let hex = piece.strip_prefix("<0x")?.strip_suffix('>')?;
    u8::from_str_radix(hex, 16).ok()
}
