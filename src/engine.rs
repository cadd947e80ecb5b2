//! Operation set of the native tokenization engine.
//!
//! Every variable-length operation follows the wrapper's capacity contract:
//! it always returns the length it *needs* and only writes the output when
//! that length fits the slice it was given.
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use crate::span::TokenSpan;

/// Delimiter between pieces in `encode_as_pieces` output.
pub const PIECE_DELIMITER: u8 = b' ';

/// Leading character of word-initial pieces (U+2581).
pub const WORD_START: char = '\u{2581}';

/// Status codes shared with the engine (absl-style).
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Status {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Ok,
            1 => Status::Cancelled,
            3 => Status::InvalidArgument,
            4 => Status::DeadlineExceeded,
            5 => Status::NotFound,
            6 => Status::AlreadyExists,
            7 => Status::PermissionDenied,
            8 => Status::ResourceExhausted,
            9 => Status::FailedPrecondition,
            10 => Status::Aborted,
            11 => Status::OutOfRange,
            12 => Status::Unimplemented,
            13 => Status::Internal,
            14 => Status::Unavailable,
            15 => Status::DataLoss,
            16 => Status::Unauthenticated,
            _ => Status::Unknown,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// `Ok(())` for `Status::Ok`, the status itself otherwise.
    pub fn check(self) -> Result<(), Status> {
        match self {
            Status::Ok => Ok(()),
            other => Err(other),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for Status {}

/// Opaque processor handle. `Option<Handle>` doubles as the cleared sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroUsize);

impl Handle {
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Handle)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

/// What `load_model` reports back. Ids are engine ids, `-1` when absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    pub bos: i32,
    pub eos: i32,
    pub pad: i32,
    pub unk: i32,
    pub vocabulary_size: i32,
}

/// Result of `encode_as_pieces`.
///
/// When the output did not fit, `length` is the required capacity and
/// `tokens` is zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PiecesLen {
    pub length: usize,
    pub tokens: usize,
}

pub trait Engine {
    fn create_processor(&self) -> Option<Handle>;

    fn load_model(&self, handle: Handle, path: &Path) -> Result<ModelInfo, Status>;

    /// Returns the number of ids produced; `output` is written only if it fits.
    fn encode_as_ids(&self, handle: Handle, input: &[u8], output: &mut [i32])
        -> Result<usize, Status>;

    fn encode_as_pieces(
        &self,
        handle: Handle,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<PiecesLen, Status>;

    /// `ids` and `spans` have the same capacity.
    fn encode_as_spans(
        &self,
        handle: Handle,
        input: &[u8],
        ids: &mut [i32],
        spans: &mut [TokenSpan],
    ) -> Result<usize, Status>;

    fn decode_ids(&self, handle: Handle, ids: &[i32], output: &mut [u8]) -> Result<usize, Status>;

    fn dispose_processor(&self, handle: Handle);
}

impl<E: Engine + ?Sized> Engine for Arc<E> {
    fn create_processor(&self) -> Option<Handle> {
        (**self).create_processor()
    }

    fn load_model(&self, handle: Handle, path: &Path) -> Result<ModelInfo, Status> {
        (**self).load_model(handle, path)
    }

    fn encode_as_ids(
        &self,
        handle: Handle,
        input: &[u8],
        output: &mut [i32],
    ) -> Result<usize, Status> {
        (**self).encode_as_ids(handle, input, output)
    }

    fn encode_as_pieces(
        &self,
        handle: Handle,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<PiecesLen, Status> {
        (**self).encode_as_pieces(handle, input, output)
    }

    fn encode_as_spans(
        &self,
        handle: Handle,
        input: &[u8],
        ids: &mut [i32],
        spans: &mut [TokenSpan],
    ) -> Result<usize, Status> {
        (**self).encode_as_spans(handle, input, ids, spans)
    }

    fn decode_ids(&self, handle: Handle, ids: &[i32], output: &mut [u8]) -> Result<usize, Status> {
        (**self).decode_ids(handle, ids, output)
    }

    fn dispose_processor(&self, handle: Handle) {
        (**self).dispose_processor(handle)
    }
}
