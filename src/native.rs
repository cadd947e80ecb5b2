//! Bindings to the `SentencePieceWrapper` shared library.
//!
//! The wrapper reports the required output length on every call and only
//! writes when it fits. Spans come back packed as `end << 32 | begin`.
use std::ffi::{c_char, c_int, c_void, CString};
use std::path::Path;

use crate::engine::{Engine, Handle, ModelInfo, PiecesLen, Status};
use crate::span::TokenSpan;

#[link(name = "SentencePieceWrapper")]
extern "C" {
    fn CreateProcessor() -> *mut c_void;

    fn LoadModel(
        handle: *mut c_void,
        filename: *const c_char,
        bos: *mut c_int,
        eos: *mut c_int,
        pad: *mut c_int,
        unk: *mut c_int,
        size: *mut c_int,
    ) -> c_int;

    fn EncodeAsSpans(
        handle: *mut c_void,
        input: *const c_char,
        input_length: c_int,
        output_ids: *mut c_int,
        output_spans: *mut u64,
        capacity: c_int,
        length: *mut c_int,
    ) -> c_int;

    fn EncodeAsIds(
        handle: *mut c_void,
        input: *const c_char,
        input_length: c_int,
        output: *mut c_int,
        capacity: c_int,
        length: *mut c_int,
    ) -> c_int;

    fn EncodeAsPieces(
        handle: *mut c_void,
        input: *const c_char,
        input_length: c_int,
        output: *mut c_char,
        capacity: c_int,
        length: *mut c_int,
        number_of_tokens: *mut c_int,
    ) -> c_int;

    fn DecodeIds(
        handle: *mut c_void,
        ids: *const c_int,
        number_of_ids: c_int,
        output: *mut c_char,
        capacity: c_int,
        length: *mut c_int,
    ) -> c_int;

    fn DisposeProcessor(handle: *mut c_void);
}

/// Zero-sized: all state lives behind the processor handles.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeEngine;

fn raw(handle: Handle) -> *mut c_void {
    handle.as_raw() as *mut c_void
}

fn c_len(len: usize) -> Result<c_int, Status> {
    c_int::try_from(len).map_err(|_| Status::InvalidArgument)
}

/// Capacities beyond `c_int` are clamped; the engine reports what it needs.
fn c_capacity(len: usize) -> c_int {
    c_int::try_from(len).unwrap_or(c_int::MAX)
}

fn reported(code: c_int, length: c_int) -> Result<usize, Status> {
    Status::from_code(code).check()?;
    usize::try_from(length).map_err(|_| Status::Internal)
}

impl Engine for NativeEngine {
    fn create_processor(&self) -> Option<Handle> {
        // SAFETY: no arguments; returns an owned processor or null.
        let ptr = unsafe { CreateProcessor() };
        Handle::from_raw(ptr as usize)
    }

    fn load_model(&self, handle: Handle, path: &Path) -> Result<ModelInfo, Status> {
        let path = path.to_str().ok_or(Status::InvalidArgument)?;
        let filename = CString::new(path).map_err(|_| Status::InvalidArgument)?;
        let (mut bos, mut eos, mut pad, mut unk, mut size) = (-1, -1, -1, -1, 0);
        // SAFETY: the handle came from CreateProcessor and is still owned by
        // the caller; every out-pointer refers to a live local.
        let code = unsafe {
            LoadModel(
                raw(handle),
                filename.as_ptr(),
                &mut bos,
                &mut eos,
                &mut pad,
                &mut unk,
                &mut size,
            )
        };
        Status::from_code(code).check()?;
        Ok(ModelInfo {
            bos,
            eos,
            pad,
            unk,
            vocabulary_size: size,
        })
    }

    fn encode_as_ids(
        &self,
        handle: Handle,
        input: &[u8],
        output: &mut [i32],
    ) -> Result<usize, Status> {
        let input_length = c_len(input.len())?;
        let mut length = 0;
        // SAFETY: input and output are valid for the lengths passed; the
        // wrapper writes at most `capacity` ids.
        let code = unsafe {
            EncodeAsIds(
                raw(handle),
                input.as_ptr().cast(),
                input_length,
                output.as_mut_ptr(),
                c_capacity(output.len()),
                &mut length,
            )
        };
        reported(code, length)
    }

    fn encode_as_pieces(
        &self,
        handle: Handle,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<PiecesLen, Status> {
        let input_length = c_len(input.len())?;
        let (mut length, mut tokens) = (0, 0);
        // SAFETY: as above; the wrapper writes at most `capacity` bytes.
        let code = unsafe {
            EncodeAsPieces(
                raw(handle),
                input.as_ptr().cast(),
                input_length,
                output.as_mut_ptr().cast(),
                c_capacity(output.len()),
                &mut length,
                &mut tokens,
            )
        };
        Ok(PiecesLen {
            length: reported(code, length)?,
            tokens: usize::try_from(tokens).map_err(|_| Status::Internal)?,
        })
    }

    fn encode_as_spans(
        &self,
        handle: Handle,
        input: &[u8],
        ids: &mut [i32],
        spans: &mut [TokenSpan],
    ) -> Result<usize, Status> {
        let input_length = c_len(input.len())?;
        let capacity = ids.len().min(spans.len());
        let mut packed = vec![0u64; capacity];
        let mut length = 0;
        // SAFETY: `ids` and `packed` both hold at least `capacity` items.
        let code = unsafe {
            EncodeAsSpans(
                raw(handle),
                input.as_ptr().cast(),
                input_length,
                ids.as_mut_ptr(),
                packed.as_mut_ptr(),
                c_capacity(capacity),
                &mut length,
            )
        };
        let required = reported(code, length)?;
        if required <= capacity {
            for (span, &p) in spans.iter_mut().zip(&packed[..required]) {
                *span = TokenSpan::from_packed(p);
            }
        }
        Ok(required)
    }

    fn decode_ids(&self, handle: Handle, ids: &[i32], output: &mut [u8]) -> Result<usize, Status> {
        let number_of_ids = c_len(ids.len())?;
        let mut length = 0;
        // SAFETY: `ids` is read-only for its length; output as above.
        let code = unsafe {
            DecodeIds(
                raw(handle),
                ids.as_ptr(),
                number_of_ids,
                output.as_mut_ptr().cast(),
                c_capacity(output.len()),
                &mut length,
            )
        };
        reported(code, length)
    }

    fn dispose_processor(&self, handle: Handle) {
        // SAFETY: callers release each handle exactly once.
        unsafe { DisposeProcessor(raw(handle)) }
    }
}
