//! Estimate-then-resize protocol for engine outputs of unknown length.
//!
//! An attempt runs the engine against a scratch buffer of the offered
//! capacity. If the engine needed more, exactly that much is offered once
//! more. A second shortfall or any non-Ok status is fatal.
use tracing::debug;

use crate::engine::Status;

/// Floor for id and span buffers, in items.
pub const TOKEN_FLOOR: usize = 128;
/// On average one token covers more than three input bytes.
pub const BYTES_PER_TOKEN: usize = 3;
/// Floor for delimited piece output, in bytes.
pub const PIECE_FLOOR: usize = 512;
/// Pieces add a marker and a delimiter, so expect about twice the input.
pub const PIECE_BYTES_PER_INPUT_BYTE: usize = 2;
/// Floor for decoded text, in bytes.
pub const DECODE_FLOOR: usize = 512;
pub const DECODE_BYTES_PER_ID: usize = 4;

pub fn token_capacity(input_bytes: usize) -> usize {
    TOKEN_FLOOR.max(input_bytes / BYTES_PER_TOKEN)
}

pub fn piece_capacity(input_bytes: usize) -> usize {
    PIECE_FLOOR.max(input_bytes.saturating_mul(PIECE_BYTES_PER_INPUT_BYTE))
}

pub fn decode_capacity(id_count: usize) -> usize {
    DECODE_FLOOR.max(id_count.saturating_mul(DECODE_BYTES_PER_ID))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempt<T> {
    Sufficient(T),
    NeedsCapacity(usize),
}

impl Attempt<usize> {
    /// Classifies an engine-reported length against the capacity offered.
    pub fn fit(required: usize, capacity: usize) -> Self {
        if required <= capacity {
            Attempt::Sufficient(required)
        } else {
            Attempt::NeedsCapacity(required)
        }
    }
}

pub fn negotiate<T, F>(initial: usize, mut attempt: F) -> Result<T, Status>
where
    F: FnMut(usize) -> Result<Attempt<T>, Status>,
{
    let required = match attempt(initial)? {
        Attempt::Sufficient(value) => return Ok(value),
        Attempt::NeedsCapacity(required) => required,
    };
    debug!(estimate = initial, required, "engine output exceeded estimate, retrying");
    match attempt(required)? {
        Attempt::Sufficient(value) => Ok(value),
        // the engine asked for a size and then outgrew it
        Attempt::NeedsCapacity(_) => Err(Status::ResourceExhausted),
    }
}
