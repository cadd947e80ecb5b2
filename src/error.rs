use thiserror::Error;

use crate::engine::Status;

pub type Result<T> = std::result::Result<T, Error>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    /// Construction failed; any partially created processor was released.
    #[error("initialization failed: {reason}")]
    Initialization {
        reason: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// An engine call reported a non-Ok status.
    #[error("{operation} failed with status {status}")]
    Operation {
        operation: &'static str,
        status: Status,
    },

    #[error("id {id} is out of range, must be in 0..{limit}")]
    Range { id: i64, limit: usize },

    /// A span handed to `decode_spans` does not lie inside the buffer.
    #[error("span {begin}..{end} lies outside a buffer of {len} bytes")]
    Span { begin: usize, end: usize, len: usize },
}

impl Error {
    pub(crate) fn init<S: Into<String>>(reason: S) -> Self {
        Error::Initialization {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn init_with<S, E>(reason: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxedSource>,
    {
        Error::Initialization {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub(crate) fn operation(operation: &'static str, status: Status) -> Self {
        Error::Operation { operation, status }
    }

    pub fn is_initialization(&self) -> bool {
        matches!(self, Error::Initialization { .. })
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Error::Range { .. })
    }

    pub fn is_span(&self) -> bool {
        matches!(self, Error::Span { .. })
    }

    /// Engine status behind an `Operation` error.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Operation { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Malformed persisted model metadata.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormatError {
    #[error("unexpected end of data at offset {0}")]
    Truncated(usize),

    #[error("varint too long at offset {0}")]
    VarintOverflow(usize),

    #[error("unsupported wire type {wire_type} at offset {offset}")]
    WireType { wire_type: u8, offset: usize },

    #[error("invalid UTF-8 in piece {index}")]
    PieceUtf8 { index: usize },

    #[error("unknown piece type {0}")]
    PieceType(u64),

    #[error("model contains no pieces")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let e = Error::operation("encode_as_ids", Status::Internal);
        assert_eq!(e.to_string(), "encode_as_ids failed with status Internal");
        assert_eq!(e.status(), Some(Status::Internal));

        let e = Error::Range { id: -1, limit: 8 };
        assert!(e.is_range());
        assert_eq!(e.to_string(), "id -1 is out of range, must be in 0..8");

        let e = Error::Span { begin: 2, end: 9, len: 4 };
        assert!(e.is_span() && !e.is_range());
        assert_eq!(e.to_string(), "span 2..9 lies outside a buffer of 4 bytes");
    }

    #[test]
    fn initialization_keeps_source() {
        let e = Error::init_with("bad model", FormatError::Empty);
        assert!(e.is_initialization());
        let source = std::error::Error::source(&e).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("model contains no pieces"));
    }
}
