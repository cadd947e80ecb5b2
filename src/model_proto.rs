//! Piece metadata of a serialized SentencePiece `ModelProto`.
//!
//! Only the repeated `pieces` field (1) is decoded; trainer, normalizer and
//! any other fields are skipped by wire type.
use std::fs;
use std::path::Path;

use crate::error::{Error, FormatError, Result};

const FIELD_PIECES: u64 = 1;
const FIELD_PIECE: u64 = 1;
const FIELD_SCORE: u64 = 2;
const FIELD_TYPE: u64 = 3;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PieceType {
    #[default]
    Normal = 1,
    Unknown = 2,
    Control = 3,
    UserDefined = 4,
    Unused = 5,
    Byte = 6,
}

impl PieceType {
    fn from_wire(value: u64) -> std::result::Result<Self, FormatError> {
        Ok(match value {
            1 => PieceType::Normal,
            2 => PieceType::Unknown,
            3 => PieceType::Control,
            4 => PieceType::UserDefined,
            5 => PieceType::Unused,
            6 => PieceType::Byte,
            other => return Err(FormatError::PieceType(other)),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Piece {
    pub piece: String,
    pub score: f32,
    pub kind: PieceType,
}

impl Piece {
    pub fn new(piece: impl Into<String>, kind: PieceType) -> Self {
        Piece {
            piece: piece.into(),
            score: 0.0,
            kind,
        }
    }

    pub fn normal(piece: impl Into<String>) -> Self {
        Piece::new(piece, PieceType::Normal)
    }

    pub fn is_normal(&self) -> bool {
        self.kind == PieceType::Normal
    }
}

/// Pieces in engine-id order: the piece at index `i` has engine id `i`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelPieces {
    pieces: Vec<Piece>,
}

impl ModelPieces {
    pub fn new(pieces: Vec<Piece>) -> Self {
        ModelPieces { pieces }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| {
            Error::init_with(format!("cannot read model {}", path.display()), e)
        })?;
        Self::parse(&data).map_err(|e| {
            Error::init_with(format!("cannot parse model {}", path.display()), e)
        })
    }

    pub fn parse(data: &[u8]) -> std::result::Result<Self, FormatError> {
        let mut pieces = Vec::new();
        let mut off = 0;
        while off < data.len() {
            let (field, wire_type) = read_tag(data, &mut off)?;
            if field == FIELD_PIECES && wire_type == WIRE_LEN {
                let body = read_len_delimited(data, &mut off)?;
                pieces.push(parse_piece(body, pieces.len())?);
            } else {
                skip_field(data, &mut off, wire_type)?;
            }
        }
        if pieces.is_empty() {
            return Err(FormatError::Empty);
        }
        Ok(ModelPieces { pieces })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut body = Vec::new();
        for p in &self.pieces {
            body.clear();
            write_tag(&mut body, FIELD_PIECE, WIRE_LEN);
            write_varint(&mut body, p.piece.len() as u64);
            body.extend_from_slice(p.piece.as_bytes());
            write_tag(&mut body, FIELD_SCORE, WIRE_FIXED32);
            body.extend_from_slice(&p.score.to_le_bytes());
            if p.kind != PieceType::Normal {
                write_tag(&mut body, FIELD_TYPE, WIRE_VARINT);
                write_varint(&mut body, p.kind as u64);
            }
            write_tag(&mut out, FIELD_PIECES, WIRE_LEN);
            write_varint(&mut out, body.len() as u64);
            out.extend_from_slice(&body);
        }
        out
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Piece> {
        self.pieces.iter()
    }
}

fn parse_piece(data: &[u8], index: usize) -> std::result::Result<Piece, FormatError> {
    let mut piece = Piece::normal(String::new());
    let mut off = 0;
    while off < data.len() {
        let (field, wire_type) = read_tag(data, &mut off)?;
        match (field, wire_type) {
            (FIELD_PIECE, WIRE_LEN) => {
                let raw = read_len_delimited(data, &mut off)?;
                piece.piece = std::str::from_utf8(raw)
                    .map_err(|_| FormatError::PieceUtf8 { index })?
                    .to_string();
            }
            (FIELD_SCORE, WIRE_FIXED32) => {
                piece.score = f32::from_le_bytes(read_fixed::<4>(data, &mut off)?);
            }
            (FIELD_TYPE, WIRE_VARINT) => {
                piece.kind = PieceType::from_wire(read_varint(data, &mut off)?)?;
            }
            _ => skip_field(data, &mut off, wire_type)?,
        }
    }
    Ok(piece)
}

fn read_tag(data: &[u8], off: &mut usize) -> std::result::Result<(u64, u8), FormatError> {
    let key = read_varint(data, off)?;
    Ok((key >> 3, (key & 0x7) as u8))
}

fn read_varint(data: &[u8], off: &mut usize) -> std::result::Result<u64, FormatError> {
    let start = *off;
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let byte = *data.get(*off).ok_or(FormatError::Truncated(*off))?;
        *off += 1;
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(FormatError::VarintOverflow(start))
}

fn read_len_delimited<'a>(
    data: &'a [u8],
    off: &mut usize,
) -> std::result::Result<&'a [u8], FormatError> {
    let len = read_varint(data, off)? as usize;
    let end = off.checked_add(len).ok_or(FormatError::Truncated(*off))?;
    let body = data.get(*off..end).ok_or(FormatError::Truncated(*off))?;
    *off = end;
    Ok(body)
}

fn read_fixed<const N: usize>(
    data: &[u8],
    off: &mut usize,
) -> std::result::Result<[u8; N], FormatError> {
    let bytes = data.get(*off..*off + N).ok_or(FormatError::Truncated(*off))?;
    *off += N;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn skip_field(data: &[u8], off: &mut usize, wire_type: u8) -> std::result::Result<(), FormatError> {
    match wire_type {
        WIRE_VARINT => read_varint(data, off).map(|_| ()),
        WIRE_FIXED64 => read_fixed::<8>(data, off).map(|_| ()),
        WIRE_LEN => read_len_delimited(data, off).map(|_| ()),
        WIRE_FIXED32 => read_fixed::<4>(data, off).map(|_| ()),
        other => Err(FormatError::WireType {
            wire_type: other,
            offset: *off,
        }),
    }
}

fn write_tag(out: &mut Vec<u8>, field: u64, wire_type: u8) {
    write_varint(out, (field << 3) | u64::from(wire_type));
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}
