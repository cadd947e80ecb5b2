use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const UNKNOWN_MARKER: &str = "<unk>";
pub const END_OF_SENTENCE_MARKER: &str = "</s>";
pub const PAD_MARKER: &str = "<pad>";

/// Ids at or above this are rejected; the reverse table is dense.
pub const MAX_EXTERNAL_ID: i64 = i32::MAX as i64;

/// External vocabulary: piece string -> id, plus the dense reverse table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    by_piece: HashMap<String, i64>,
    by_id: Vec<Option<String>>,
}

impl Vocabulary {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| {
            Error::init_with(format!("cannot read vocabulary {}", path.display()), e)
        })?;
        Self::from_json(&data)
    }

    /// Parses a JSON object of `piece -> integer id`.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let object: Map<String, Value> = serde_json::from_slice(data)
            .map_err(|e| Error::init_with("vocabulary is not a JSON object of ids", e))?;
        let mut entries = Vec::with_capacity(object.len());
        for (piece, value) in object {
            let id = value.as_i64().ok_or_else(|| {
                Error::init(format!("vocabulary id for {piece:?} is not an integer: {value}"))
            })?;
            entries.push((piece, id));
        }
        Self::from_entries(entries)
    }

    /// Later entries win when two pieces share an id.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, i64)>,
    {
        let by_piece: Vec<(String, i64)> = entries.into_iter().collect();
        let mut max_id = -1;
        for (piece, id) in &by_piece {
            if !(0..MAX_EXTERNAL_ID).contains(id) {
                return Err(Error::init(format!(
                    "vocabulary id {id} for {piece:?} outside 0..{MAX_EXTERNAL_ID}"
                )));
            }
            max_id = max_id.max(*id);
        }
        if max_id < 0 {
            return Err(Error::init("vocabulary is empty"));
        }

        let mut by_id = vec![None; max_id as usize + 1];
        for (piece, id) in &by_piece {
            by_id[*id as usize] = Some(piece.clone());
        }
        Ok(Vocabulary {
            by_piece: by_piece.into_iter().collect(),
            by_id,
        })
    }

    pub fn get(&self, piece: &str) -> Option<i64> {
        self.by_piece.get(piece).copied()
    }

    /// Id of a marker the vocabulary must contain.
    pub fn require(&self, marker: &str) -> Result<i64> {
        self.get(marker)
            .ok_or_else(|| Error::init(format!("vocabulary lacks required marker {marker:?}")))
    }

    pub fn piece(&self, id: i64) -> Option<&str> {
        let index = usize::try_from(id).ok()?;
        self.by_id.get(index)?.as_deref()
    }

    /// Number of distinct pieces.
    pub fn len(&self) -> usize {
        self.by_piece.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_piece.is_empty()
    }

    /// Size of the id space, `max id + 1`.
    pub fn id_limit(&self) -> usize {
        self.by_id.len()
    }
}
