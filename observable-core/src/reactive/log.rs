//! Mutation log records delivered to per-cell hooks once per flush.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::value::KeyPath;

/// Kind of raw change recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Set,
    Delete,
}

/// One notifying write or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationEvent {
    pub kind: MutationKind,
    /// Keys from the cell's root field down to the mutated key.
    pub path: KeyPath,
}

/// The events one cell produced during one flush, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationBatch {
    /// Sequence number of the flush that delivered this batch.
    pub flush: u64,
    pub events: Vec<MutationEvent>,
}

impl MutationBatch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MutationEvent> {
        self.events.iter()
    }

    /// Encode as JSON, e.g. `{"flush":1,"events":[{"kind":"set","path":["value","a"]}]}`.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Encode as MessagePack with named fields.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }
}

impl<'a> IntoIterator for &'a MutationBatch {
    type Item = &'a MutationEvent;
    type IntoIter = std::slice::Iter<'a, MutationEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Summary of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Sequence number of the flush, 0 when nothing was pending.
    pub flush: u64,
    /// Observers re-run.
    pub observers_run: usize,
    /// Events in the flushed log.
    pub events: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Key;
    use smallvec::smallvec;

    fn batch() -> MutationBatch {
        MutationBatch {
            flush: 3,
            events: vec![
                MutationEvent {
                    kind: MutationKind::Set,
                    path: smallvec![Key::root(), Key::field("a")],
                },
                MutationEvent {
                    kind: MutationKind::Delete,
                    path: smallvec![Key::root(), Key::Index(0)],
                },
            ],
        }
    }

    #[test]
    fn json_encoding_uses_plain_paths() {
        assert_eq!(
            batch().to_json().unwrap(),
            r#"{"flush":3,"events":[{"kind":"set","path":["value","a"]},{"kind":"delete","path":["value",0]}]}"#
        );
    }

    #[test]
    fn msgpack_encoding_is_not_empty() {
        let bytes = batch().to_msgpack().unwrap();
        // fixmap with two named fields
        assert_eq!(bytes[0], 0x82);
    }
}
