use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single contiguous edit: delete `delete_len` bytes at `pos`, then insert
/// `insert` at the same position. Offsets address the document state at the
/// operation's base revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditSpan {
    pub pos: usize,
    #[serde(default)]
    pub delete_len: usize,
    #[serde(default)]
    pub insert: String,
}

impl EditSpan {
    pub fn insert(pos: usize, text: impl Into<String>) -> Self {
        Self {
            pos,
            delete_len: 0,
            insert: text.into(),
        }
    }

    pub fn delete(pos: usize, len: usize) -> Self {
        Self {
            pos,
            delete_len: len,
            insert: String::new(),
        }
    }

    pub fn replace(pos: usize, len: usize, text: impl Into<String>) -> Self {
        Self {
            pos,
            delete_len: len,
            insert: text.into(),
        }
    }

    /// End of the deleted range (exclusive), in base coordinates.
    pub fn end(&self) -> usize {
        self.pos + self.delete_len
    }

    pub fn is_noop(&self) -> bool {
        self.delete_len == 0 && self.insert.is_empty()
    }
}

/// An edit submitted by a participant against a known base revision.
///
/// Immutable once created; `client_seq` identifies the submission for
/// idempotent retry detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    pub participant_id: String,
    pub base_revision: u64,
    pub spans: Vec<EditSpan>,
    pub client_seq: u64,
}

impl EditOperation {
    pub fn new(
        participant_id: impl Into<String>,
        base_revision: u64,
        spans: Vec<EditSpan>,
        client_seq: u64,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            base_revision,
            spans,
            client_seq,
        }
    }

    /// Spans sorted ascending with empty and overlapping spans dropped.
    /// Within one operation spans must address disjoint ranges of the base
    /// document; a span that overlaps an earlier one is discarded.
    pub fn normalized_spans(&self) -> Vec<EditSpan> {
        let mut spans: Vec<EditSpan> = self
            .spans
            .iter()
            .filter(|s| !s.is_noop())
            .cloned()
            .collect();
        spans.sort_by_key(|s| s.pos);

        let mut out: Vec<EditSpan> = Vec::with_capacity(spans.len());
        for span in spans {
            match out.last() {
                Some(prev) if span.pos < prev.end() => continue,
                _ => out.push(span),
            }
        }
        out
    }
}

/// An operation after serialized application: its spans rebased into the
/// coordinates of the document state it was applied to, stamped with the
/// revision it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOperation {
    pub revision: u64,
    pub spans: Vec<EditSpan>,
    pub participant_id: String,
    pub client_seq: u64,
}

impl AppliedOperation {
    /// True when the operation had no surviving effect and the revision was
    /// left unchanged.
    pub fn is_noop(&self) -> bool {
        self.spans.is_empty()
    }
}
