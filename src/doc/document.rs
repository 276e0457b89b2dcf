use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::colab::error::SessionError;

use super::operation::{AppliedOperation, EditOperation, EditSpan};
use super::transform::rebase_spans;

/// The authoritative in-memory state of one open file.
///
/// The revision starts at 0 and increases by exactly one per applied
/// operation. The history retains the last `rebase_window` applied operations
/// so late-arriving edits can be rebased; an operation whose base revision
/// has fallen out of the window is rejected with `StaleBase`.
#[derive(Debug)]
pub struct Document {
    path: String,
    content: String,
    revision: u64,
    history: VecDeque<AppliedOperation>,
    /// Previously applied submissions by (participant, client_seq), kept for
    /// idempotent retry detection over the same window as the history.
    recent: HashMap<(String, u64), AppliedOperation>,
    rebase_window: usize,
    dirty: bool,
}

impl Document {
    pub fn new(path: impl Into<String>, content: impl Into<String>, rebase_window: usize) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            revision: 0,
            history: VecDeque::new(),
            recent: HashMap::new(),
            rebase_window: rebase_window.max(1),
            dirty: false,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag if nothing was applied since the flushed
    /// revision was snapshotted.
    pub fn mark_flushed(&mut self, flushed_revision: u64) {
        if self.revision == flushed_revision {
            self.dirty = false;
        }
    }

    /// Apply one operation in server arrival order, rebasing it across every
    /// operation applied since its base revision.
    ///
    /// Returns the previously produced `AppliedOperation` without touching
    /// the document when the same (participant, client_seq) pair was already
    /// applied. A no-op operation, or one whose whole effect was voided by
    /// intervening deletions, leaves the revision unchanged.
    pub fn apply(&mut self, op: &EditOperation) -> Result<AppliedOperation, SessionError> {
        let key = (op.participant_id.clone(), op.client_seq);
        if let Some(previous) = self.recent.get(&key) {
            debug!(
                path = %self.path,
                participant = %op.participant_id,
                client_seq = op.client_seq,
                "duplicate submission, replaying applied operation"
            );
            return Ok(previous.clone());
        }

        if op.base_revision > self.revision {
            // A base ahead of the document cannot come from any state we
            // produced; treat it as unrebasable.
            return Err(SessionError::StaleBase {
                base: op.base_revision,
                current: self.revision,
            });
        }
        let behind = self.revision - op.base_revision;
        if behind > self.history.len() as u64 {
            return Err(SessionError::StaleBase {
                base: op.base_revision,
                current: self.revision,
            });
        }

        let mut spans = op.normalized_spans();
        for intervening in self.history.iter().filter(|a| a.revision > op.base_revision) {
            spans = rebase_spans(spans, &intervening.spans);
        }

        if spans.is_empty() {
            // Nothing survived (or nothing was submitted): the revision is
            // not advanced.
            let applied = AppliedOperation {
                revision: self.revision,
                spans: Vec::new(),
                participant_id: op.participant_id.clone(),
                client_seq: op.client_seq,
            };
            self.recent.insert(key, applied.clone());
            return Ok(applied);
        }

        self.check_bounds(&spans)?;

        // Spans address disjoint ascending ranges of the current content, so
        // applying back-to-front keeps earlier offsets valid.
        for span in spans.iter().rev() {
            self.content.replace_range(span.pos..span.end(), &span.insert);
        }

        self.revision += 1;
        self.dirty = true;
        let applied = AppliedOperation {
            revision: self.revision,
            spans,
            participant_id: op.participant_id.clone(),
            client_seq: op.client_seq,
        };
        self.history.push_back(applied.clone());
        self.recent.insert(key, applied.clone());
        self.compact();
        Ok(applied)
    }

    /// A rebased span must land on UTF-8 boundaries inside the current
    /// content; anything else means the edit cannot be located unambiguously.
    fn check_bounds(&self, spans: &[EditSpan]) -> Result<(), SessionError> {
        for span in spans {
            let valid = span.end() <= self.content.len()
                && self.content.is_char_boundary(span.pos)
                && self.content.is_char_boundary(span.end());
            if !valid {
                return Err(SessionError::StaleBase {
                    base: self.revision,
                    current: self.revision,
                });
            }
        }
        Ok(())
    }

    fn compact(&mut self) {
        while self.history.len() > self.rebase_window {
            self.history.pop_front();
        }
        let oldest = self.history.front().map(|a| a.revision).unwrap_or(self.revision);
        self.recent.retain(|_, a| a.revision + 1 >= oldest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(participant: &str, base: u64, spans: Vec<EditSpan>, seq: u64) -> EditOperation {
        EditOperation::new(participant, base, spans, seq)
    }

    #[test]
    fn revisions_are_contiguous() {
        let mut doc = Document::new("a.txt", "", 64);
        for i in 0..5u64 {
            let applied = doc
                .apply(&op("p1", i, vec![EditSpan::insert(0, "x")], i + 1))
                .unwrap();
            assert_eq!(applied.revision, i + 1);
        }
        assert_eq!(doc.revision(), 5);
        assert_eq!(doc.content(), "xxxxx");
    }

    #[test]
    fn noop_does_not_advance_revision() {
        let mut doc = Document::new("a.txt", "abc", 64);
        let applied = doc.apply(&op("p1", 0, vec![], 1)).unwrap();
        assert!(applied.is_noop());
        assert_eq!(applied.revision, 0);
        assert_eq!(doc.revision(), 0);
        assert!(!doc.is_dirty());
    }

    #[test]
    fn duplicate_submission_replays_without_reapplying() {
        let mut doc = Document::new("a.txt", "abc", 64);
        let first = doc
            .apply(&op("p1", 0, vec![EditSpan::insert(3, "!")], 7))
            .unwrap();
        assert_eq!(doc.content(), "abc!");

        let replay = doc
            .apply(&op("p1", 0, vec![EditSpan::insert(3, "!")], 7))
            .unwrap();
        assert_eq!(replay, first);
        assert_eq!(doc.content(), "abc!");
        assert_eq!(doc.revision(), 1);
    }

    #[test]
    fn same_seq_from_other_participant_is_applied() {
        let mut doc = Document::new("a.txt", "", 64);
        doc.apply(&op("p1", 0, vec![EditSpan::insert(0, "a")], 1)).unwrap();
        doc.apply(&op("p2", 1, vec![EditSpan::insert(1, "b")], 1)).unwrap();
        assert_eq!(doc.content(), "ab");
    }

    #[test]
    fn concurrent_disjoint_edits_converge() {
        // Both ops target revision 0; arrival order must not change the
        // final content for disjoint ranges.
        let a = op("a", 0, vec![EditSpan::insert(0, ">> ")], 1);
        let b = op("b", 0, vec![EditSpan::delete(5, 6)], 1);

        let mut doc1 = Document::new("a.txt", "hello world", 64);
        doc1.apply(&a).unwrap();
        doc1.apply(&b).unwrap();

        let mut doc2 = Document::new("a.txt", "hello world", 64);
        doc2.apply(&b).unwrap();
        doc2.apply(&a).unwrap();

        assert_eq!(doc1.content(), doc2.content());
        assert_eq!(doc1.content(), ">> hello");
    }

    #[test]
    fn rebase_shifts_concurrent_deletion_across_insertion() {
        // Document at revision 3 with content "hello world".
        let mut doc = Document::new("a.txt", "", 64);
        doc.apply(&op("seed", 0, vec![EditSpan::insert(0, "h")], 1)).unwrap();
        doc.apply(&op("seed", 1, vec![EditSpan::insert(1, "ello")], 2)).unwrap();
        doc.apply(&op("seed", 2, vec![EditSpan::insert(5, " world")], 3)).unwrap();
        assert_eq!(doc.revision(), 3);
        assert_eq!(doc.content(), "hello world");

        let a = doc
            .apply(&op("a", 3, vec![EditSpan::insert(5, " there")], 1))
            .unwrap();
        assert_eq!(a.revision, 4);
        assert_eq!(doc.content(), "hello there world");

        let b = doc
            .apply(&op("b", 3, vec![EditSpan::delete(6, 5)], 1))
            .unwrap();
        assert_eq!(b.revision, 5);
        assert_eq!(b.spans, vec![EditSpan::delete(12, 5)]);
        assert_eq!(doc.content(), "hello there ");
    }

    #[test]
    fn voided_operation_leaves_revision_unchanged() {
        let mut doc = Document::new("a.txt", "hello world", 64);
        doc.apply(&op("a", 0, vec![EditSpan::delete(0, 11)], 1)).unwrap();
        assert_eq!(doc.revision(), 1);

        // b replaces a range that no longer exists.
        let b = doc
            .apply(&op("b", 0, vec![EditSpan::replace(2, 3, "LLO")], 1))
            .unwrap();
        assert!(b.is_noop());
        assert_eq!(b.revision, 1);
        assert_eq!(doc.revision(), 1);
        assert_eq!(doc.content(), "");
    }

    #[test]
    fn base_behind_window_is_stale() {
        let mut doc = Document::new("a.txt", "", 2);
        for i in 0..4u64 {
            doc.apply(&op("p1", i, vec![EditSpan::insert(0, "x")], i + 1))
                .unwrap();
        }
        let err = doc
            .apply(&op("p2", 0, vec![EditSpan::insert(0, "y")], 1))
            .unwrap_err();
        assert!(matches!(err, SessionError::StaleBase { base: 0, current: 4 }));
    }

    #[test]
    fn base_ahead_of_document_is_stale() {
        let mut doc = Document::new("a.txt", "", 64);
        let err = doc
            .apply(&op("p1", 3, vec![EditSpan::insert(0, "x")], 1))
            .unwrap_err();
        assert!(matches!(err, SessionError::StaleBase { base: 3, current: 0 }));
    }

    #[test]
    fn out_of_bounds_span_is_rejected_without_effect() {
        let mut doc = Document::new("a.txt", "abc", 64);
        let err = doc
            .apply(&op("p1", 0, vec![EditSpan::delete(1, 10)], 1))
            .unwrap_err();
        assert!(matches!(err, SessionError::StaleBase { .. }));
        assert_eq!(doc.content(), "abc");
        assert_eq!(doc.revision(), 0);
    }

    #[test]
    fn flush_marker_respects_later_edits() {
        let mut doc = Document::new("a.txt", "", 64);
        doc.apply(&op("p1", 0, vec![EditSpan::insert(0, "x")], 1)).unwrap();
        let snapshot = doc.revision();
        doc.apply(&op("p1", 1, vec![EditSpan::insert(1, "y")], 2)).unwrap();
        doc.mark_flushed(snapshot);
        assert!(doc.is_dirty());
        doc.mark_flushed(doc.revision());
        assert!(!doc.is_dirty());
    }
}
