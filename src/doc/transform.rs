//! Position rebasing for concurrently submitted edit operations.
//!
//! Operations are applied one at a time in server arrival order. An operation
//! whose base revision is behind the document is rebased forward through every
//! intervening applied operation before it takes effect: insertions before a
//! span shift it right, deletions before it shift it left, and spans whose
//! target region was removed by an intervening deletion are dropped. The net
//! result is last-applied-wins for overlapping ranges and both-sides-preserved
//! for disjoint ranges.

use super::operation::EditSpan;

/// Rebase `span` across a single already-applied span.
///
/// `span` is expressed in the coordinates of the document *before* `applied`
/// took effect; the returned spans are in the coordinates *after* it. An
/// intervening insertion strictly inside `span`'s deleted range survives, so
/// one span can split into two. A span whose deleted range was entirely
/// covered by `applied`'s deletion is voided and transforms to nothing.
pub fn transform_span(span: &EditSpan, applied: &EditSpan) -> Vec<EditSpan> {
    let delta = applied.insert.len() as isize - applied.delete_len as isize;
    let shifted = |pos: usize| (pos as isize + delta) as usize;

    // Pure insertion: only the anchor position matters. An insertion at the
    // exact boundary of a concurrent deletion is kept.
    if span.delete_len == 0 {
        if span.pos <= applied.pos {
            return vec![span.clone()];
        }
        if span.pos >= applied.end() {
            return vec![EditSpan {
                pos: shifted(span.pos),
                delete_len: 0,
                insert: span.insert.clone(),
            }];
        }
        // Anchor strictly inside the deleted range: the insertion has nowhere
        // unambiguous to land, drop it.
        return Vec::new();
    }

    // Deletion (possibly a replacement) entirely before the applied span.
    if span.end() <= applied.pos {
        return vec![span.clone()];
    }

    // Entirely after: shift by the applied span's net length change.
    if span.pos >= applied.end() {
        return vec![EditSpan {
            pos: shifted(span.pos),
            delete_len: span.delete_len,
            insert: span.insert.clone(),
        }];
    }

    // Overlap. Keep the parts of the deleted range that survived the applied
    // deletion; the applied insertion sits between them and is not deleted.
    let left_len = applied.pos.saturating_sub(span.pos);
    let right_len = span.end().saturating_sub(applied.end());

    if left_len == 0 && right_len == 0 {
        // The whole target region is gone; the replacement text goes with it.
        return Vec::new();
    }

    let mut out = Vec::with_capacity(2);
    if left_len > 0 {
        out.push(EditSpan {
            pos: span.pos,
            delete_len: left_len,
            insert: span.insert.clone(),
        });
    }
    if right_len > 0 {
        let pos = applied.pos + applied.insert.len();
        let insert = if left_len == 0 {
            span.insert.clone()
        } else {
            String::new()
        };
        // Merge with a contiguous left remnant when the applied span inserted
        // nothing between them.
        if let Some(prev) = out.last_mut() {
            if prev.pos + prev.delete_len == pos {
                prev.delete_len += right_len;
                return out;
            }
        }
        out.push(EditSpan {
            pos,
            delete_len: right_len,
            insert,
        });
    }
    out
}

/// Rebase a whole operation's spans across one applied operation.
///
/// Both span lists are ascending and disjoint within their own coordinate
/// space. The applied operation's later spans are adjusted by the cumulative
/// length change of its earlier spans so each comparison happens in a
/// consistent coordinate space.
pub fn rebase_spans(ours: Vec<EditSpan>, applied: &[EditSpan]) -> Vec<EditSpan> {
    let mut result = ours;
    let mut shift: isize = 0;
    for theirs in applied {
        let adjusted = EditSpan {
            pos: (theirs.pos as isize + shift) as usize,
            delete_len: theirs.delete_len,
            insert: theirs.insert.clone(),
        };
        result = result
            .into_iter()
            .flat_map(|span| transform_span(&span, &adjusted))
            .collect();
        shift += theirs.insert.len() as isize - theirs.delete_len as isize;
    }
    result
}
