//! Translates incremental text edits into annotation line shifts.
//!
//! An LSP `didChange` expresses an edit as a range of replaced text plus
//! the replacement. Only the net change in line count matters here:
//! annotations keep their line identity, so an edit that adds and removes
//! the same number of newlines leaves them untouched.

use crate::store::{AnnotationStore, StoreError, StoreResult};

/// Zero-based line span of the text replaced by an edit, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of lines spanned by the replaced range.
    pub fn spanned(&self) -> u32 {
        self.end - self.start
    }
}

/// Whether an edit changed stored annotation positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Unchanged,
    Shifted,
}

/// Net line-count change of replacing `range` with `new_text`.
pub fn line_delta(range: LineRange, new_text: &str) -> i32 {
    let newlines = new_text.matches('\n').count() as i64;
    (newlines - i64::from(range.spanned())) as i32
}

/// Apply one content change to the annotations of `(ws, path)`.
///
/// Growth shifts every annotation at or below `range.start` down; shrinkage
/// merges the annotations inside `[range.start, range.end]` onto the first
/// line and closes the hole, all in one transaction. A zero delta leaves
/// the store untouched.
pub fn apply_edit(
    store: &mut AnnotationStore,
    ws: &str,
    path: &str,
    range: LineRange,
    new_text: &str,
) -> StoreResult<EditOutcome> {
    if range.start > range.end {
        return Err(StoreError::Usage(format!(
            "inverted line range: start={}, end={}",
            range.start, range.end
        )));
    }

    let delta = line_delta(range, new_text);
    if delta == 0 {
        tracing::debug!(
            start = range.start,
            end = range.end,
            "newline count unchanged, skipping annotation update"
        );
        return Ok(EditOutcome::Unchanged);
    }

    if delta > 0 {
        store.bulk_shift(ws, path, range.start, delta)?;
    } else {
        store.bulk_append_merge(ws, path, range.start, range.end, delta)?;
    }
    Ok(EditOutcome::Shifted)
}
