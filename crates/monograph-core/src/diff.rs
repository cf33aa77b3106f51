//! Structural diffs between two section lists.
//!
//! Sections are aligned by content equality with an LCS pass, so a one-word
//! edit in a long document reports one `Changed` section instead of a whole
//! rewrite. Two static sections at the same aligned position additionally get
//! a line-level diff of their text.
//!
//! Every op's `index` is a position in the working copy at the moment the op
//! is applied, walking the list front to back. That makes `apply` a simple
//! sequential replay.

use crate::error::{MonographError, Result};
use crate::types::Section;
use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, ChangeTag, DiffOp, TextDiff};

/// What happened to a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

/// Line-level tag inside a changed static section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTag {
    Equal,
    Insert,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineChange {
    pub tag: LineTag,
    pub text: String,
}

/// A single section-level op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionChange {
    pub op: ChangeKind,
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Section>,
    /// Populated only for `Changed` between two static sections.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<LineChange>,
}

/// Counts by op kind, for history listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

pub struct DiffEngine;

impl DiffEngine {
    /// Compute the ordered op list turning `a` into `b`. `diff(x, x)` is empty.
    pub fn diff(a: &[Section], b: &[Section]) -> Vec<SectionChange> {
        let mut out = Vec::new();
        let mut cursor = 0usize;

        for op in capture_diff_slices(Algorithm::Lcs, a, b) {
            match op {
                DiffOp::Equal { len, .. } => {
                    cursor += len;
                }
                DiffOp::Delete {
                    old_index, old_len, ..
                } => {
                    for section in &a[old_index..old_index + old_len] {
                        out.push(removed(cursor, section));
                    }
                }
                DiffOp::Insert {
                    new_index, new_len, ..
                } => {
                    for section in &b[new_index..new_index + new_len] {
                        out.push(added(cursor, section));
                        cursor += 1;
                    }
                }
                DiffOp::Replace {
                    old_index,
                    old_len,
                    new_index,
                    new_len,
                } => {
                    let paired = old_len.min(new_len);
                    for k in 0..paired {
                        out.push(changed(cursor, &a[old_index + k], &b[new_index + k]));
                        cursor += 1;
                    }
                    for section in &a[old_index + paired..old_index + old_len] {
                        out.push(removed(cursor, section));
                    }
                    for section in &b[new_index + paired..new_index + new_len] {
                        out.push(added(cursor, section));
                        cursor += 1;
                    }
                }
            }
        }

        out
    }

    /// Replay `ops` on a copy of `a`. Fails with `PatchConflict` when an op's
    /// `before` does not match what is in the working copy.
    pub fn apply(a: &[Section], ops: &[SectionChange]) -> Result<Vec<Section>> {
        let mut working = a.to_vec();

        for change in ops {
            let index = change.index;
            match change.op {
                ChangeKind::Added => {
                    let section = require(change.after.as_ref(), index, "added op has no 'after'")?;
                    if index > working.len() {
                        return Err(conflict(index, "insert position past end"));
                    }
                    working.insert(index, section.clone());
                }
                ChangeKind::Removed => {
                    let expected =
                        require(change.before.as_ref(), index, "removed op has no 'before'")?;
                    check_before(&working, index, expected)?;
                    working.remove(index);
                }
                ChangeKind::Changed => {
                    let expected =
                        require(change.before.as_ref(), index, "changed op has no 'before'")?;
                    let section = require(change.after.as_ref(), index, "changed op has no 'after'")?;
                    check_before(&working, index, expected)?;
                    working[index] = section.clone();
                }
            }
        }

        Ok(working)
    }

    pub fn stats(ops: &[SectionChange]) -> DiffStats {
        ops.iter().fold(DiffStats::default(), |mut acc, op| {
            match op.op {
                ChangeKind::Added => acc.added += 1,
                ChangeKind::Removed => acc.removed += 1,
                ChangeKind::Changed => acc.changed += 1,
            }
            acc
        })
    }

    /// Line diff of two texts, trailing newlines stripped from each line.
    pub fn line_diff(before: &str, after: &str) -> Vec<LineChange> {
        TextDiff::from_lines(before, after)
            .iter_all_changes()
            .map(|change| LineChange {
                tag: match change.tag() {
                    ChangeTag::Equal => LineTag::Equal,
                    ChangeTag::Insert => LineTag::Insert,
                    ChangeTag::Delete => LineTag::Delete,
                },
                text: change.value().trim_end_matches('\n').to_string(),
            })
            .collect()
    }
}

fn added(index: usize, section: &Section) -> SectionChange {
    SectionChange {
        op: ChangeKind::Added,
        index,
        before: None,
        after: Some(section.clone()),
        lines: Vec::new(),
    }
}

fn removed(index: usize, section: &Section) -> SectionChange {
    SectionChange {
        op: ChangeKind::Removed,
        index,
        before: Some(section.clone()),
        after: None,
        lines: Vec::new(),
    }
}

fn changed(index: usize, before: &Section, after: &Section) -> SectionChange {
    let lines = match (before, after) {
        (Section::Static { text: old }, Section::Static { text: new }) => {
            DiffEngine::line_diff(old, new)
        }
        _ => Vec::new(),
    };
    SectionChange {
        op: ChangeKind::Changed,
        index,
        before: Some(before.clone()),
        after: Some(after.clone()),
        lines,
    }
}

fn require<'a>(value: Option<&'a Section>, index: usize, reason: &str) -> Result<&'a Section> {
    value.ok_or_else(|| conflict(index, reason))
}

fn check_before(working: &[Section], index: usize, expected: &Section) -> Result<()> {
    match working.get(index) {
        Some(current) if current == expected => Ok(()),
        Some(_) => Err(conflict(index, "section does not match 'before'")),
        None => Err(conflict(index, "index past end")),
    }
}

fn conflict(index: usize, reason: &str) -> MonographError {
    MonographError::PatchConflict {
        index,
        reason: reason.to_string(),
    }
}
