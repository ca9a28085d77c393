//! Incremental patch application for the replica.
//!
//! `apply(document, ops)` is pure: it never touches its input and returns a
//! new [`Document`]. Each op works on a cheap clone of the current root and
//! copies only the containers on its path (`Arc::make_mut`):
//!
//! ```text
//!  before                     after  replace /transport/bpm 128
//!  root ─┬─ transport{bpm:120}     root' ─┬─ transport'{bpm:128}   (copied)
//!        ├─ slots[…] ◄───────────────────├─ (shared)
//!        └─ riffHistory[…] ◄─────────────└─ (shared)
//! ```
//!
//! Ops run strictly in list order, since later ops may depend on structure
//! created by earlier ones. A batch is not a transaction: an op whose path
//! does not resolve is skipped (and reported) and the rest still apply. A
//! skipped op leaves no partial effect behind.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::document::{is_index_like, parse_index, split_path, Document, Node};

/// Edit operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Replace,
    Remove,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Remove => "remove",
        })
    }
}

/// A single structural edit: `{ op, path, value? }`.
///
/// Path segments name object fields or array positions; the segment `-`
/// appends to an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: OpKind,
    pub path: String,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value: Option<Node>,
}

// A present `"value": null` is a real null, not a missing value.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Node>, D::Error> {
    Node::deserialize(deserializer).map(Some)
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: impl Into<Node>) -> Self {
        Self {
            op: OpKind::Add,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn replace(path: impl Into<String>, value: impl Into<Node>) -> Self {
        Self {
            op: OpKind::Replace,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: OpKind::Remove,
            path: path.into(),
            value: None,
        }
    }
}

/// Why a single op was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("path segment `{0}` does not resolve")]
    Unresolved(String),
    #[error("cannot address `{segment}` inside a {kind}")]
    NotAContainer { segment: String, kind: &'static str },
    #[error("`{0}` is not an array index")]
    InvalidIndex(String),
    #[error("index {index} out of range for array of length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("`{0}` requires a value")]
    MissingValue(OpKind),
    #[error("cannot remove the document root")]
    RemoveRoot,
}

/// An op that was not applied, with its position in the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedOp {
    pub index: usize,
    pub path: String,
    pub error: PatchError,
}

/// Result of applying a batch.
#[derive(Debug, Clone)]
pub struct Patched {
    pub document: Document,
    pub skipped: Vec<SkippedOp>,
}

impl Patched {
    /// Number of ops that took effect.
    pub fn applied(&self, batch_len: usize) -> usize {
        batch_len - self.skipped.len()
    }
}

/// Apply `ops` in order to `document`, returning a new document.
pub fn apply(document: &Document, ops: &[PatchOp]) -> Patched {
    let mut root = document.root().clone();
    let mut skipped = Vec::new();

    for (index, op) in ops.iter().enumerate() {
        // Work on a candidate so a failing op cannot leave synthesized
        // containers behind.
        let mut candidate = root.clone();
        match apply_op(&mut candidate, op) {
            Ok(()) => root = candidate,
            Err(error) => {
                log::trace!("skipping patch op {index} ({} {}): {error}", op.op, op.path);
                skipped.push(SkippedOp {
                    index,
                    path: op.path.clone(),
                    error,
                });
            }
        }
    }

    Patched {
        document: Document::new(root),
        skipped,
    }
}

fn apply_op(root: &mut Node, op: &PatchOp) -> Result<(), PatchError> {
    let value = match op.op {
        OpKind::Add | OpKind::Replace => {
            Some(op.value.clone().ok_or(PatchError::MissingValue(op.op))?)
        }
        OpKind::Remove => None,
    };

    let segments: Vec<&str> = split_path(&op.path).collect();
    let Some((last, parents)) = segments.split_last() else {
        return match value {
            Some(value) => {
                *root = value;
                Ok(())
            }
            None => Err(PatchError::RemoveRoot),
        };
    };

    let create = op.op == OpKind::Add;
    let mut cursor = root;
    for (i, segment) in parents.iter().enumerate() {
        cursor = descend(cursor, segment, segments[i + 1], create)?;
    }

    match value {
        Some(value) => set(cursor, last, value),
        None => remove(cursor, last),
    }
}

/// Step into the child named by `segment`, copying the container on write.
///
/// With `create`, a missing child is synthesized: an array when the
/// following segment is index-like, an object otherwise.
fn descend<'a>(
    node: &'a mut Node,
    segment: &str,
    next: &str,
    create: bool,
) -> Result<&'a mut Node, PatchError> {
    match node {
        Node::Object(fields) => {
            if !fields.contains_key(segment) && !create {
                return Err(PatchError::Unresolved(segment.to_string()));
            }
            let fields = Arc::make_mut(fields);
            Ok(fields
                .entry(segment.to_string())
                .or_insert_with(|| empty_container_for(next)))
        }
        Node::Array(items) => {
            let index =
                parse_index(segment).ok_or_else(|| PatchError::InvalidIndex(segment.to_string()))?;
            let len = items.len();
            if index > len || (index == len && !create) {
                return Err(if create {
                    PatchError::OutOfRange { index, len }
                } else {
                    PatchError::Unresolved(segment.to_string())
                });
            }
            let items = Arc::make_mut(items);
            if index == len {
                items.push(empty_container_for(next));
            }
            Ok(&mut items[index])
        }
        other => Err(PatchError::NotAContainer {
            segment: segment.to_string(),
            kind: other.kind(),
        }),
    }
}

fn empty_container_for(next: &str) -> Node {
    if is_index_like(next) {
        Node::empty_array()
    } else {
        Node::empty_object()
    }
}

fn set(container: &mut Node, segment: &str, value: Node) -> Result<(), PatchError> {
    match container {
        Node::Object(fields) => {
            Arc::make_mut(fields).insert(segment.to_string(), value);
            Ok(())
        }
        Node::Array(items) => {
            if segment == "-" {
                Arc::make_mut(items).push(value);
                return Ok(());
            }
            let index =
                parse_index(segment).ok_or_else(|| PatchError::InvalidIndex(segment.to_string()))?;
            let len = items.len();
            match index.cmp(&len) {
                Ordering::Less => Arc::make_mut(items)[index] = value,
                Ordering::Equal => Arc::make_mut(items).push(value),
                // Never pad with holes.
                Ordering::Greater => return Err(PatchError::OutOfRange { index, len }),
            }
            Ok(())
        }
        other => Err(PatchError::NotAContainer {
            segment: segment.to_string(),
            kind: other.kind(),
        }),
    }
}

fn remove(container: &mut Node, segment: &str) -> Result<(), PatchError> {
    match container {
        Node::Object(fields) => {
            if fields.contains_key(segment) {
                Arc::make_mut(fields).shift_remove(segment);
            }
            Ok(())
        }
        Node::Array(items) => {
            let index =
                parse_index(segment).ok_or_else(|| PatchError::InvalidIndex(segment.to_string()))?;
            let len = items.len();
            if index >= len {
                return Err(PatchError::OutOfRange { index, len });
            }
            Arc::make_mut(items).remove(index);
            Ok(())
        }
        other => Err(PatchError::NotAContainer {
            segment: segment.to_string(),
            kind: other.kind(),
        }),
    }
}
