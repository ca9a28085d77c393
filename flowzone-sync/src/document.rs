//! Replica document: an immutable, structurally shared JSON tree.
//!
//! ```text
//!  Document
//!    └── Node::Object(Arc<…>) ── "transport" ── Node::Object(Arc<…>) ── "bpm" ── 120
//!                             ├─ "slots" ───── Node::Array(Arc<…>) ── [ {…}, {…}, … ]
//!                             └─ "riffHistory" …
//! ```
//!
//! Containers sit behind `Arc`, so cloning a [`Document`] is O(1) and a
//! clone is a frozen snapshot: nothing ever mutates a shared container in
//! place. The patch engine builds new documents with `Arc::make_mut`, which
//! copies only the containers along an edit path and leaves every other
//! subtree shared with the previous document.
//!
//! Readers use optional-path access ([`Document::pointer`]) and must not
//! assume any field exists; the engine sends no schema.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

/// Object fields, in the order the engine sent them.
pub type Fields = IndexMap<String, Node>;

/// A node in the replica tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Arc<Vec<Node>>),
    Object(Arc<Fields>),
}

impl Node {
    pub fn empty_object() -> Self {
        Node::Object(Arc::new(Fields::new()))
    }

    pub fn empty_array() -> Self {
        Node::Array(Arc::new(Vec::new()))
    }

    /// Short type name, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "boolean",
            Node::Number(_) => "number",
            Node::String(_) => "string",
            Node::Array(_) => "array",
            Node::Object(_) => "object",
        }
    }

    /// Child addressed by a single path segment: a field name for objects,
    /// a decimal index for arrays.
    pub fn child(&self, segment: &str) -> Option<&Node> {
        match self {
            Node::Object(fields) => fields.get(segment),
            Node::Array(items) => parse_index(segment).and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Resolve a slash-delimited path; empty segments are ignored, so
    /// `""` and `"/"` both address this node.
    pub fn pointer(&self, path: &str) -> Option<&Node> {
        split_path(path).try_fold(self, |node, segment| node.child(segment))
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    pub fn index(&self, index: usize) -> Option<&Node> {
        match self {
            Node::Array(items) => items.get(index),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Node]> {
        match self {
            Node::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            Node::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// Number of children for containers, `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            Node::Array(items) => Some(items.len()),
            Node::Object(fields) => Some(fields.len()),
            _ => None,
        }
    }

    /// Whether both nodes are the same shared container.
    ///
    /// Always `false` for scalars, which carry no identity.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Array(a), Node::Array(b)) => Arc::ptr_eq(a, b),
            (Node::Object(a), Node::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::String(s) => Value::String(s.clone()),
            Node::Array(items) => Value::Array(items.iter().map(Node::to_value).collect()),
            Node::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::String(s),
            Value::Array(items) => {
                Node::Array(Arc::new(items.into_iter().map(Node::from).collect()))
            }
            Value::Object(fields) => Node::Object(Arc::new(
                fields.into_iter().map(|(k, v)| (k, Node::from(v))).collect(),
            )),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_unit(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Number(n) => n.serialize(serializer),
            Node::String(s) => serializer.serialize_str(s),
            Node::Array(items) => serializer.collect_seq(items.iter()),
            Node::Object(fields) => serializer.collect_map(fields.iter()),
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Node::from)
    }
}

/// The replica: a rooted [`Node`] tree.
///
/// A `Document` is never mutated after construction; new versions come
/// from a full snapshot or from [`patch::apply`](crate::patch::apply).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    root: Node,
}

impl Document {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    /// See [`Node::pointer`].
    pub fn pointer(&self, path: &str) -> Option<&Node> {
        self.root.pointer(path)
    }

    /// Top-level field names, for diagnostics.
    pub fn top_level_keys(&self) -> Vec<&str> {
        self.root
            .as_object()
            .map(|fields| fields.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        self.root.to_value()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new(Node::empty_object())
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        Self::new(Node::from(value))
    }
}

impl From<Node> for Document {
    fn from(root: Node) -> Self {
        Self::new(root)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Split a slash-delimited path, dropping empty segments.
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Whether a segment addresses an array position (ASCII digits only).
pub(crate) fn is_index_like(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

pub(crate) fn parse_index(segment: &str) -> Option<usize> {
    if is_index_like(segment) {
        segment.parse().ok()
    } else {
        None
    }
}
