//! Reference-preserving object graphs.
//!
//! Nodes are [`Shared<N>`] handles. The encoder gives each distinct node an
//! id the first time it is reached and writes it inline as
//! `{"$id": "<n>", ...fields}`; every later visit to the same node, including
//! a cycle back to an ancestor through a [`WeakShared`], is written as
//! `{"$ref": "<n>"}`. Decoding restores exactly one node per id.
//!
//! ```text
//! {"$id":"1","items":[{"$id":"2","id":0,"parent":{"$ref":"1"}}, ...]}
//! ```
//!
//! Nodes are default-constructed first and filled in afterwards, which is
//! what lets a child refer to a parent that is still being decoded.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{GraphError, Result};
use crate::message::PipeMessage;

const ID_KEY: &str = "$id";
const REF_KEY: &str = "$ref";

/// Deepest nesting of objects and arrays a graph document may have.
///
/// `serde_json` refuses to parse documents nested 128 levels or more, so
/// anything deeper is rejected while encoding instead of on the receiver.
pub const MAX_DEPTH: usize = 127;

/// A node in an object graph.
pub type Shared<N> = Arc<RwLock<N>>;

/// A non-owning back-reference to a node.
pub type WeakShared<N> = Weak<RwLock<N>>;

/// The field map a node reads from and writes into.
pub type Fields = Map<String, Value>;

type AnyNode = Arc<dyn Any + Send + Sync>;

/// Wrap a value as a graph node.
pub fn shared<N>(node: N) -> Shared<N> {
    Arc::new(RwLock::new(node))
}

/// A record type that can appear as a node in a [`Graph`].
pub trait GraphNode: Default + Send + Sync + 'static {
    /// Write this node's fields. Nested nodes go through `writer`.
    fn write_fields(&self, writer: &mut GraphWriter, fields: &mut Fields) -> Result<()>;

    /// Populate a default-constructed node from its fields.
    fn read_fields(&mut self, fields: &Fields, reader: &mut GraphReader) -> Result<()>;
}

/// Encodes nodes, tracking identity by allocation.
#[derive(Default)]
pub struct GraphWriter {
    ids: HashMap<usize, u64>,
    depth: usize,
    // Keeps every visited node alive until encoding ends so that an address
    // can never be reused by a different node mid-encode.
    visited: Vec<AnyNode>,
}

impl GraphWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a node, or a reference to it if it was already written.
    pub fn write_node<N: GraphNode>(&mut self, node: &Shared<N>) -> Result<Value> {
        let key = Arc::as_ptr(node) as *const () as usize;
        if let Some(id) = self.ids.get(&key) {
            return Ok(reference(*id));
        }

        if self.depth >= MAX_DEPTH {
            return Err(GraphError::TooDeep { max: MAX_DEPTH }.into());
        }

        let id = self.visited.len() as u64 + 1;
        self.ids.insert(key, id);
        self.visited.push(node.clone());

        let mut fields = Fields::new();
        self.depth += 1;
        let written = {
            let guard = node.read().unwrap_or_else(PoisonError::into_inner);
            guard.write_fields(self, &mut fields)
        };
        self.depth -= 1;
        written?;
        for reserved in [ID_KEY, REF_KEY] {
            if fields.contains_key(reserved) {
                return Err(GraphError::ReservedField(reserved.to_string()).into());
            }
        }
        fields.insert(ID_KEY.to_string(), Value::String(id.to_string()));
        Ok(Value::Object(fields))
    }

    /// Encode a back-reference; a dropped target is written as `null`.
    pub fn write_weak<N: GraphNode>(&mut self, node: &WeakShared<N>) -> Result<Value> {
        match node.upgrade() {
            Some(node) => self.write_node(&node),
            None => Ok(Value::Null),
        }
    }

    /// Encode a list of nodes.
    pub fn write_nodes<N: GraphNode>(&mut self, nodes: &[Shared<N>]) -> Result<Value> {
        nodes
            .iter()
            .map(|node| self.write_node(node))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }

    /// Encode a plain (non-node) value.
    pub fn write_value<S: Serialize + ?Sized>(&mut self, value: &S) -> Result<Value> {
        Ok(serde_json::to_value(value)?)
    }
}

/// Decodes nodes, resolving `$ref`s against the nodes seen so far.
#[derive(Default)]
pub struct GraphReader {
    nodes: HashMap<String, AnyNode>,
}

impl GraphReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a node definition or resolve a reference to one.
    pub fn read_node<N: GraphNode>(&mut self, value: &Value) -> Result<Shared<N>> {
        let object = value.as_object().ok_or(GraphError::ExpectedNode {
            found: kind_of(value),
        })?;

        if let Some(target) = object.get(REF_KEY) {
            let id = id_string(target)?;
            let node = self
                .nodes
                .get(&id)
                .cloned()
                .ok_or_else(|| GraphError::UnknownReference(id.clone()))?;
            return node.downcast::<RwLock<N>>().map_err(|_| {
                GraphError::TypeMismatch {
                    id,
                    expected: type_name::<N>(),
                }
                .into()
            });
        }

        let id = id_string(object.get(ID_KEY).ok_or(GraphError::MissingId)?)?;
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateId(id).into());
        }

        let node: Shared<N> = shared(N::default());
        self.nodes.insert(id, node.clone());

        let mut contents = N::default();
        contents.read_fields(object, self)?;
        *node.write().unwrap_or_else(PoisonError::into_inner) = contents;

        Ok(node)
    }

    /// Decode a back-reference; `null` yields a dangling [`WeakShared`].
    ///
    /// If the reference is the node's first occurrence, the node is kept
    /// alive only for as long as this reader is.
    pub fn read_weak<N: GraphNode>(&mut self, value: &Value) -> Result<WeakShared<N>> {
        if value.is_null() {
            return Ok(Weak::new());
        }
        self.read_node(value).map(|node| Arc::downgrade(&node))
    }

    /// Decode a list of nodes.
    pub fn read_nodes<N: GraphNode>(&mut self, value: &Value) -> Result<Vec<Shared<N>>> {
        let items = value.as_array().ok_or(GraphError::ExpectedNode {
            found: kind_of(value),
        })?;
        items.iter().map(|item| self.read_node(item)).collect()
    }

    /// Decode a plain (non-node) value.
    pub fn read_value<D: DeserializeOwned>(&mut self, value: &Value) -> Result<D> {
        Ok(D::deserialize(value)?)
    }

    /// Look up a required field.
    pub fn field<'a>(&self, fields: &'a Fields, name: &str) -> Result<&'a Value> {
        fields
            .get(name)
            .ok_or_else(|| GraphError::MissingField(name.to_string()).into())
    }
}

fn reference(id: u64) -> Value {
    let mut fields = Fields::new();
    fields.insert(REF_KEY.to_string(), Value::String(id.to_string()));
    Value::Object(fields)
}

fn id_string(value: &Value) -> Result<String> {
    match value {
        Value::String(id) => Ok(id.clone()),
        Value::Number(id) => Ok(id.to_string()),
        _ => Err(GraphError::MissingId.into()),
    }
}

/// Nesting depth of `value` counted in objects and arrays, walked without
/// recursion. Stops early once `limit` is exceeded.
fn nesting_depth(value: &Value, limit: usize) -> usize {
    let mut deepest = 0;
    let mut pending = vec![(value, 1usize)];
    while let Some((value, depth)) = pending.pop() {
        match value {
            Value::Array(items) => pending.extend(items.iter().map(|item| (item, depth + 1))),
            Value::Object(fields) => pending.extend(fields.values().map(|field| (field, depth + 1))),
            _ => continue,
        }
        deepest = deepest.max(depth);
        if deepest > limit {
            break;
        }
    }
    deepest
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// An object graph rooted at one node, carried as a reference-preserving
/// JSON document.
pub struct Graph<N>(pub Shared<N>);

impl<N> Graph<N> {
    pub fn new(root: N) -> Self {
        Graph(shared(root))
    }

    /// The root node.
    pub fn root(&self) -> &Shared<N> {
        &self.0
    }

    pub fn into_root(self) -> Shared<N> {
        self.0
    }
}

impl<N> Clone for Graph<N> {
    fn clone(&self) -> Self {
        Graph(self.0.clone())
    }
}

impl<N> fmt::Debug for Graph<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Graph").field(&type_name::<N>()).finish()
    }
}

impl<N: GraphNode> PipeMessage for Graph<N> {
    fn encode(&self) -> Result<Bytes> {
        let mut writer = GraphWriter::new();
        let document = writer.write_node(&self.0)?;
        if nesting_depth(&document, MAX_DEPTH) > MAX_DEPTH {
            return Err(GraphError::TooDeep { max: MAX_DEPTH }.into());
        }
        Ok(Bytes::from(serde_json::to_vec(&document)?))
    }

    fn decode(bytes: Bytes) -> Result<Self> {
        let document: Value = serde_json::from_slice(&bytes)?;
        let mut reader = GraphReader::new();
        Ok(Graph(reader.read_node(&document)?))
    }
}
