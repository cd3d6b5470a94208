//! Query descriptors: a plain, JSON-transportable snapshot of builder state.
//!
//! A descriptor is built from the `_`-prefixed fields of a serialized
//! [`Query`]. It is a [`Node`] tree whose leaves are scalars or function
//! sources; on the wire function sources are just strings holding the
//! function text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MapperError, MapperResult};
use crate::query::callable::{looks_like_function, parse_function_source};
use crate::query::{FunctionCompiler, Query, STATE_MARKER};

/// Leaf values.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

/// A node of the descriptor tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Node {
    Scalar(Scalar),
    Mapping(BTreeMap<String, Node>),
    Sequence(Vec<Node>),
    /// Source text of an inline transform, e.g. `function adults() { adults }`.
    FunctionSource(String),
}

impl Node {
    /// Rebuild the tree, sending every leaf through `f`.
    ///
    /// Mappings keep their keys and sequences keep their order.
    pub fn map_leaves<F>(self, f: &mut F) -> Node
    where
        F: FnMut(Node) -> Node,
    {
        match self {
            Node::Mapping(fields) => Node::Mapping(
                fields
                    .into_iter()
                    .map(|(key, node)| (key, node.map_leaves(f)))
                    .collect(),
            ),
            Node::Sequence(items) => {
                Node::Sequence(items.into_iter().map(|node| node.map_leaves(f)).collect())
            }
            leaf => f(leaf),
        }
    }

    /// Fallible variant of [`Node::map_leaves`]; stops at the first error.
    pub fn try_map_leaves<F>(self, f: &mut F) -> MapperResult<Node>
    where
        F: FnMut(Node) -> MapperResult<Node>,
    {
        match self {
            Node::Mapping(fields) => {
                let mut mapped = BTreeMap::new();
                for (key, node) in fields {
                    mapped.insert(key, node.try_map_leaves(f)?);
                }
                Ok(Node::Mapping(mapped))
            }
            Node::Sequence(items) => items
                .into_iter()
                .map(|node| node.try_map_leaves(f))
                .collect::<MapperResult<Vec<_>>>()
                .map(Node::Sequence),
            leaf => f(leaf),
        }
    }

    /// Leaves in depth-first order.
    pub fn leaves(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Node>) {
        match self {
            Node::Mapping(fields) => fields.values().for_each(|n| n.collect_leaves(out)),
            Node::Sequence(items) => items.iter().for_each(|n| n.collect_leaves(out)),
            leaf => out.push(leaf),
        }
    }
}

impl From<serde_json::Value> for Node {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Node::Scalar(Scalar::Null),
            serde_json::Value::Bool(b) => Node::Scalar(Scalar::Bool(b)),
            serde_json::Value::Number(n) => Node::Scalar(Scalar::Number(n)),
            serde_json::Value::String(s) => Node::Scalar(Scalar::String(s)),
            serde_json::Value::Array(items) => {
                Node::Sequence(items.into_iter().map(Node::from).collect())
            }
            serde_json::Value::Object(fields) => Node::Mapping(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Node::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<Node> for serde_json::Value {
    fn from(node: Node) -> Self {
        match node {
            Node::Scalar(Scalar::Null) => serde_json::Value::Null,
            Node::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(b),
            Node::Scalar(Scalar::Number(n)) => serde_json::Value::Number(n),
            Node::Scalar(Scalar::String(s)) | Node::FunctionSource(s) => {
                serde_json::Value::String(s)
            }
            Node::Sequence(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Node::Mapping(fields) => serde_json::Value::Object(
                fields
                    .into_iter()
                    .map(|(key, node)| (key, node.into()))
                    .collect(),
            ),
        }
    }
}

/// Top-level mapping of builder-state fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(BTreeMap<String, Node>);

impl Descriptor {
    pub fn get(&self, field: &str) -> Option<&Node> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read a descriptor from any JSON object.
    pub fn from_json(value: serde_json::Value) -> MapperResult<Self> {
        match Node::from(value) {
            Node::Mapping(fields) => Ok(Self(fields)),
            _ => Err(MapperError::Descriptor(
                "descriptor must be a JSON object".to_string(),
            )),
        }
    }

    pub fn into_json(self) -> serde_json::Value {
        Node::Mapping(self.0).into()
    }
}

/// Snapshot the builder state of `query`.
///
/// Only marker-prefixed fields are kept. Callables come out as
/// [`Node::FunctionSource`] leaves holding their source text.
pub fn to_descriptor(query: &Query) -> MapperResult<Descriptor> {
    let state = serde_json::to_value(query)
        .map_err(|e| MapperError::Descriptor(e.to_string()))?;
    let serde_json::Value::Object(fields) = state else {
        return Err(MapperError::Descriptor(
            "query state did not serialize to an object".to_string(),
        ));
    };

    let mut descriptor = BTreeMap::new();
    for (key, value) in fields {
        if !key.starts_with(STATE_MARKER) {
            continue;
        }
        let node = Node::from(value).map_leaves(&mut |leaf| match leaf {
            Node::Scalar(Scalar::String(s)) if looks_like_function(&s) => Node::FunctionSource(s),
            other => other,
        });
        descriptor.insert(key, node);
    }
    Ok(Descriptor(descriptor))
}

/// Leaf transform applied when reading a descriptor back.
///
/// Function-looking strings are revived as function sources (their body must
/// be a balanced brace block), and the literal strings `"true"` / `"false"`
/// become booleans. The latter also hits string values that happen to spell
/// a boolean.
fn revive(leaf: Node) -> MapperResult<Node> {
    match leaf {
        Node::Scalar(Scalar::String(s)) if looks_like_function(&s) => {
            parse_function_source(&s)?;
            Ok(Node::FunctionSource(s))
        }
        Node::Scalar(Scalar::String(s)) if s == "true" => Ok(Node::Scalar(Scalar::Bool(true))),
        Node::Scalar(Scalar::String(s)) if s == "false" => Ok(Node::Scalar(Scalar::Bool(false))),
        other => Ok(other),
    }
}

/// Replay a descriptor onto `base`.
///
/// Descriptor fields replace the base fields of the same name; the base keeps
/// everything else. Every callable in the result is compiled through
/// `compiler`.
pub fn from_descriptor(
    descriptor: Descriptor,
    base: Query,
    compiler: &dyn FunctionCompiler,
) -> MapperResult<Query> {
    let serde_json::Value::Object(mut merged) = serde_json::to_value(&base)
        .map_err(|e| MapperError::Descriptor(e.to_string()))?
    else {
        return Err(MapperError::Descriptor(
            "query state did not serialize to an object".to_string(),
        ));
    };

    for (key, node) in descriptor.0 {
        let node = node.try_map_leaves(&mut revive)?;
        merged.insert(key, node.into());
    }

    let mut query: Query = serde_json::from_value(serde_json::Value::Object(merged))
        .map_err(|e| MapperError::Descriptor(e.to_string()))?;
    query.compile_callables(compiler)?;
    Ok(query)
}
