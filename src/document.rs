//! Raw profile document parsing.
//!
//! Profiles are written in HCL or JSON; both lower into the same ordered
//! raw form before the typed configuration model is built. The raw form
//! keeps declaration order (block order is evaluation order) and keeps
//! every value untyped, because dynamic-field resolution operates on the
//! raw values rather than the typed model.

use crate::error::Error;
use hcl::eval::Evaluate;
use serde_json::{Map, Value};

/// One entry in a block body: either an attribute value (lowered to JSON)
/// or the nested blocks sharing one key, in declared order.
#[derive(Debug, Clone)]
pub enum Node {
    Value(Value),
    Blocks(Vec<BlockEntry>),
}

/// A parsed block: its labels and its body entries in declared order.
#[derive(Debug, Clone, Default)]
pub struct BlockEntry {
    pub labels: Vec<String>,
    pub body: Vec<(String, Node)>,
}

impl BlockEntry {
    /// The first attribute value stored under `key`.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.body.iter().find_map(|(k, node)| match node {
            Node::Value(v) if k == key => Some(v),
            _ => None,
        })
    }

    /// All nested blocks stored under `key`, flattened across repeated
    /// occurrences, in declared order. JSON documents store nested blocks
    /// as plain objects, so object values are reinterpreted here: a map
    /// whose values are all objects reads as labeled blocks, anything else
    /// as a single unlabeled body. Arrays of objects read as unlabeled
    /// bodies.
    #[must_use]
    pub fn block_entries(&self, key: &str) -> Vec<BlockEntry> {
        let mut out = Vec::new();
        for (k, node) in &self.body {
            if k != key {
                continue;
            }
            match node {
                Node::Blocks(entries) => out.extend(entries.iter().cloned()),
                Node::Value(v) => out.extend(value_as_blocks(v)),
            }
        }
        out
    }

    /// Nested blocks stored under `key`, where the block kind is known to
    /// be unlabeled (`input`, `output`, `fields`). JSON object values are
    /// taken as the block body directly instead of going through the
    /// labeled-entries heuristic.
    #[must_use]
    pub fn singleton_entries(&self, key: &str) -> Vec<BlockEntry> {
        let mut out = Vec::new();
        for (k, node) in &self.body {
            if k != key {
                continue;
            }
            match node {
                Node::Blocks(entries) => out.extend(entries.iter().cloned()),
                Node::Value(v @ Value::Object(_)) => out.push(BlockEntry {
                    labels: Vec::new(),
                    body: object_body(v),
                }),
                Node::Value(Value::Array(items)) => {
                    out.extend(items.iter().map(|item| BlockEntry {
                        labels: Vec::new(),
                        body: object_body(item),
                    }));
                }
                Node::Value(_) => {}
            }
        }
        out
    }

    /// All nested blocks in body order, paired with their keys. Object
    /// values are reinterpreted the same way as in
    /// [`BlockEntry::block_entries`].
    #[must_use]
    pub fn all_block_entries(&self) -> Vec<(String, BlockEntry)> {
        let mut out = Vec::new();
        for (k, node) in &self.body {
            match node {
                Node::Blocks(entries) => {
                    out.extend(entries.iter().cloned().map(|e| (k.clone(), e)));
                }
                Node::Value(v) => {
                    out.extend(value_as_blocks(v).into_iter().map(|e| (k.clone(), e)));
                }
            }
        }
        out
    }

    /// Lowers the body to a plain JSON map. Labeled nested blocks become
    /// objects keyed by label; unlabeled ones become the body object, or an
    /// array of bodies when repeated.
    #[must_use]
    pub fn raw_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (key, node) in &self.body {
            let lowered = match node {
                Node::Value(v) => v.clone(),
                Node::Blocks(entries) => lower_blocks(entries),
            };
            match map.get_mut(key) {
                None => {
                    map.insert(key.clone(), lowered);
                }
                // Repeated keys merge objects and append otherwise; HCL
                // rejects duplicate attributes so this only merges blocks.
                Some(Value::Object(existing)) => {
                    if let Value::Object(incoming) = lowered {
                        existing.extend(incoming);
                    }
                }
                Some(other) => {
                    let prior = other.take();
                    *other = Value::Array(vec![prior, lowered]);
                }
            }
        }
        map
    }
}

fn value_as_blocks(value: &Value) -> Vec<BlockEntry> {
    match value {
        Value::Object(map) => {
            let all_objects =
                !map.is_empty() && map.values().all(|v| matches!(v, Value::Object(_)));
            if all_objects {
                map.iter()
                    .map(|(label, body)| BlockEntry {
                        labels: vec![label.clone()],
                        body: object_body(body),
                    })
                    .collect()
            } else {
                vec![BlockEntry {
                    labels: Vec::new(),
                    body: object_body(value),
                }]
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| BlockEntry {
                labels: Vec::new(),
                body: object_body(item),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn object_body(value: &Value) -> Vec<(String, Node)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), Node::Value(v.clone())))
            .collect(),
        _ => Vec::new(),
    }
}

fn lower_blocks(entries: &[BlockEntry]) -> Value {
    let labeled = entries.iter().all(|e| e.labels.len() == 1);
    if labeled && !entries.is_empty() {
        let mut map = Map::new();
        for entry in entries {
            map.insert(entry.labels[0].clone(), Value::Object(entry.raw_map()));
        }
        return Value::Object(map);
    }

    match entries {
        [single] => Value::Object(single.raw_map()),
        many => Value::Array(
            many.iter()
                .map(|e| Value::Object(e.raw_map()))
                .collect(),
        ),
    }
}

/// A parsed document: the top-level body of the profile.
#[derive(Debug, Clone, Default)]
pub struct Document {
    root: BlockEntry,
}

impl Document {
    /// Parses a profile document. JSON documents are recognized by a
    /// leading `{`; everything else parses as HCL. HCL attribute
    /// expressions are evaluated in an empty context, so variable and
    /// function references are rejected; profile documents carry only
    /// literal values (dynamic behavior goes through `eval_source` maps,
    /// not HCL interpolation).
    ///
    /// # Errors
    ///
    /// Fails on syntax errors, on non-object JSON roots, and on HCL
    /// expressions that require evaluation context.
    pub fn parse(text: &str) -> Result<Self, Error> {
        if text.trim_start().starts_with('{') {
            return Self::parse_json(text);
        }
        Self::parse_hcl(text)
    }

    fn parse_json(text: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(_) = &value else {
            return Err(Error::config("document does not contain a root object"));
        };
        Ok(Self {
            root: BlockEntry {
                labels: Vec::new(),
                body: object_body(&value),
            },
        })
    }

    fn parse_hcl(text: &str) -> Result<Self, Error> {
        let body = hcl::parse(text)?;
        Ok(Self {
            root: lower_hcl_body(body)?,
        })
    }

    #[must_use]
    pub fn block_entries(&self, key: &str) -> Vec<BlockEntry> {
        self.root.block_entries(key)
    }

    #[must_use]
    pub fn singleton_entries(&self, key: &str) -> Vec<BlockEntry> {
        self.root.singleton_entries(key)
    }

    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.root.get_value(key)
    }
}

fn lower_hcl_body(body: hcl::Body) -> Result<BlockEntry, Error> {
    let eval_ctx = hcl::eval::Context::new();
    let mut entries: Vec<(String, Node)> = Vec::new();

    for structure in body {
        match structure {
            hcl::Structure::Attribute(attr) => {
                let key = attr.key.as_str().to_string();
                let value = attr
                    .expr
                    .evaluate(&eval_ctx)
                    .map_err(|e| Error::config(format!("attribute '{key}': {e}")))?;
                let value = serde_json::to_value(&value)?;
                entries.push((key, Node::Value(value)));
            }
            hcl::Structure::Block(block) => {
                let key = block.identifier.as_str().to_string();
                let entry = BlockEntry {
                    labels: block
                        .labels
                        .iter()
                        .map(|l| l.as_str().to_string())
                        .collect(),
                    body: lower_hcl_body(block.body)?.body,
                };

                match entries
                    .iter_mut()
                    .find_map(|(k, node)| match node {
                        Node::Blocks(existing) if *k == key => Some(existing),
                        _ => None,
                    }) {
                    Some(existing) => existing.push(entry),
                    None => entries.push((key, Node::Blocks(vec![entry]))),
                }
            }
        }
    }

    Ok(BlockEntry {
        labels: Vec::new(),
        body: entries,
    })
}
