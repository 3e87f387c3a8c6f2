use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Separator between segments of a store path (`dungeons.settings.3.unlock`).
pub const PATH_SEPARATOR: char = '.';

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("no configuration value at '{0}'")]
    UnknownPath(String),
    #[error("'{0}' is a group of values, not a single value")]
    NotALeaf(String),
    #[error("'{path}' holds {found}, expected {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("configuration snapshot must be a JSON object at the top level")]
    NotAnObject,
    #[error("could not parse configuration snapshot: {0}")]
    Parse(String),
    #[error("could not read configuration snapshot: {0}")]
    Io(String),
}

/// A single configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
    /// Enabled ids, in insertion order, without duplicates.
    IdSet(Vec<i64>),
    /// Anything no control edits (floats, nulls, lists of objects). Kept
    /// verbatim so the snapshot survives a round trip.
    Raw(JsonValue),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "a bool",
            Value::Int(_) => "an integer",
            Value::Text(_) => "text",
            Value::IdSet(_) => "a set of ids",
            Value::Raw(_) => "a raw value",
        }
    }

    fn same_kind(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    fn from_json(json: JsonValue) -> Value {
        match json {
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Raw(JsonValue::Number(n)),
            },
            JsonValue::String(s) => Value::Text(s),
            JsonValue::Array(items) => {
                let ids: Option<Vec<i64>> = items.iter().map(JsonValue::as_i64).collect();
                match ids {
                    Some(ids) => {
                        let mut set = Vec::with_capacity(ids.len());
                        for id in ids {
                            if !set.contains(&id) {
                                set.push(id);
                            }
                        }
                        Value::IdSet(set)
                    }
                    None => Value::Raw(JsonValue::Array(items)),
                }
            }
            other => Value::Raw(other),
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::IdSet(ids) => JsonValue::Array(ids.iter().map(|id| JsonValue::from(*id)).collect()),
            Value::Raw(raw) => raw.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(Value),
    Branch(Vec<(String, Node)>),
}

impl Node {
    fn from_json(json: JsonValue) -> Node {
        match json {
            JsonValue::Object(map) => Node::Branch(
                map.into_iter()
                    .map(|(key, value)| (key, Node::from_json(value)))
                    .collect(),
            ),
            other => Node::Leaf(Value::from_json(other)),
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Node::Leaf(value) => value.to_json(),
            Node::Branch(children) => {
                let mut map = Map::new();
                for (key, child) in children {
                    map.insert(key.clone(), child.to_json());
                }
                JsonValue::Object(map)
            }
        }
    }

    fn child(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Branch(children) => children.iter().find(|(k, _)| k == key).map(|(_, n)| n),
            Node::Leaf(_) => None,
        }
    }

    fn child_mut(&mut self, key: &str) -> Option<&mut Node> {
        match self {
            Node::Branch(children) => children
                .iter_mut()
                .find(|(k, _)| k == key)
                .map(|(_, n)| n),
            Node::Leaf(_) => None,
        }
    }
}

/// Joins path segments with [`PATH_SEPARATOR`].
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let mut path = String::new();
    for segment in segments {
        if !path.is_empty() {
            path.push(PATH_SEPARATOR);
        }
        path.push_str(segment.as_ref());
    }
    path
}

/// Mutable tree of option values loaded from a server snapshot.
///
/// Every path a control writes to must already exist in the snapshot:
/// writes replace leaves and never add structure.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigStore {
    root: Node,
}

impl ConfigStore {
    pub fn from_snapshot(snapshot: JsonValue) -> Result<Self, StoreError> {
        if !snapshot.is_object() {
            return Err(StoreError::NotAnObject);
        }
        Ok(Self {
            root: Node::from_json(snapshot),
        })
    }

    pub fn from_json_str(data: &str) -> Result<Self, StoreError> {
        let json: JsonValue =
            serde_json::from_str(data).map_err(|e| StoreError::Parse(e.to_string()))?;
        Self::from_snapshot(json)
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let data = fs::read_to_string(path)
            .map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&data)
    }

    fn node(&self, path: &str) -> Result<&Node, StoreError> {
        let mut node = &self.root;
        for segment in path.split(PATH_SEPARATOR) {
            node = node
                .child(segment)
                .ok_or_else(|| StoreError::UnknownPath(path.to_string()))?;
        }
        Ok(node)
    }

    fn leaf_mut(&mut self, path: &str) -> Result<&mut Value, StoreError> {
        let mut node = &mut self.root;
        for segment in path.split(PATH_SEPARATOR) {
            node = node
                .child_mut(segment)
                .ok_or_else(|| StoreError::UnknownPath(path.to_string()))?;
        }
        match node {
            Node::Leaf(value) => Ok(value),
            Node::Branch(_) => Err(StoreError::NotALeaf(path.to_string())),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.node(path).is_ok()
    }

    pub fn get(&self, path: &str) -> Result<&Value, StoreError> {
        match self.node(path)? {
            Node::Leaf(value) => Ok(value),
            Node::Branch(_) => Err(StoreError::NotALeaf(path.to_string())),
        }
    }

    pub fn get_bool(&self, path: &str) -> Result<bool, StoreError> {
        match self.get(path)? {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch(path, "a bool", other)),
        }
    }

    pub fn get_int(&self, path: &str) -> Result<i64, StoreError> {
        match self.get(path)? {
            Value::Int(i) => Ok(*i),
            other => Err(mismatch(path, "an integer", other)),
        }
    }

    pub fn get_text(&self, path: &str) -> Result<&str, StoreError> {
        match self.get(path)? {
            Value::Text(s) => Ok(s),
            other => Err(mismatch(path, "text", other)),
        }
    }

    pub fn get_id_set(&self, path: &str) -> Result<&[i64], StoreError> {
        match self.get(path)? {
            Value::IdSet(ids) => Ok(ids),
            other => Err(mismatch(path, "a set of ids", other)),
        }
    }

    /// Child keys of the group at `path`, in snapshot order.
    pub fn children(&self, path: &str) -> Result<Vec<&str>, StoreError> {
        match self.node(path)? {
            Node::Branch(children) => Ok(children.iter().map(|(k, _)| k.as_str()).collect()),
            Node::Leaf(value) => Err(mismatch(path, "a group of values", value)),
        }
    }

    /// Replaces the value at an existing leaf. The new value must be of the
    /// same kind as the old one; raw leaves accept anything.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), StoreError> {
        let slot = self.leaf_mut(path)?;
        if !matches!(slot, Value::Raw(_)) && !slot.same_kind(&value) {
            return Err(StoreError::TypeMismatch {
                path: path.to_string(),
                expected: slot.kind_name(),
                found: value.kind_name(),
            });
        }
        log::debug!("config {} = {:?}", path, value);
        *slot = value;
        Ok(())
    }

    /// Adds `id` to (or removes it from) the id set at `path`. Returns
    /// whether the set changed.
    pub fn toggle_membership(&mut self, path: &str, id: i64, present: bool) -> Result<bool, StoreError> {
        let mut ids = self.get_id_set(path)?.to_vec();
        let position = ids.iter().position(|&x| x == id);
        let changed = match (present, position) {
            (true, None) => {
                ids.push(id);
                true
            }
            (false, Some(idx)) => {
                ids.remove(idx);
                true
            }
            _ => false,
        };
        if changed {
            self.set(path, Value::IdSet(ids))?;
        }
        Ok(changed)
    }

    /// The whole tree as JSON, in the shape the server expects.
    pub fn snapshot(&self) -> JsonValue {
        self.root.to_json()
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        Value::from_json(json)
    }
}

impl Serialize for ConfigStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

fn mismatch(path: &str, expected: &'static str, found: &Value) -> StoreError {
    StoreError::TypeMismatch {
        path: path.to_string(),
        expected,
        found: found.kind_name(),
    }
}
