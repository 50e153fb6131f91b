//! Wire messages for livesync.
//!
//! The server sends JSON text frames. A frame is either a keepalive ping or a
//! structured update:
//!
//! ```text
//! ping                        (bare text, or the JSON string "ping")
//! {"ping":true}
//! {"id":"s1","version":7,"delta":false,"body":{...}}
//! {"version":8,"delta":true,"body":[{"op":"replace","path":"/a","value":1}]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{PatchError, SessionId, SyncError, Version};

/// The literal keepalive marker exchanged in both directions.
pub const PING: &str = "ping";

/// A message received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Keepalive, carries no document data.
    Ping,
    /// Document update (full snapshot or delta).
    Data(DataUpdate),
}

/// A structured document update.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUpdate {
    /// Session token, present on the first message of a session.
    pub id: Option<SessionId>,
    /// Document version after this update is applied.
    pub version: Version,
    /// Whether `body` is a list of patch operations rather than a full value.
    pub delta: bool,
    /// Full document (`delta == false`) or patch operations (`delta == true`).
    pub body: Option<Value>,
}

#[derive(Deserialize)]
struct WireUpdate {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    delta: bool,
    #[serde(default)]
    body: Option<Value>,
}

impl Update {
    /// Decode a text frame.
    ///
    /// Both keepalive shapes are accepted on every transport.
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        let trimmed = text.trim();
        if trimmed == PING {
            return Ok(Update::Ping);
        }

        let value: Value =
            serde_json::from_str(trimmed).map_err(|e| SyncError::Parse(e.to_string()))?;
        let map = match value {
            Value::String(s) if s == PING => return Ok(Update::Ping),
            Value::Object(map) => map,
            other => {
                return Err(SyncError::Parse(format!(
                    "expected an object, got {}",
                    type_name(&other)
                )))
            }
        };
        if map.get("ping").is_some_and(is_truthy) {
            return Ok(Update::Ping);
        }

        let wire: WireUpdate = serde_json::from_value(Value::Object(map))
            .map_err(|e| SyncError::Parse(e.to_string()))?;
        Ok(Update::Data(DataUpdate {
            id: wire.id.filter(|id| !id.is_empty()).map(SessionId::new),
            version: Version::new(wire.version),
            delta: wire.delta,
            body: wire.body,
        }))
    }

    /// Encode as a text frame, the way a server would send it.
    pub fn to_text(&self) -> String {
        match self {
            Update::Ping => json!({ "ping": true }).to_string(),
            Update::Data(data) => {
                let mut map = Map::new();
                if let Some(id) = &data.id {
                    map.insert("id".into(), Value::String(id.to_string()));
                }
                map.insert("version".into(), json!(data.version.value()));
                map.insert("delta".into(), Value::Bool(data.delta));
                if let Some(body) = &data.body {
                    map.insert("body".into(), body.clone());
                }
                Value::Object(map).to_string()
            }
        }
    }
}

/// JavaScript-style truthiness, used for the `ping` flag.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// RFC 6902 operation names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Insert a value.
    Add,
    /// Delete a value.
    Remove,
    /// Overwrite a value.
    Replace,
    /// Relocate a value.
    Move,
    /// Duplicate a value.
    Copy,
    /// Assert a value.
    Test,
}

impl OpKind {
    /// Look up an op by its wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "add" => Some(OpKind::Add),
            "remove" => Some(OpKind::Remove),
            "replace" => Some(OpKind::Replace),
            "move" => Some(OpKind::Move),
            "copy" => Some(OpKind::Copy),
            "test" => Some(OpKind::Test),
            _ => None,
        }
    }

    /// Wire name of this op.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Remove => "remove",
            OpKind::Replace => "replace",
            OpKind::Move => "move",
            OpKind::Copy => "copy",
            OpKind::Test => "test",
        }
    }

    fn requires_value(&self) -> bool {
        matches!(self, OpKind::Add | OpKind::Replace | OpKind::Test)
    }

    fn requires_from(&self) -> bool {
        matches!(self, OpKind::Move | OpKind::Copy)
    }
}

/// A single path-addressed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    /// The operation.
    pub op: OpKind,
    /// RFC 6901 pointer to the target.
    pub path: String,
    /// Operand for `add`, `replace` and `test`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Source pointer for `move` and `copy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl PatchOperation {
    /// `add` at `path`.
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self::with_value(OpKind::Add, path, value)
    }

    /// `remove` at `path`.
    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: OpKind::Remove,
            path: path.into(),
            value: None,
            from: None,
        }
    }

    /// `replace` at `path`.
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self::with_value(OpKind::Replace, path, value)
    }

    /// `move` from `from` to `path`.
    pub fn move_from(from: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_from(OpKind::Move, from, path)
    }

    /// `copy` from `from` to `path`.
    pub fn copy_from(from: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_from(OpKind::Copy, from, path)
    }

    /// `test` that `path` equals `value`.
    pub fn test(path: impl Into<String>, value: Value) -> Self {
        Self::with_value(OpKind::Test, path, value)
    }

    fn with_value(op: OpKind, path: impl Into<String>, value: Value) -> Self {
        Self {
            op,
            path: path.into(),
            value: Some(value),
            from: None,
        }
    }

    fn with_from(op: OpKind, from: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            op,
            path: path.into(),
            value: None,
            from: Some(from.into()),
        }
    }

    /// Decode and structurally check one operation.
    ///
    /// `index` is the operation's position in its sequence and is carried in
    /// any error.
    pub fn from_value(value: &Value, index: usize) -> Result<Self, PatchError> {
        let map = value.as_object().ok_or(PatchError::NotAnObject { index })?;

        let op = match map.get("op") {
            Some(Value::String(name)) => OpKind::parse(name).ok_or_else(|| PatchError::OpInvalid {
                index,
                op: name.clone(),
            })?,
            other => {
                return Err(PatchError::OpInvalid {
                    index,
                    op: other.map(Value::to_string).unwrap_or_default(),
                })
            }
        };

        let path = match map.get("path") {
            Some(Value::String(path)) => path.clone(),
            _ => return Err(PatchError::PathInvalid { index }),
        };

        let from = match map.get("from") {
            Some(Value::String(from)) => Some(from.clone()),
            _ if op.requires_from() => return Err(PatchError::FromRequired { index }),
            _ => None,
        };

        let value = match map.get("value") {
            Some(v) => Some(v.clone()),
            None if op.requires_value() => return Err(PatchError::ValueRequired { index }),
            None => None,
        };

        Ok(Self {
            op,
            path,
            value,
            from,
        })
    }
}

/// Decode a delta body into typed operations.
pub fn parse_operations(body: &Value) -> Result<Vec<PatchOperation>, PatchError> {
    let items = body.as_array().ok_or(PatchError::SequenceNotAnArray)?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| PatchOperation::from_value(item, index))
        .collect()
}
