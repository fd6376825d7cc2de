//! Core value model for FluxDB
//!
//! Documents are string-keyed maps of [`Value`], a tagged union over the
//! JSON-like scalar and container types. Values carry a total order
//! (required by sorted indexes) and a hash consistent with equality
//! (required by hash indexes); Int and Double participate in both through
//! the same numeric lifting.

use crate::{FluxError, Result};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Document identifier, allocated per collection
pub type Id = u64;

/// A document: unique string keys mapping to values
///
/// Key order is not observable through the protocol; the ordered map keeps
/// snapshot layout and stats sampling deterministic.
pub type Document = BTreeMap<String, Value>;

/// A single field value
#[derive(Debug, Clone)]
pub enum Value {
    /// 64-bit signed integer
    Int(i64),
    /// IEEE-754 64-bit float
    Double(f64),
    /// Boolean
    Bool(bool),
    /// UTF-8 string
    String(String),
    /// Nested document
    Object(Document),
    /// Ordered sequence of values
    Array(Vec<Value>),
}

impl Value {
    /// Name of the value's type, as used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
    }

    /// Cross-type rank: Number < Bool < String < Object < Array
    fn rank(&self) -> u8 {
        match self {
            Value::Int(_) | Value::Double(_) => 0,
            Value::Bool(_) => 1,
            Value::String(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
        }
    }

    /// True for Int and Double
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    /// True for Object and Array, which sorted lookups reject
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_))
    }

    /// Numeric value lifted to f64, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        let lifted = match self {
            Value::Int(v) => *v as f64,
            Value::Double(v) => *v,
            _ => return None,
        };
        // -0.0 folds to 0.0 so ordering stays consistent with equality
        if lifted == 0.0 {
            Some(0.0)
        } else {
            Some(lifted)
        }
    }

    /// Get as i64, failing when the tag differs
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(other.mismatch("int")),
        }
    }

    /// Get as f64, failing when the tag differs
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Double(v) => Ok(*v),
            other => Err(other.mismatch("double")),
        }
    }

    /// Get as bool, failing when the tag differs
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(other.mismatch("bool")),
        }
    }

    /// Get as &str, failing when the tag differs
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(v) => Ok(v),
            other => Err(other.mismatch("string")),
        }
    }

    /// Get as a nested document, failing when the tag differs
    pub fn as_object(&self) -> Result<&Document> {
        match self {
            Value::Object(v) => Ok(v),
            other => Err(other.mismatch("object")),
        }
    }

    /// Get as an array, failing when the tag differs
    pub fn as_array(&self) -> Result<&[Value]> {
        match self {
            Value::Array(v) => Ok(v),
            other => Err(other.mismatch("array")),
        }
    }

    fn mismatch(&self, expected: &'static str) -> FluxError {
        FluxError::TypeMismatch {
            expected,
            actual: self.type_name(),
        }
    }

    /// Render as canonical JSON; trailing zeros are trimmed from doubles
    pub fn to_json(&self) -> String {
        let mut out = String::new();
        self.write_json(&mut out);
        out
    }

    fn write_json(&self, out: &mut String) {
        match self {
            Value::Int(v) => out.push_str(&v.to_string()),
            Value::Double(v) => out.push_str(&v.to_string()),
            Value::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
            Value::String(s) => write_json_string(s, out),
            Value::Object(doc) => write_json_object(doc, out),
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_json(out);
                }
                out.push(']');
            }
        }
    }

    /// Convert a parsed `serde_json` tree into the value model
    ///
    /// Integral numbers become `Int`, everything else numeric becomes
    /// `Double`. JSON `null` has no counterpart and is rejected.
    pub fn from_json(json: &serde_json::Value) -> Result<Value> {
        match json {
            serde_json::Value::Null => {
                Err(FluxError::Protocol("null values are not supported".into()))
            }
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Double(f))
                } else {
                    Err(FluxError::Protocol(format!("number out of range: {n}")))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(items) => {
                let values = items.iter().map(Value::from_json).collect::<Result<_>>()?;
                Ok(Value::Array(values))
            }
            serde_json::Value::Object(map) => {
                let mut doc = Document::new();
                for (key, val) in map {
                    doc.insert(key.clone(), Value::from_json(val)?);
                }
                Ok(Value::Object(doc))
            }
        }
    }
}

/// Parse JSON text into a document, rejecting non-object roots
pub fn parse_document(text: &str) -> Result<Document> {
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| FluxError::Protocol(format!("invalid JSON: {e}")))?;
    match Value::from_json(&json)? {
        Value::Object(doc) => Ok(doc),
        other => Err(FluxError::Protocol(format!(
            "expected a JSON object, got {}",
            other.type_name()
        ))),
    }
}

/// Render a document as canonical JSON
pub fn document_to_json(doc: &Document) -> String {
    let mut out = String::new();
    write_json_object(doc, &mut out);
    out
}

fn write_json_object(doc: &Document, out: &mut String) {
    out.push('{');
    for (i, (key, val)) in doc.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_string(key, out);
        out.push(':');
        val.write_json(out);
    }
    out.push('}');
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::String(a), Value::String(b)) => a == b,
                (Value::Object(a), Value::Object(b)) => a == b,
                (Value::Array(a), Value::Array(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            // Int and Double hash through the same lifting as equality
            Value::Int(_) | Value::Double(_) => {
                if let Some(n) = self.as_number() {
                    n.to_bits().hash(state);
                }
            }
            Value::Bool(v) => v.hash(state),
            Value::String(s) => s.hash(state),
            Value::Object(doc) => {
                doc.len().hash(state);
                for (key, val) in doc {
                    key.hash(state);
                    val.hash(state);
                }
            }
            Value::Array(items) => {
                items.len().hash(state);
                for item in items {
                    item.hash(state);
                }
            }
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.total_cmp(&b);
        }
        self.rank().cmp(&other.rank()).then_with(|| match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Object(a), Value::Object(b)) => a.iter().cmp(b.iter()),
            (Value::Array(a), Value::Array(b)) => a.iter().cmp(b.iter()),
            // Equal ranks always carry the same variant
            _ => Ordering::Equal,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Object(v)
    }
}
