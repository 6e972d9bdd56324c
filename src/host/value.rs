//! Dynamic values captured from the host runtime.
//!
//! Props, state, hook slots, and console arguments arrive as live JavaScript
//! values in the real embedding. `HostValue` models that shape: shared,
//! mutable containers (which can be circular), functions, raw bytes, and
//! references to DOM elements. Snapshots taken by the monitors and the bridge
//! hold these by handle and never mutate them; turning them into safe text is
//! the serializer's job (`crate::serialize`).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::DomHandle;

/// Shared object storage. `Arc` identity doubles as the cycle-detection key.
pub type ObjectHandle = Arc<Mutex<BTreeMap<String, HostValue>>>;

/// Shared array storage.
pub type ArrayHandle = Arc<Mutex<Vec<HostValue>>>;

/// A value observed inside the host page.
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Binary payloads (request/response bodies, typed arrays).
    Bytes(Bytes),
    /// Shared array; cloning the value aliases the same storage.
    Array(ArrayHandle),
    /// Shared object; aliasing makes circular structures expressible.
    Object(ObjectHandle),
    /// A function reference. Only the name survives capture.
    Function { name: String },
    /// A live DOM element. Never serialized directly; summarized instead.
    Element(DomHandle),
}

impl HostValue {
    pub fn string(s: impl Into<String>) -> Self {
        HostValue::String(s.into())
    }

    pub fn number(n: impl Into<f64>) -> Self {
        HostValue::Number(n.into())
    }

    pub fn function(name: impl Into<String>) -> Self {
        HostValue::Function { name: name.into() }
    }

    /// Build a shared object from key/value pairs.
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, HostValue)>,
        K: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect::<BTreeMap<_, _>>();
        HostValue::Object(Arc::new(Mutex::new(map)))
    }

    /// Build a shared array.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = HostValue>,
    {
        HostValue::Array(Arc::new(Mutex::new(items.into_iter().collect())))
    }

    /// Insert into an object value. No-op for non-objects.
    pub fn insert(&self, key: impl Into<String>, value: HostValue) {
        if let HostValue::Object(map) = self {
            crate::lock(map).insert(key.into(), value);
        }
    }

    /// Convert a plain JSON value into a host value. The result contains no
    /// functions, elements, or cycles.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => HostValue::Null,
            serde_json::Value::Bool(b) => HostValue::Bool(*b),
            serde_json::Value::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => HostValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                HostValue::array(items.iter().map(HostValue::from_json))
            }
            serde_json::Value::Object(map) => {
                HostValue::object(map.iter().map(|(k, v)| (k.clone(), HostValue::from_json(v))))
            }
        }
    }

    /// JS-style type tag, used by the coercion fallback and in log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Bytes(_) => "binary",
            HostValue::Array(_) => "array",
            HostValue::Object(_) => "object",
            HostValue::Function { .. } => "function",
            HostValue::Element(_) => "element",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Raw pointer identity of a shared container, for cycle detection.
    pub(crate) fn container_id(&self) -> Option<usize> {
        match self {
            HostValue::Array(a) => Some(Arc::as_ptr(a) as usize),
            HostValue::Object(o) => Some(Arc::as_ptr(o) as usize),
            _ => None,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => write!(f, "undefined"),
            HostValue::Null => write!(f, "null"),
            HostValue::Bool(b) => write!(f, "{b}"),
            HostValue::Number(n) => write!(f, "{n}"),
            HostValue::String(s) => write!(f, "{s:?}"),
            HostValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            HostValue::Array(items) => write!(f, "<array len={}>", crate::lock(items).len()),
            HostValue::Object(map) => write!(f, "<object keys={}>", crate::lock(map).len()),
            HostValue::Function { name } => write!(f, "<function {name}>"),
            HostValue::Element(el) => write!(f, "<element {}>", el.tag_name()),
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_aliasing_allows_cycles() {
        let outer = HostValue::object([("name", HostValue::string("root"))]);
        // Self-reference: outer.self = outer
        outer.insert("self", outer.clone());

        if let HostValue::Object(map) = &outer {
            let guard = crate::lock(map);
            let inner = guard.get("self").expect("self entry");
            assert_eq!(inner.container_id(), outer.container_id());
        } else {
            panic!("expected object");
        }
    }

    #[test]
    fn test_from_json_round_shape() {
        let json = serde_json::json!({"a": 1, "b": [true, null], "c": "x"});
        let value = HostValue::from_json(&json);
        assert_eq!(value.type_name(), "object");
        if let HostValue::Object(map) = &value {
            let guard = crate::lock(map);
            assert_eq!(guard.len(), 3);
            assert_eq!(guard.get("b").map(|v| v.type_name()), Some("array"));
        }
    }

    #[test]
    fn test_type_names() {
        assert_eq!(HostValue::Undefined.type_name(), "undefined");
        assert_eq!(HostValue::function("f").type_name(), "function");
        assert_eq!(HostValue::Bytes(Bytes::from_static(b"ab")).type_name(), "binary");
    }
}
