// Safe serialization of captured host values
//
// Anything the page hands us - console arguments, props, hook state, request
// bodies - may contain functions, live DOM elements, cycles, or arbitrarily
// deep structure. Conversion to LLM-consumable JSON/text runs through an
// ordered chain of converters, each attempted only if the previous one
// failed, terminating in a string coercion that cannot fail:
//
//   strict_clone -> tolerant_clone -> lossy_json -> coerce_string
//
// Tier 1 is a faithful structured clone that rejects anything it cannot
// represent exactly. Tier 2 substitutes placeholders for functions, element
// summaries for DOM nodes, and cycle markers for circular references. Tier 3
// additionally truncates collections and strings to small caps. Tier 4 is a
// one-line type-tagged summary.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::host::{DomNode, HostValue};

/// Recursion limit for the faithful tiers.
const MAX_DEPTH: usize = 16;
/// Node budget for tier 1.
const STRICT_MAX_NODES: usize = 512;
/// Node budget for tier 2.
const TOLERANT_MAX_NODES: usize = 4096;
/// Collection/string caps for tier 3.
const LOSSY_MAX_DEPTH: usize = 3;
const LOSSY_MAX_ITEMS: usize = 16;
const LOSSY_MAX_STRING: usize = 120;

/// Convert a captured value to JSON through the full fallback chain. Total:
/// always produces something.
pub fn safe_clone(value: &HostValue) -> Value {
    strict_clone(value)
        .or_else(|_| tolerant_clone(value))
        .or_else(|_| lossy_json(value))
        .unwrap_or_else(|_| Value::String(coerce_string(value)))
}

/// Convert to a display string through the chain, capped at `max_len` chars.
pub fn safe_display(value: &HostValue, max_len: usize) -> String {
    let rendered = match safe_clone(value) {
        Value::String(s) => s,
        other => other.to_string(),
    };
    truncate_chars(&rendered, max_len)
}

/// Tier 1: exact structured clone. Fails on functions, elements, binary
/// payloads, cycles, and structures past the depth/size budget.
pub fn strict_clone(value: &HostValue) -> Result<Value> {
    let mut budget = STRICT_MAX_NODES;
    strict_inner(value, 0, &mut Vec::new(), &mut budget)
}

fn strict_inner(
    value: &HostValue,
    depth: usize,
    seen: &mut Vec<usize>,
    budget: &mut usize,
) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::Serialization("max depth exceeded".into()));
    }
    if *budget == 0 {
        return Err(Error::Serialization("node budget exhausted".into()));
    }
    *budget -= 1;

    match value {
        HostValue::Undefined | HostValue::Null => Ok(Value::Null),
        HostValue::Bool(b) => Ok(Value::Bool(*b)),
        HostValue::Number(n) => Ok(number_value(*n)),
        HostValue::String(s) => Ok(Value::String(s.clone())),
        HostValue::Bytes(_) => Err(Error::Serialization("binary payload".into())),
        HostValue::Function { name } => {
            Err(Error::Serialization(format!("function {name} is not cloneable")))
        }
        HostValue::Element(_) => Err(Error::Serialization("live DOM element".into())),
        HostValue::Array(items) => {
            let id = ptr_id(value);
            if seen.contains(&id) {
                return Err(Error::Serialization("circular reference".into()));
            }
            seen.push(id);
            let items = crate::lock(items).clone();
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                out.push(strict_inner(item, depth + 1, seen, budget)?);
            }
            seen.pop();
            Ok(Value::Array(out))
        }
        HostValue::Object(map) => {
            let id = ptr_id(value);
            if seen.contains(&id) {
                return Err(Error::Serialization("circular reference".into()));
            }
            seen.push(id);
            let entries = crate::lock(map).clone();
            let mut out = serde_json::Map::with_capacity(entries.len());
            for (key, item) in &entries {
                out.insert(key.clone(), strict_inner(item, depth + 1, seen, budget)?);
            }
            seen.pop();
            Ok(Value::Object(out))
        }
    }
}

/// Tier 2: per-type handlers. Functions become placeholders, elements become
/// structural summaries, cycles become markers. Fails only when the node
/// budget runs out.
pub fn tolerant_clone(value: &HostValue) -> Result<Value> {
    let mut budget = TOLERANT_MAX_NODES;
    tolerant_inner(value, 0, &mut Vec::new(), &mut budget)
}

fn tolerant_inner(
    value: &HostValue,
    depth: usize,
    seen: &mut Vec<usize>,
    budget: &mut usize,
) -> Result<Value> {
    if *budget == 0 {
        return Err(Error::Serialization("node budget exhausted".into()));
    }
    *budget -= 1;
    if depth > MAX_DEPTH {
        return Ok(Value::String("[MaxDepth]".into()));
    }

    match value {
        HostValue::Undefined | HostValue::Null => Ok(Value::Null),
        HostValue::Bool(b) => Ok(Value::Bool(*b)),
        HostValue::Number(n) => Ok(number_value(*n)),
        HostValue::String(s) => Ok(Value::String(s.clone())),
        HostValue::Bytes(bytes) => Ok(json!({ "binary_bytes": bytes.len() })),
        HostValue::Function { name } => {
            let name = if name.is_empty() { "anonymous" } else { name };
            Ok(Value::String(format!("[Function: {name}]")))
        }
        HostValue::Element(element) => Ok(element_summary(element.as_ref())),
        HostValue::Array(items) => {
            let id = ptr_id(value);
            if seen.contains(&id) {
                return Ok(Value::String("[Circular]".into()));
            }
            seen.push(id);
            let items = crate::lock(items).clone();
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                out.push(tolerant_inner(item, depth + 1, seen, budget)?);
            }
            seen.pop();
            Ok(Value::Array(out))
        }
        HostValue::Object(map) => {
            let id = ptr_id(value);
            if seen.contains(&id) {
                return Ok(Value::String("[Circular]".into()));
            }
            seen.push(id);
            let entries = crate::lock(map).clone();
            let mut out = serde_json::Map::with_capacity(entries.len());
            for (key, item) in &entries {
                out.insert(key.clone(), tolerant_inner(item, depth + 1, seen, budget)?);
            }
            seen.pop();
            Ok(Value::Object(out))
        }
    }
}

/// Tier 3: aggressively truncated JSON. Small depth, few items, short
/// strings; everything unrepresentable becomes its coercion string.
pub fn lossy_json(value: &HostValue) -> Result<Value> {
    Ok(lossy_inner(value, 0, &mut Vec::new()))
}

fn lossy_inner(value: &HostValue, depth: usize, seen: &mut Vec<usize>) -> Value {
    if depth > LOSSY_MAX_DEPTH {
        return Value::String("…".into());
    }
    match value {
        HostValue::String(s) => Value::String(truncate_chars(s, LOSSY_MAX_STRING)),
        HostValue::Array(items) => {
            let id = ptr_id(value);
            if seen.contains(&id) {
                return Value::String("[Circular]".into());
            }
            seen.push(id);
            let items = crate::lock(items).clone();
            let truncated = items.len() > LOSSY_MAX_ITEMS;
            let mut out: Vec<Value> = items
                .iter()
                .take(LOSSY_MAX_ITEMS)
                .map(|item| lossy_inner(item, depth + 1, seen))
                .collect();
            if truncated {
                out.push(Value::String(format!("… {} more", items.len() - LOSSY_MAX_ITEMS)));
            }
            seen.pop();
            Value::Array(out)
        }
        HostValue::Object(map) => {
            let id = ptr_id(value);
            if seen.contains(&id) {
                return Value::String("[Circular]".into());
            }
            seen.push(id);
            let entries = crate::lock(map).clone();
            let truncated = entries.len() > LOSSY_MAX_ITEMS;
            let mut out = serde_json::Map::new();
            for (key, item) in entries.iter().take(LOSSY_MAX_ITEMS) {
                out.insert(key.clone(), lossy_inner(item, depth + 1, seen));
            }
            if truncated {
                out.insert("…".into(), Value::String(format!("{} more keys", entries.len() - LOSSY_MAX_ITEMS)));
            }
            seen.pop();
            Value::Object(out)
        }
        other => match tolerant_inner(other, MAX_DEPTH, seen, &mut 2) {
            Ok(v) => v,
            Err(_) => Value::String(coerce_string(other)),
        },
    }
}

/// Tier 4: infallible string coercion. One line, type-tagged, no recursion
/// into anything that could fail.
pub fn coerce_string(value: &HostValue) -> String {
    match value {
        HostValue::Undefined => "undefined".to_string(),
        HostValue::Null => "null".to_string(),
        HostValue::Bool(b) => b.to_string(),
        HostValue::Number(n) => format_number(*n),
        HostValue::String(s) => s.clone(),
        HostValue::Bytes(bytes) => format!("[binary {} bytes]", bytes.len()),
        HostValue::Array(items) => format!("[array({})]", crate::lock(items).len()),
        HostValue::Object(_) => "[object Object]".to_string(),
        HostValue::Function { name } => {
            let name = if name.is_empty() { "anonymous" } else { name };
            format!("[function {name}]")
        }
        HostValue::Element(element) => {
            let tag = element.tag_name();
            match element.attribute("id") {
                Some(id) => format!("<{tag}#{id}>"),
                None => format!("<{tag}>"),
            }
        }
    }
}

/// Structural summary of a DOM element: tag, id, classes, child count.
/// Never the live node.
fn element_summary(element: &dyn DomNode) -> Value {
    json!({
        "element": element.tag_name(),
        "id": element.attribute("id"),
        "classes": element.classes(),
        "child_count": element.children().len(),
    })
}

fn ptr_id(value: &HostValue) -> usize {
    value.container_id().unwrap_or(0)
}

fn number_value(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        // NaN/Infinity have no JSON representation; stringify like JSON.stringify's
        // neighbors do.
        .unwrap_or_else(|| Value::String(format_number(n)))
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when
/// anything was cut. Always respects UTF-8 boundaries.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
