//! `{{name}}` interpolation over JSON values.
//!
//! Rendering walks the whole value tree: string leaves are substituted,
//! mappings and sequences are rebuilt with rendered children. Four token
//! forms are accepted and resolve to the same binding:
//!
//! - `{{name}}`
//! - `{{outputs.name}}`
//! - `{{$name}}`
//! - `{{$outputs.name}}`
//!
//! Tokens are matched exactly (case-sensitive, no inner whitespace). A token
//! whose name has no binding is left in the output verbatim.
//!
//! Two lookup policies exist. [`LookupPolicy::Flat`] treats the whole name as
//! a single key and is what the workflow scheduler uses. [`LookupPolicy::Nested`]
//! splits the name on `.` and walks chained mappings; the planner uses it so
//! parameters can reach into earlier step outputs.

use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum nesting depth of a value being rendered.
pub const MAX_RENDER_DEPTH: usize = 64;

/// Maximum size of a single rendered string (10 MB).
pub const MAX_RENDERED_STRING_SIZE: usize = 10 * 1024 * 1024;

static NULL: Value = Value::Null;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

// ---------------------------------------------------------------------------
// Errors and policy
// ---------------------------------------------------------------------------

/// Rendering failures. Unknown names are not errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("value nesting exceeds maximum render depth of {max}")]
    DepthExceeded { max: usize },

    #[error("rendered string of {size} bytes exceeds limit of {max} bytes")]
    OutputTooLarge { size: usize, max: usize },
}

/// How a token name is resolved against the bindings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LookupPolicy {
    /// The name is a single key; dots are part of the key.
    #[default]
    Flat,
    /// The name is a dotted path through nested mappings.
    Nested,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render a value against bindings with the flat (scheduler) policy.
pub fn render(value: &Value, bindings: &Map<String, Value>) -> Result<Value, TemplateError> {
    render_with(value, bindings, LookupPolicy::Flat)
}

/// Render every value of an input map.
pub fn render_map(
    inputs: &Map<String, Value>,
    bindings: &Map<String, Value>,
    policy: LookupPolicy,
) -> Result<Map<String, Value>, TemplateError> {
    let mut out = Map::with_capacity(inputs.len());
    for (key, value) in inputs {
        out.insert(key.clone(), render_value(value, bindings, policy, 0)?);
    }
    Ok(out)
}

/// Render a value against bindings with an explicit lookup policy.
pub fn render_with(
    value: &Value,
    bindings: &Map<String, Value>,
    policy: LookupPolicy,
) -> Result<Value, TemplateError> {
    render_value(value, bindings, policy, 0)
}

fn render_value(
    value: &Value,
    bindings: &Map<String, Value>,
    policy: LookupPolicy,
    depth: usize,
) -> Result<Value, TemplateError> {
    if depth > MAX_RENDER_DEPTH {
        return Err(TemplateError::DepthExceeded {
            max: MAX_RENDER_DEPTH,
        });
    }
    match value {
        Value::String(s) => render_str(s, bindings, policy).map(Value::String),
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, bindings, policy, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), render_value(item, bindings, policy, depth + 1)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Substitute every known token in a string.
///
/// Substituted text is not re-scanned, so a binding whose value itself
/// contains `{{...}}` is inserted literally.
pub fn render_str(
    template: &str,
    bindings: &Map<String, Value>,
    policy: LookupPolicy,
) -> Result<String, TemplateError> {
    if !template.contains(OPEN) {
        return Ok(template.to_string());
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let token_len = OPEN.len() + end + CLOSE.len();

        match token_name(&after_open[..end]) {
            Some(name) => {
                match lookup(bindings, name, policy) {
                    Some(value) => out.push_str(&value_to_string(value)),
                    None => out.push_str(&rest[start..start + token_len]),
                }
                rest = &rest[start + token_len..];
            }
            // Not a token: keep one brace and rescan, so `{{ {{a}}` and
            // `{{{a}}}` still find `{{a}}`.
            None => {
                out.push('{');
                rest = &rest[start + 1..];
            }
        }

        if out.len() > MAX_RENDERED_STRING_SIZE {
            return Err(TemplateError::OutputTooLarge {
                size: out.len(),
                max: MAX_RENDERED_STRING_SIZE,
            });
        }
    }
    out.push_str(rest);

    if out.len() > MAX_RENDERED_STRING_SIZE {
        return Err(TemplateError::OutputTooLarge {
            size: out.len(),
            max: MAX_RENDERED_STRING_SIZE,
        });
    }
    Ok(out)
}

/// Parse the text between `{{` and `}}` into a binding name.
///
/// Returns `None` for anything that is not one of the four accepted forms.
fn token_name(inner: &str) -> Option<&str> {
    let name = inner.strip_prefix('$').unwrap_or(inner);
    let name = name.strip_prefix("outputs.").unwrap_or(name);
    let valid = !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || c == '{' || c == '}' || c == '$');
    valid.then_some(name)
}

fn lookup<'a>(
    bindings: &'a Map<String, Value>,
    name: &str,
    policy: LookupPolicy,
) -> Option<&'a Value> {
    match policy {
        LookupPolicy::Flat => bindings.get(name),
        LookupPolicy::Nested => {
            let mut segments = name.split('.');
            let root = bindings.get(segments.next()?)?;
            let mut current = root;
            for segment in segments {
                match current {
                    Value::Object(map) => match map.get(segment) {
                        Some(next) => current = next,
                        None => return Some(&NULL),
                    },
                    _ => return Some(&NULL),
                }
            }
            Some(current)
        }
    }
}

/// String form of a value as inserted into templates.
///
/// Strings are inserted raw; mappings and sequences as canonical (compact,
/// key-sorted) JSON; numbers and booleans in their JSON text; null as `null`.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Reference scanning
// ---------------------------------------------------------------------------

/// Names referenced by well-formed tokens in a string, in order of appearance.
pub fn referenced_names(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        match token_name(&after_open[..end]) {
            Some(name) => {
                names.push(name.to_string());
                rest = &after_open[end + CLOSE.len()..];
            }
            None => rest = &rest[start + 1..],
        }
    }
    names
}

/// Visit every string leaf of a value in a stable order.
pub fn for_each_string<'a>(value: &'a Value, visit: &mut impl FnMut(&'a str)) {
    match value {
        Value::String(s) => visit(s),
        Value::Array(items) => items.iter().for_each(|item| for_each_string(item, visit)),
        Value::Object(map) => map.values().for_each(|item| for_each_string(item, visit)),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
