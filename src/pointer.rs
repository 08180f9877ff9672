//! JSON Pointer handling and `$ref` target resolution.
//!
//! Only the parts of RFC 6901 that `$ref` resolution needs: parsing and
//! compiling pointers, and walking them through registered documents while
//! following any `$ref` met on the way.

use std::collections::HashSet;

use serde_json::Value;
use url::Url;

use crate::error::RefError;
use crate::location;
use crate::registry::Registry;
use crate::types::ExternalResolution;

/// Split a JSON Pointer into unescaped tokens.
///
/// Accepts `""`, `"#"`, `"/a/b"` and `"#/a/b"`.
pub fn parse(pointer: &str) -> Result<Vec<String>, RefError> {
    let path = pointer.strip_prefix('#').unwrap_or(pointer);
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(RefError::InvalidPointer {
            pointer: pointer.to_string(),
            path: String::new(),
        });
    };
    Ok(rest.split('/').map(unescape).collect())
}

/// Join tokens into a pointer (`/a/b`), escaping `~` and `/`.
pub fn compile(tokens: &[String]) -> String {
    tokens.iter().fold(String::new(), |mut out, token| {
        out.push('/');
        out.push_str(&escape(token));
        out
    })
}

/// Pointer in fragment form (`#/a/b`), used for JSON paths from the root.
pub fn fragment(tokens: &[String]) -> String {
    format!("#{}", compile(tokens))
}

/// Escape a single token (`~` → `~0`, `/` → `~1`).
pub fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Unescape a single token (`~1` → `/`, `~0` → `~`).
pub fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// The string target of a `$ref` node: an object with a non-empty string `$ref`.
pub fn ref_target(value: &Value) -> Option<&str> {
    match value.get("$ref") {
        Some(Value::String(reference)) if !reference.is_empty() => Some(reference),
        _ => None,
    }
}

/// Whether a `$ref` string points outside the document containing it.
pub fn is_external(reference: &str) -> bool {
    !reference.starts_with('#')
}

/// Base location for resolving `reference` written at `here`.
pub(crate) fn ref_base<'a>(
    here: &'a Url,
    root: &'a Url,
    reference: &str,
    mode: ExternalResolution,
) -> &'a Url {
    if mode == ExternalResolution::Root && is_external(reference) {
        root
    } else {
        here
    }
}

/// A resolved `$ref` target: the literal location reached and its value.
#[derive(Debug)]
pub(crate) struct Target<'r> {
    /// Document holding the value, as registered.
    pub doc: &'r Url,
    /// Literal path to the value; walking it meets no `$ref` node.
    pub tokens: Vec<String>,
    pub value: &'r Value,
    /// The resolution chain returned to a location it already visited.
    pub circular: bool,
}

impl Target<'_> {
    pub fn location(&self) -> Url {
        location::with_tokens(self.doc, &self.tokens)
    }
}

/// Resolve an absolute location against registered documents.
///
/// Every `$ref` met along the pointer (and at its end) is followed, so the
/// returned target is a literal location. A chain that comes back to a
/// location it already passed through is reported as circular, with the
/// `$ref` node where the loop closed as its value.
///
/// Returns `Ok(None)` when the document is registered but has no value,
/// which happens after its fetch failed under `continue_on_error`.
pub(crate) fn resolve<'r>(
    registry: &'r Registry,
    target: &Url,
    mode: ExternalResolution,
    path: &str,
) -> Result<Option<Target<'r>>, RefError> {
    let mut visited = HashSet::new();
    resolve_inner(registry, target, mode, path, &mut visited)
}

fn resolve_inner<'r>(
    registry: &'r Registry,
    target: &Url,
    mode: ExternalResolution,
    path: &str,
    visited: &mut HashSet<String>,
) -> Result<Option<Target<'r>>, RefError> {
    visited.insert(target.to_string());
    let tokens = location::tokens(target).map_err(|e| match e {
        RefError::InvalidPointer { pointer, .. } => RefError::InvalidPointer {
            pointer,
            path: path.to_string(),
        },
        other => other,
    })?;
    let document = registry
        .document(target)
        .ok_or_else(|| RefError::MissingDocument {
            location: location::display(&location::document(target)),
        })?;
    let Some(mut value) = document.value() else {
        return Ok(None);
    };
    let root = registry
        .root_location()
        .unwrap_or_else(|| document.location());

    let mut doc = document.location();
    let mut walked: Vec<String> = Vec::with_capacity(tokens.len());
    for i in 0..=tokens.len() {
        if let Some(reference) = ref_target(value) {
            let here = location::with_tokens(doc, &walked);
            let next = location::resolve(ref_base(&here, root, reference, mode), reference)?;
            if visited.contains(next.as_str()) {
                return Ok(Some(Target {
                    doc,
                    tokens: walked,
                    value,
                    circular: true,
                }));
            }
            match resolve_inner(registry, &next, mode, path, visited)? {
                None => return Ok(None),
                Some(hop) if hop.circular => return Ok(Some(hop)),
                Some(hop) => {
                    doc = hop.doc;
                    walked = hop.tokens;
                    value = hop.value;
                }
            }
        }

        let Some(token) = tokens.get(i) else {
            break;
        };
        value = step(value, token).ok_or_else(|| RefError::MissingPointer {
            token: token.clone(),
            reference: location::display(target),
            found: location::display(&location::with_tokens(doc, &walked)),
            path: path.to_string(),
        })?;
        walked.push(token.clone());
    }

    Ok(Some(Target {
        doc,
        tokens: walked,
        value,
        circular: false,
    }))
}

/// Walk one token into an object or array.
pub(crate) fn step<'v>(value: &'v Value, token: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(token),
        Value::Array(items) => token.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    }
}
