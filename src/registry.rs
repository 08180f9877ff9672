//! Location registry: every document reached while resolving, keyed by location.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{CollectedError, RefError};
use crate::location;
use crate::pointer;
use crate::types::{json_type_name, ExternalResolution};

/// Kind of location a document was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    File,
    Http,
    Other,
}

impl PathType {
    /// Classify a location by its scheme.
    pub fn of(url: &Url) -> Self {
        match url.scheme() {
            "file" => PathType::File,
            "http" | "https" => PathType::Http,
            _ => PathType::Other,
        }
    }
}

/// A registered document.
///
/// The value is `None` while the document is a placeholder awaiting its
/// fetch, and stays `None` if that fetch failed under `continue_on_error`.
#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    location: Url,
    value: Option<Value>,
    path_type: PathType,
    errors: Vec<CollectedError>,
}

impl ResolvedDocument {
    fn new(location: Url) -> Self {
        let path_type = PathType::of(&location);
        Self {
            location,
            value: None,
            path_type,
            errors: Vec::new(),
        }
    }

    /// Document location, without fragment.
    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn path_type(&self) -> PathType {
        self.path_type
    }

    /// Errors recorded against this document under `continue_on_error`.
    pub fn errors(&self) -> &[CollectedError] {
        &self.errors
    }

    pub(crate) fn set_value(&mut self, value: Value) {
        self.value = Some(value);
    }

    pub(crate) fn record_error(&mut self, error: CollectedError) {
        self.errors.push(error);
    }
}

/// Map of absolute document locations to resolved documents.
///
/// The first document added is the root. Relative paths given to
/// [`get`](Registry::get), [`set`](Registry::set) and
/// [`exists`](Registry::exists) are always resolved against the root.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    documents: Vec<ResolvedDocument>,
    index: HashMap<String, usize>,
    circular: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a placeholder for a location, or return the existing entry.
    ///
    /// The fragment of `location` is ignored.
    pub fn add(&mut self, location: &Url) -> &mut ResolvedDocument {
        let key = location::document_key(location).to_string();
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                self.documents
                    .push(ResolvedDocument::new(location::document(location)));
                self.index.insert(key, self.documents.len() - 1);
                self.documents.len() - 1
            }
        };
        &mut self.documents[idx]
    }

    /// Whether a document is registered for this location (fragment ignored).
    pub fn contains(&self, location: &Url) -> bool {
        self.index.contains_key(location::document_key(location))
    }

    pub fn document(&self, location: &Url) -> Option<&ResolvedDocument> {
        self.index
            .get(location::document_key(location))
            .map(|&idx| &self.documents[idx])
    }

    pub(crate) fn document_mut(&mut self, location: &Url) -> Option<&mut ResolvedDocument> {
        self.index
            .get(location::document_key(location))
            .map(|&idx| &mut self.documents[idx])
    }

    pub fn root(&self) -> Option<&ResolvedDocument> {
        self.documents.first()
    }

    pub fn root_location(&self) -> Option<&Url> {
        self.root().map(ResolvedDocument::location)
    }

    /// Iterate documents in registration order.
    pub fn documents(&self) -> impl Iterator<Item = &ResolvedDocument> {
        self.documents.iter()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Whether a circular reference was seen while dereferencing.
    pub fn is_circular(&self) -> bool {
        self.circular
    }

    pub(crate) fn mark_circular(&mut self) {
        self.circular = true;
    }

    /// Every error recorded under `continue_on_error`, in registration order.
    pub fn errors(&self) -> Vec<CollectedError> {
        self.documents
            .iter()
            .flat_map(|doc| doc.errors.iter().cloned())
            .collect()
    }

    /// Record an error against a document, falling back to the root.
    pub(crate) fn record_error(&mut self, location: &Url, error: CollectedError) {
        tracing::warn!("{}", error);
        let idx = self
            .index
            .get(location::document_key(location))
            .copied()
            .unwrap_or(0);
        if let Some(doc) = self.documents.get_mut(idx) {
            doc.record_error(error);
        }
    }

    /// Resolve a path relative to the root document.
    fn locate(&self, path: &str) -> Result<Url, RefError> {
        let root = self
            .root_location()
            .ok_or_else(|| RefError::MissingDocument {
                location: path.to_string(),
            })?;
        location::resolve(root, path)
    }

    /// Value at a path such as `#/definitions/a` or `other.yaml#/b`.
    ///
    /// `$ref`s met along the way are followed.
    pub fn get(&self, path: &str) -> Result<&Value, RefError> {
        let target = self.locate(path)?;
        match pointer::resolve(self, &target, ExternalResolution::Relative, path)? {
            Some(found) => Ok(found.value),
            None => Err(RefError::MissingDocument {
                location: location::display(&location::document(&target)),
            }),
        }
    }

    /// Whether [`get`](Registry::get) would succeed.
    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    /// Write a value at a path, creating missing intermediate objects.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), RefError> {
        let target = self.locate(path)?;
        let tokens = location::tokens(&target)?;
        let document = self
            .document_mut(&target)
            .ok_or_else(|| RefError::MissingDocument {
                location: location::display(&location::document(&target)),
            })?;

        let Some((last, parents)) = tokens.split_last() else {
            document.value = Some(value);
            return Ok(());
        };
        let mut current = document
            .value
            .get_or_insert_with(|| Value::Object(Map::new()));
        for (depth, token) in parents.iter().enumerate() {
            let kind = json_type_name(current);
            current = child_or_insert(current, token)
                .ok_or_else(|| invalid_step(path, &tokens[..depth], kind))?;
        }
        let kind = json_type_name(current);
        match current {
            Value::Object(map) => {
                map.insert(last.clone(), value);
                Ok(())
            }
            Value::Array(items) => match array_index(last, items.len()) {
                Some(idx) if idx == items.len() => {
                    items.push(value);
                    Ok(())
                }
                Some(idx) => {
                    items[idx] = value;
                    Ok(())
                }
                None => Err(invalid_step(path, parents, kind)),
            },
            _ => Err(invalid_step(path, parents, kind)),
        }
    }

    /// Locations of registered documents, optionally filtered by type.
    ///
    /// `file:` locations are returned as OS paths.
    pub fn paths(&self, types: &[PathType]) -> Vec<String> {
        self.filtered(types)
            .into_iter()
            .map(|doc| location::display(&doc.location))
            .collect()
    }

    /// Locations and values of resolved documents, optionally filtered by type.
    pub fn values(&self, types: &[PathType]) -> Vec<(String, &Value)> {
        self.filtered(types)
            .into_iter()
            .filter_map(|doc| {
                doc.value
                    .as_ref()
                    .map(|value| (location::display(&doc.location), value))
            })
            .collect()
    }

    fn filtered(&self, types: &[PathType]) -> Vec<&ResolvedDocument> {
        self.documents
            .iter()
            .filter(|doc| types.is_empty() || types.contains(&doc.path_type))
            .collect()
    }
}

/// Step into `token`, creating an empty object when the key is missing.
fn child_or_insert<'v>(value: &'v mut Value, token: &str) -> Option<&'v mut Value> {
    match value {
        Value::Object(map) => Some(
            map.entry(token.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
        ),
        Value::Array(items) => {
            let idx = array_index(token, items.len())?;
            if idx == items.len() {
                items.push(Value::Object(Map::new()));
            }
            items.get_mut(idx)
        }
        _ => None,
    }
}

/// Array index for a token; `-` and `len` both mean "append".
fn array_index(token: &str, len: usize) -> Option<usize> {
    if token == "-" {
        return Some(len);
    }
    token.parse::<usize>().ok().filter(|&idx| idx <= len)
}

fn invalid_step(path: &str, parents: &[String], kind: &str) -> RefError {
    RefError::InvalidPointer {
        pointer: path.to_string(),
        path: format!("{} ({})", pointer::fragment(parents), kind),
    }
}
