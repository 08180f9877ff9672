//! Bundling: merge external documents into the root so every `$ref` is internal.
//!
//! The root is copied and walked depth-first, visiting `definitions` and
//! `$defs` first. The first `$ref` reaching an external value becomes that
//! value's home: the value is inlined there and walked in its own document's
//! context. Every other `$ref` is rewritten to a pointer that a literal walk
//! of the output can follow without passing through another `$ref`.

use std::collections::HashMap;

use serde_json::{Map, Value};
use url::Url;

use crate::error::{CollectedError, RefError};
use crate::location;
use crate::pointer;
use crate::registry::Registry;
use crate::types::{Deadline, Options};

/// Keys walked before any other, so homes land in definition sections.
const DEFINITION_KEYS: &[&str] = &["definitions", "$defs"];

/// Bundle the root document of a populated registry.
///
/// Errors recorded under `continue_on_error` are added to the registry.
///
/// # Errors
///
/// Fails on the first pointer error unless `continue_on_error` is set, or
/// when the deadline passes.
pub(crate) fn bundle(
    registry: &mut Registry,
    options: &Options,
    deadline: Option<&Deadline>,
) -> Result<Value, RefError> {
    let (bundled, errors) = {
        let mut bundler = Bundler::new(registry, options, deadline)?;
        let bundled = bundler.run()?;
        (bundled, bundler.errors)
    };
    for (document, error) in errors {
        registry.record_error(&document, error);
    }
    Ok(bundled)
}

/// A location in some document that has been inlined into the output.
#[derive(Debug)]
struct Home {
    tokens: Vec<String>,
    path: Vec<String>,
}

struct Bundler<'r> {
    registry: &'r Registry,
    root_location: &'r Url,
    root: &'r Value,
    options: &'r Options,
    deadline: Option<&'r Deadline>,
    /// Inlined values by document key.
    homes: HashMap<String, Vec<Home>>,
    /// Paths of processed `$ref`s, in walk order.
    processed: Vec<Vec<String>>,
    errors: Vec<(Url, CollectedError)>,
}

impl<'r> Bundler<'r> {
    fn new(
        registry: &'r Registry,
        options: &'r Options,
        deadline: Option<&'r Deadline>,
    ) -> Result<Self, RefError> {
        let document = registry.root().ok_or_else(|| RefError::MissingDocument {
            location: "root document".to_string(),
        })?;
        let root = document
            .value()
            .ok_or_else(|| RefError::MissingDocument {
                location: location::display(document.location()),
            })?;
        Ok(Self {
            registry,
            root_location: document.location(),
            root,
            options,
            deadline,
            homes: HashMap::new(),
            processed: Vec::new(),
            errors: Vec::new(),
        })
    }

    fn run(&mut self) -> Result<Value, RefError> {
        let mut bundled = self.root.clone();
        let root_location = self.root_location;
        self.walk(
            &mut bundled,
            root_location,
            &mut Vec::new(),
            &mut Vec::new(),
            false,
        )?;
        self.notify(&bundled);
        Ok(bundled)
    }

    /// `scoped` is set beneath any non-root node carrying a string `$id`.
    fn walk(
        &mut self,
        value: &mut Value,
        doc: &'r Url,
        tokens: &mut Vec<String>,
        path: &mut Vec<String>,
        scoped: bool,
    ) -> Result<(), RefError> {
        Deadline::check(self.deadline)?;
        if pointer::ref_target(value).is_some() {
            return self.bundle_ref(value, doc, tokens, path, scoped);
        }

        match value {
            Value::Object(map) => {
                let scoped = scoped
                    || (!path.is_empty() && matches!(map.get("$id"), Some(Value::String(_))));
                for key in walk_order(map) {
                    let Some(child) = map.get_mut(&key) else {
                        continue;
                    };
                    tokens.push(key.clone());
                    path.push(key);
                    let result = self.walk(child, doc, tokens, path, scoped);
                    tokens.pop();
                    path.pop();
                    result?;
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter_mut().enumerate() {
                    tokens.push(i.to_string());
                    path.push(i.to_string());
                    let result = self.walk(child, doc, tokens, path, scoped);
                    tokens.pop();
                    path.pop();
                    result?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn bundle_ref(
        &mut self,
        value: &mut Value,
        doc: &'r Url,
        tokens: &mut Vec<String>,
        path: &mut Vec<String>,
        scoped: bool,
    ) -> Result<(), RefError> {
        let Some(reference) = pointer::ref_target(value).map(str::to_string) else {
            return Ok(());
        };
        let mode = self.options.dereference.external_reference_resolution;
        let here = location::with_tokens(doc, tokens);
        let base = pointer::ref_base(&here, self.root_location, &reference, mode);
        let target = match location::resolve(base, &reference) {
            Ok(target) => target,
            Err(error) => return self.recover(error, value, doc, tokens),
        };
        if !self.options.resolve.external && !self.registry.contains(&target) {
            return Ok(());
        }

        let registry = self.registry;
        let found = match pointer::resolve(registry, &target, mode, &pointer::fragment(path)) {
            Ok(Some(found)) => found,
            // The target document failed to load; its error is already recorded
            Ok(None) => {
                *value = Value::Null;
                return Ok(());
            }
            Err(error) => return self.recover(error, value, doc, tokens),
        };

        let rewritten = if found.circular {
            pointer::fragment(path)
        } else if location::same_document(found.doc, self.root_location) {
            // Local text only survives where it was written in the root itself
            let local =
                reference.starts_with('#') && location::same_document(doc, self.root_location);
            if !self.options.bundle.optimize_internal_refs && local {
                self.processed.push(path.clone());
                return Ok(());
            }
            pointer::fragment(&found.tokens)
        } else if let Some(home) = self.find_home(found.doc, &found.tokens) {
            home
        } else {
            self.homes
                .entry(location::document_key(found.doc).to_string())
                .or_default()
                .push(Home {
                    tokens: found.tokens.clone(),
                    path: path.clone(),
                });
            tracing::debug!(
                "inlining {} at {}",
                location::display(&found.location()),
                pointer::fragment(path)
            );
            self.processed.push(path.clone());

            // Siblings of the `$ref` override the target's keys
            let mut inlined = found.value.clone();
            if let (Value::Object(target), Value::Object(siblings)) = (&mut inlined, &*value) {
                for (key, sibling) in siblings.iter().filter(|(key, _)| *key != "$ref") {
                    target.insert(key.clone(), sibling.clone());
                }
            }
            *value = inlined;
            let mut target_tokens = found.tokens;
            return self.walk(value, found.doc, &mut target_tokens, path, scoped);
        };

        let rewritten = if scoped {
            format!("{}{}", self.scope_base(), rewritten)
        } else {
            rewritten
        };
        tracing::trace!("rewrote $ref {} -> {}", reference, rewritten);
        if let Value::Object(map) = value {
            map.insert("$ref".to_string(), Value::String(rewritten));
        }
        self.processed.push(path.clone());
        Ok(())
    }

    /// Pointer to an already inlined copy of the value at `tokens`, either
    /// its own home or a home above it in the same document.
    fn find_home(&self, doc: &Url, tokens: &[String]) -> Option<String> {
        let homes = self.homes.get(location::document_key(doc))?;
        let home = homes
            .iter()
            .filter(|home| tokens.starts_with(&home.tokens))
            .max_by_key(|home| home.tokens.len())?;
        let mut path = home.path.clone();
        path.extend_from_slice(&tokens[home.tokens.len()..]);
        Some(pointer::fragment(&path))
    }

    /// Absolute prefix for refs beneath a nested `$id`.
    fn scope_base(&self) -> String {
        match self.root.get("$id").and_then(Value::as_str) {
            Some(id) => id.split('#').next().unwrap_or(id).to_string(),
            None => location::document(self.root_location).to_string(),
        }
    }

    fn recover(
        &mut self,
        error: RefError,
        value: &mut Value,
        doc: &Url,
        tokens: &[String],
    ) -> Result<(), RefError> {
        if !(self.options.continue_on_error && error.is_recoverable()) {
            return Err(error);
        }
        let collected = CollectedError {
            error,
            source: location::display(doc),
            path: pointer::fragment(tokens),
        };
        self.errors.push((doc.clone(), collected));
        *value = Value::Null;
        Ok(())
    }

    /// Report processed `$ref`s to the bundle hook, in walk order.
    fn notify(&self, bundled: &Value) {
        let Some(hook) = &self.options.bundle.on_bundle else {
            return;
        };
        for path in &self.processed {
            let Some((key, parent_path)) = path.split_last() else {
                continue;
            };
            let value = bundled.pointer(&pointer::compile(path));
            let parent = bundled.pointer(&pointer::compile(parent_path));
            if let (Some(value), Some(parent)) = (value, parent) {
                hook(&pointer::fragment(path), value, parent, key);
            }
        }
    }
}

/// Object keys with definition sections first.
fn walk_order(map: &Map<String, Value>) -> Vec<String> {
    let mut keys: Vec<String> = DEFINITION_KEYS
        .iter()
        .filter(|key| map.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    keys.extend(
        map.keys()
            .filter(|key| !DEFINITION_KEYS.contains(&key.as_str()))
            .cloned(),
    );
    keys
}
