//! Dereferencing: replace every `$ref` with the node it points at.
//!
//! Every resolved document is imported into one [`Graph`]. Walking the root,
//! each `$ref` child is swapped for the handle of its (already dereferenced)
//! target, so repeated targets are shared and circular references become
//! handle cycles instead of infinite trees.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use url::Url;

use crate::error::{CollectedError, RefError};
use crate::graph::{Graph, Node, NodeId, NodeRef};
use crate::location;
use crate::pointer;
use crate::registry::Registry;
use crate::types::{Circular, Deadline, Options};

/// Result of dereferencing: the output graph and the registry it came from.
#[derive(Debug, Clone)]
pub struct Dereferenced {
    graph: Graph,
    root: NodeId,
    registry: Registry,
}

impl Dereferenced {
    /// The dereferenced root document.
    pub fn root(&self) -> NodeRef<'_> {
        self.graph.view(self.root)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Whether any circular reference was found.
    pub fn is_circular(&self) -> bool {
        self.registry.is_circular()
    }

    /// Materialize the root as a tree; cycles are written as `$ref`s to the
    /// path where the repeated node first appears.
    ///
    /// Shared nodes are copied in full wherever they are referenced, so a
    /// schema whose definitions reference each other in layers can grow
    /// exponentially here. Walk [`root`](Self::root) instead to visit each
    /// node once.
    pub fn to_value(&self) -> Value {
        self.graph.to_value(self.root)
    }
}

/// Dereference the root document of a populated registry.
///
/// # Errors
///
/// Fails on the first pointer error unless `continue_on_error` is set, on a
/// circular reference under [`Circular::Forbid`], when nesting exceeds
/// `max_depth`, or when the deadline passes.
pub(crate) fn dereference(
    mut registry: Registry,
    options: &Options,
    deadline: Option<&Deadline>,
) -> Result<Dereferenced, RefError> {
    let (graph, root, circular, errors) = {
        let mut dereferencer = Dereferencer::new(&registry, options, deadline)?;
        let root = dereferencer.run()?;
        (
            dereferencer.graph,
            root,
            dereferencer.circular,
            dereferencer.errors,
        )
    };

    if circular {
        registry.mark_circular();
    }
    for (document, error) in errors {
        registry.record_error(&document, error);
    }
    Ok(Dereferenced {
        graph,
        root,
        registry,
    })
}

/// A `$ref` target resolved to a literal location.
#[derive(Debug, Clone)]
struct Resolved<'r> {
    doc: &'r Url,
    tokens: Vec<String>,
    /// The ref chain looped without reaching a value.
    circular: bool,
}

struct Dereferencer<'r> {
    registry: &'r Registry,
    root_location: &'r Url,
    options: &'r Options,
    deadline: Option<&'r Deadline>,
    graph: Graph,
    /// Root node of every document with a value, by document key.
    roots: HashMap<String, NodeId>,
    /// Containers on the current path.
    ancestors: HashSet<NodeId>,
    /// Containers already walked.
    processed: HashSet<NodeId>,
    /// Resolution of each absolute target seen so far.
    cache: HashMap<String, Option<Resolved<'r>>>,
    circular: bool,
    depth: usize,
    errors: Vec<(Url, CollectedError)>,
}

impl<'r> Dereferencer<'r> {
    fn new(
        registry: &'r Registry,
        options: &'r Options,
        deadline: Option<&'r Deadline>,
    ) -> Result<Self, RefError> {
        let root_location = registry
            .root_location()
            .ok_or_else(|| RefError::MissingDocument {
                location: "root document".to_string(),
            })?;

        let mut graph = Graph::new();
        let roots = registry
            .documents()
            .filter_map(|doc| {
                doc.value().map(|value| {
                    (
                        location::document_key(doc.location()).to_string(),
                        graph.import(value),
                    )
                })
            })
            .collect();

        Ok(Self {
            registry,
            root_location,
            options,
            deadline,
            graph,
            roots,
            ancestors: HashSet::new(),
            processed: HashSet::new(),
            cache: HashMap::new(),
            circular: false,
            depth: 0,
            errors: Vec::new(),
        })
    }

    fn run(&mut self) -> Result<NodeId, RefError> {
        let root_doc = self.root_location;
        let root = self
            .roots
            .get(location::document_key(root_doc))
            .copied()
            .ok_or_else(|| RefError::MissingDocument {
                location: location::display(root_doc),
            })?;
        self.visit(root, root_doc, &mut Vec::new(), &mut Vec::new())
    }

    /// Dereference one node, returning the node that should stand in its place.
    fn visit(
        &mut self,
        id: NodeId,
        doc: &'r Url,
        tokens: &mut Vec<String>,
        path: &mut Vec<String>,
    ) -> Result<NodeId, RefError> {
        if self.excluded(path) {
            return Ok(id);
        }
        if self.graph.ref_target(id).is_some() {
            return self.dereference_ref(id, doc, tokens, path);
        }
        self.crawl(id, doc, tokens, path)?;
        Ok(id)
    }

    fn excluded(&self, path: &[String]) -> bool {
        match &self.options.dereference.excluded_path_matcher {
            Some(matcher) => matcher(&pointer::fragment(path)),
            None => false,
        }
    }

    /// Walk the children of a container, replacing `$ref` children.
    fn crawl(
        &mut self,
        id: NodeId,
        doc: &'r Url,
        tokens: &mut Vec<String>,
        path: &mut Vec<String>,
    ) -> Result<(), RefError> {
        Deadline::check(self.deadline)?;
        if !self.graph.node(id).is_container() || self.processed.contains(&id) {
            return Ok(());
        }

        self.depth += 1;
        if self.depth > self.options.dereference.max_depth {
            return Err(RefError::MaxDepth {
                max_depth: self.options.dereference.max_depth,
                path: pointer::fragment(path),
            });
        }
        self.ancestors.insert(id);
        self.processed.insert(id);

        let result = self.crawl_children(id, doc, tokens, path);

        self.ancestors.remove(&id);
        self.depth -= 1;
        result
    }

    fn crawl_children(
        &mut self,
        id: NodeId,
        doc: &'r Url,
        tokens: &mut Vec<String>,
        path: &mut Vec<String>,
    ) -> Result<(), RefError> {
        for (key, child) in self.graph.children(id) {
            tokens.push(key.clone());
            path.push(key.clone());
            let replacement = self.visit(child, doc, tokens, path);
            tokens.pop();
            path.pop();

            let replacement = replacement?;
            if replacement != child {
                self.graph.set_child(id, &key, replacement);
            }
        }
        Ok(())
    }

    fn dereference_ref(
        &mut self,
        ref_id: NodeId,
        doc: &'r Url,
        tokens: &mut Vec<String>,
        path: &mut Vec<String>,
    ) -> Result<NodeId, RefError> {
        let Some(reference) = self.graph.ref_target(ref_id).map(str::to_string) else {
            return Ok(ref_id);
        };

        let here = location::with_tokens(doc, tokens);
        let base = pointer::ref_base(
            &here,
            self.root_location,
            &reference,
            self.options.dereference.external_reference_resolution,
        );
        let target = match location::resolve(base, &reference) {
            Ok(target) => target,
            Err(error) => return self.recover(error, doc, tokens),
        };
        if !self.options.resolve.external && !self.registry.contains(&target) {
            return Ok(ref_id);
        }

        let resolved = match self.resolve(&target, path) {
            Ok(Some(resolved)) => resolved,
            // The target document failed to load; its error is already recorded
            Ok(None) => return Ok(self.null()),
            Err(error) => return self.recover(error, doc, tokens),
        };
        let Some(node) = self
            .roots
            .get(location::document_key(resolved.doc))
            .and_then(|&root| self.graph.walk(root, &resolved.tokens))
        else {
            let error = RefError::MissingDocument {
                location: location::display(&location::document(&target)),
            };
            return self.recover(error, doc, tokens);
        };

        if resolved.circular || self.ancestors.contains(&node) {
            self.found_circular(&here)?;
            return Ok(match self.options.dereference.circular {
                Circular::Allow if node == ref_id => {
                    // Self reference: point it at its own place in the output
                    self.graph.set_ref_target(ref_id, pointer::fragment(path));
                    ref_id
                }
                Circular::Allow if !resolved.circular => node,
                _ => ref_id,
            });
        }

        let mut target_tokens = resolved.tokens.clone();
        self.crawl(node, resolved.doc, &mut target_tokens, path)?;

        let siblings = self.siblings(ref_id);
        let mut substitute = if siblings.is_empty() {
            node
        } else {
            let mut entries = Vec::with_capacity(siblings.len());
            for (key, child) in siblings {
                tokens.push(key.clone());
                path.push(key.clone());
                let value = self.visit(child, doc, tokens, path);
                tokens.pop();
                path.pop();
                entries.push((key, value?));
            }
            self.graph.overlay(node, entries)
        };
        if self.options.dereference.clone_references {
            substitute = self.graph.deep_clone(substitute);
        }

        tracing::trace!(
            "dereferenced {} -> {}",
            pointer::fragment(path),
            location::display(&location::with_tokens(resolved.doc, &resolved.tokens))
        );
        if let Some(hook) = &self.options.dereference.on_dereference {
            hook(&pointer::fragment(path), self.graph.view(substitute));
        }
        Ok(substitute)
    }

    /// Resolve an absolute target, reusing earlier resolutions.
    fn resolve(
        &mut self,
        target: &Url,
        path: &[String],
    ) -> Result<Option<Resolved<'r>>, RefError> {
        if let Some(cached) = self.cache.get(target.as_str()) {
            return Ok(cached.clone());
        }
        let registry = self.registry;
        let resolved = pointer::resolve(
            registry,
            target,
            self.options.dereference.external_reference_resolution,
            &pointer::fragment(path),
        )?
        .map(|found| Resolved {
            doc: found.doc,
            tokens: found.tokens,
            circular: found.circular,
        });
        self.cache.insert(target.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Sibling entries of a `$ref` node that get merged onto its target.
    fn siblings(&self, ref_id: NodeId) -> Vec<(String, NodeId)> {
        let preserved = &self.options.dereference.preserved_properties;
        self.graph
            .ref_siblings(ref_id)
            .into_iter()
            .filter(|(key, _)| preserved.is_empty() || preserved.contains(key))
            .collect()
    }

    fn found_circular(&mut self, here: &Url) -> Result<(), RefError> {
        self.circular = true;
        let location = location::display(here);
        tracing::debug!("circular $ref at {}", location);
        if let Some(hook) = &self.options.dereference.on_circular {
            hook(&location);
        }
        if self.options.dereference.circular == Circular::Forbid {
            return Err(RefError::Circular { path: location });
        }
        Ok(())
    }

    /// Record a recoverable error and substitute `null`, or fail.
    fn recover(
        &mut self,
        error: RefError,
        doc: &Url,
        tokens: &[String],
    ) -> Result<NodeId, RefError> {
        if !(self.options.continue_on_error && error.is_recoverable()) {
            return Err(error);
        }
        let collected = CollectedError {
            error,
            source: location::display(doc),
            path: pointer::fragment(tokens),
        };
        self.errors.push((doc.clone(), collected));
        Ok(self.null())
    }

    fn null(&mut self) -> NodeId {
        self.graph.push(Node::Null)
    }
}
