//! Options and shared types for reference resolution.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RefError;
use crate::graph::NodeRef;

/// Default bound on nested object/array/`$ref` depth while dereferencing.
pub const DEFAULT_MAX_DEPTH: usize = 500;

/// Called with the absolute location of every circular `$ref` occurrence.
pub type CircularHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Called with the JSON path and the substituted node after each dereference.
pub type DereferenceHook = Arc<dyn Fn(&str, NodeRef<'_>) + Send + Sync>;

/// Returns true for JSON paths (`#/a/b`) whose subtree must be left untouched.
pub type PathMatcher = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Called with the JSON path, the `$ref` node, its parent and the key under the parent.
pub type BundleHook = Arc<dyn Fn(&str, &Value, &Value, &str) + Send + Sync>;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// How circular references are handled while dereferencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Circular {
    /// Splice in the in-progress target, producing a cyclic graph.
    #[default]
    Allow,
    /// Fail with [`RefError::Circular`].
    Forbid,
    /// Leave circular `$ref` nodes as they are.
    Ignore,
}

impl FromStr for Circular {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "true" | "allow" => Ok(Circular::Allow),
            "false" | "forbid" => Ok(Circular::Forbid),
            "ignore" => Ok(Circular::Ignore),
            other => Err(format!(
                "unknown circular mode \"{}\": expected true, false, or ignore",
                other
            )),
        }
    }
}

/// Which location relative external `$ref`s are resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalResolution {
    /// The document containing the `$ref`.
    #[default]
    Relative,
    /// The root document, for schemas authored as if every file sat next to it.
    Root,
}

impl FromStr for ExternalResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relative" => Ok(ExternalResolution::Relative),
            "root" => Ok(ExternalResolution::Root),
            other => Err(format!(
                "unknown external reference resolution \"{}\": expected relative or root",
                other
            )),
        }
    }
}

/// Options for crawling external references.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Fetch documents referenced by external `$ref`s.
    pub external: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self { external: true }
    }
}

/// Options for dereferencing.
#[derive(Clone)]
pub struct DereferenceOptions {
    pub circular: Circular,
    pub on_circular: Option<CircularHook>,
    pub on_dereference: Option<DereferenceHook>,
    pub excluded_path_matcher: Option<PathMatcher>,
    pub external_reference_resolution: ExternalResolution,
    /// Sibling keys of a `$ref` to merge onto its target. Empty merges all siblings.
    pub preserved_properties: Vec<String>,
    /// Deep-clone every non-circular substitution instead of sharing it.
    pub clone_references: bool,
    pub max_depth: usize,
}

impl Default for DereferenceOptions {
    fn default() -> Self {
        Self {
            circular: Circular::Allow,
            on_circular: None,
            on_dereference: None,
            excluded_path_matcher: None,
            external_reference_resolution: ExternalResolution::Relative,
            preserved_properties: Vec::new(),
            clone_references: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl fmt::Debug for DereferenceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DereferenceOptions")
            .field("circular", &self.circular)
            .field("on_circular", &self.on_circular.is_some())
            .field("on_dereference", &self.on_dereference.is_some())
            .field(
                "excluded_path_matcher",
                &self.excluded_path_matcher.is_some(),
            )
            .field(
                "external_reference_resolution",
                &self.external_reference_resolution,
            )
            .field("preserved_properties", &self.preserved_properties)
            .field("clone_references", &self.clone_references)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

/// Options for bundling.
#[derive(Clone)]
pub struct BundleOptions {
    pub on_bundle: Option<BundleHook>,
    /// Point internal `$ref`s straight at their final target.
    pub optimize_internal_refs: bool,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            on_bundle: None,
            optimize_internal_refs: true,
        }
    }
}

impl fmt::Debug for BundleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleOptions")
            .field("on_bundle", &self.on_bundle.is_some())
            .field("optimize_internal_refs", &self.optimize_internal_refs)
            .finish()
    }
}

/// Options shared by every operation.
#[derive(Debug, Clone)]
pub struct Options {
    /// Record recoverable failures and report them together at the end.
    pub continue_on_error: bool,
    pub resolve: ResolveOptions,
    pub dereference: DereferenceOptions,
    pub bundle: BundleOptions,
    /// Write dereferenced output back into the caller's value.
    pub mutate_input_schema: bool,
    /// Overall deadline for an operation.
    pub timeout_ms: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            resolve: ResolveOptions::default(),
            dereference: DereferenceOptions::default(),
            bundle: BundleOptions::default(),
            mutate_input_schema: true,
            timeout_ms: None,
        }
    }
}

impl Options {
    /// Create options with every default.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn external(mut self, external: bool) -> Self {
        self.resolve.external = external;
        self
    }

    pub fn circular(mut self, circular: Circular) -> Self {
        self.dereference.circular = circular;
        self
    }

    pub fn on_circular(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.dereference.on_circular = Some(Arc::new(hook));
        self
    }

    pub fn on_dereference(
        mut self,
        hook: impl Fn(&str, NodeRef<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.dereference.on_dereference = Some(Arc::new(hook));
        self
    }

    pub fn excluded_path_matcher(
        mut self,
        matcher: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.dereference.excluded_path_matcher = Some(Arc::new(matcher));
        self
    }

    pub fn external_reference_resolution(mut self, resolution: ExternalResolution) -> Self {
        self.dereference.external_reference_resolution = resolution;
        self
    }

    pub fn preserved_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dereference.preserved_properties = properties.into_iter().map(Into::into).collect();
        self
    }

    pub fn clone_references(mut self, clone_references: bool) -> Self {
        self.dereference.clone_references = clone_references;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.dereference.max_depth = max_depth;
        self
    }

    pub fn mutate_input_schema(mut self, mutate: bool) -> Self {
        self.mutate_input_schema = mutate;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn on_bundle(
        mut self,
        hook: impl Fn(&str, &Value, &Value, &str) + Send + Sync + 'static,
    ) -> Self {
        self.bundle.on_bundle = Some(Arc::new(hook));
        self
    }

    pub fn optimize_internal_refs(mut self, optimize: bool) -> Self {
        self.bundle.optimize_internal_refs = optimize;
        self
    }
}

/// Point in time after which an operation fails with [`RefError::Timeout`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Instant,
    timeout_ms: u64,
}

impl Deadline {
    pub(crate) fn from_options(options: &Options) -> Option<Self> {
        options.timeout_ms.map(|timeout_ms| Self {
            at: Instant::now() + Duration::from_millis(timeout_ms),
            timeout_ms,
        })
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub(crate) fn error(&self) -> RefError {
        RefError::Timeout {
            timeout_ms: self.timeout_ms,
        }
    }

    pub(crate) fn check(deadline: Option<&Self>) -> Result<(), RefError> {
        match deadline {
            Some(deadline) if Instant::now() >= deadline.at => Err(deadline.error()),
            _ => Ok(()),
        }
    }
}
