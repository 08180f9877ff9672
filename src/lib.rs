//! JSON Schema `$ref` resolution
//!
//! Parse a JSON or YAML schema, fetch every file and URL its `$ref`s point at,
//! and then either dereference it (replace each `$ref` with its target) or
//! bundle it (merge every external document into one file whose `$ref`s are
//! all internal).
//!
//! # Example
//!
//! ```
//! use json_schema_ref::{dereference, Options};
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let schema = json!({
//!     "definitions": {
//!         "id": { "type": "integer" }
//!     },
//!     "properties": {
//!         "id": { "$ref": "#/definitions/id" }
//!     }
//! });
//!
//! let result = dereference(schema, &Options::new()).await.unwrap();
//!
//! // The $ref is replaced by the node it points at
//! assert_eq!(result.to_value()["properties"]["id"]["type"], "integer");
//! assert!(!result.is_circular());
//! # });
//! ```
//!
//! # Circular References
//!
//! Dereferenced output lives in a [`Graph`] arena, so a schema that refers
//! to itself becomes a graph with a cycle rather than an infinite tree.
//!
//! | `circular` | Effect on a circular `$ref` |
//! |------------|-----------------------------|
//! | `Allow` (default) | Replaced by its in-progress target, creating a cycle |
//! | `Forbid` | Fails with [`RefError::Circular`] |
//! | `Ignore` | Left as a `$ref` |
//!
//! [`Dereferenced::to_value`] writes each cycle back out as a `$ref` to the
//! place where the repeated node first appears.
//!
//! # Bundling
//!
//! The first `$ref` to reach a value in another document becomes that
//! value's home: the value is copied there. Every other `$ref` is rewritten
//! to point at the home, so the bundled document stands alone.

mod bundle;
mod crawler;
mod dereference;
mod error;
mod graph;
mod loader;
pub mod location;
mod parsers;
pub mod pointer;
mod ref_parser;
mod registry;
mod resolvers;
mod types;

pub use dereference::Dereferenced;
pub use error::{CollectedError, Partial, RefError};
pub use graph::{Graph, Node, NodeId, NodeRef};
pub use loader::Loader;
pub use parsers::{JsonParser, Parser, TextParser, YamlParser, TEXT_EXTENSIONS};
pub use ref_parser::{bundle, dereference, parse, resolve, RefParser, Source};
pub use registry::{PathType, Registry, ResolvedDocument};
pub use resolvers::{FileInfo, FileResolver, Resolver};
pub use types::{
    json_type_name, BundleHook, BundleOptions, Circular, CircularHook, DereferenceHook,
    DereferenceOptions, ExternalResolution, Options, PathMatcher, ResolveOptions,
    DEFAULT_MAX_DEPTH,
};

#[cfg(feature = "remote")]
pub use resolvers::{HttpResolver, HTTP_REDIRECTS, HTTP_TIMEOUT};
