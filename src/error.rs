//! Error types for reference resolution, dereferencing and bundling.

use thiserror::Error;

use crate::dereference::Dereferenced;
use crate::registry::Registry;

/// Errors raised while resolving, dereferencing or bundling a document.
#[derive(Debug, Clone, Error)]
pub enum RefError {
    // IO errors (exit code 3)
    #[error("error reading {location}: {message}")]
    Resolver {
        location: String,
        message: String,
        /// OS error code, when the failure came from the operating system.
        code: Option<i32>,
    },

    #[error("unable to resolve {location}: no resolver can read it")]
    UnmatchedResolver { location: String },

    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // Parse errors (exit code 2)
    #[error("error parsing {location}: {message}")]
    Parser { location: String, message: String },

    #[error("unable to parse {location}: no parser could parse it")]
    UnmatchedParser { location: String },

    // Pointer errors (exit code 2)
    #[error("missing $ref pointer \"{reference}\" at {path}: token \"{token}\" does not exist in {found}")]
    MissingPointer {
        /// The pointer token that could not be found.
        token: String,
        /// The absolute location being resolved.
        reference: String,
        /// The deepest location that did exist.
        found: String,
        /// JSON path (`#/...`) of the node that triggered the lookup.
        path: String,
    },

    #[error("invalid $ref pointer \"{pointer}\" at {path}: pointers must begin with \"#/\"")]
    InvalidPointer { pointer: String, path: String },

    #[error("{location} has not been resolved")]
    MissingDocument { location: String },

    #[error("invalid location \"{location}\": {message}")]
    InvalidLocation { location: String, message: String },

    // Reference graph errors (exit code 2)
    #[error("circular $ref pointer found at {path}")]
    Circular { path: String },

    #[error("maximum dereference depth of {max_depth} exceeded at {path}")]
    MaxDepth { max_depth: usize, path: String },

    #[error("{} error(s) occurred while processing {location}", errors.len())]
    Grouped {
        location: String,
        errors: Vec<CollectedError>,
        partial: Box<Partial>,
    },
}

impl RefError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Resolver { .. } | Self::UnmatchedResolver { .. } | Self::Timeout { .. } => 3,
            Self::Grouped { .. } => 1,
            _ => 2,
        }
    }

    /// Whether `continue_on_error` may record this error and keep going.
    ///
    /// Circular references, depth limits and timeouts always abort.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Resolver { .. }
                | Self::UnmatchedResolver { .. }
                | Self::Parser { .. }
                | Self::UnmatchedParser { .. }
                | Self::MissingPointer { .. }
                | Self::InvalidPointer { .. }
                | Self::MissingDocument { .. }
        )
    }

    /// Errors collected under `continue_on_error`, empty for any other error.
    pub fn errors(&self) -> &[CollectedError] {
        match self {
            Self::Grouped { errors, .. } => errors,
            _ => &[],
        }
    }

    /// Partial result attached to a grouped error.
    pub fn partial(&self) -> Option<&Partial> {
        match self {
            Self::Grouped { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// An error recorded under `continue_on_error`.
#[derive(Debug, Clone)]
pub struct CollectedError {
    pub error: RefError,
    /// Location of the document the failure belongs to.
    pub source: String,
    /// JSON path (`#/...`) of the failing node within `source`.
    pub path: String,
}

impl std::fmt::Display for CollectedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}: {}", self.source, self.path, self.error)
    }
}

/// Whatever an operation managed to produce before its errors were grouped.
#[derive(Debug, Clone)]
pub enum Partial {
    /// A parsed root document or a bundled document.
    Value(serde_json::Value),
    Registry(Registry),
    Dereferenced(Dereferenced),
}
