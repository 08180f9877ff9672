//! Entry points: parse, resolve, dereference and bundle a schema.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde_json::Value;
use url::Url;

use crate::crawler;
use crate::dereference::Dereferenced;
use crate::error::{Partial, RefError};
use crate::loader::Loader;
use crate::location;
use crate::registry::Registry;
use crate::types::{Deadline, Options};

/// Where the root schema comes from.
#[derive(Debug, Clone)]
pub enum Source {
    /// A URL or filesystem path; relative paths resolve against the working directory.
    Location(String),
    /// A filesystem path, taken literally (a `#` is part of the file name).
    Path(PathBuf),
    /// An already parsed schema. Relative `$ref`s resolve against `base`,
    /// or the working directory when absent.
    Value { value: Value, base: Option<String> },
}

impl Source {
    pub fn value_with_base(value: Value, base: impl Into<String>) -> Self {
        Source::Value {
            value,
            base: Some(base.into()),
        }
    }
}

impl From<&str> for Source {
    fn from(location: &str) -> Self {
        Source::Location(location.to_string())
    }
}

impl From<String> for Source {
    fn from(location: String) -> Self {
        Source::Location(location)
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<Value> for Source {
    fn from(value: Value) -> Self {
        Source::Value { value, base: None }
    }
}

/// Runs operations with one set of options and plugins.
#[derive(Debug, Clone, Default)]
pub struct RefParser {
    options: Options,
    loader: Loader,
}

impl RefParser {
    /// Parser with the default resolvers and parsers.
    pub fn new(options: Options) -> Self {
        Self {
            options,
            loader: Loader::new(),
        }
    }

    /// Replace the resolver and parser plugins.
    pub fn with_loader(mut self, loader: Loader) -> Self {
        self.loader = loader;
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Read and parse the root schema without following any `$ref`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be read or parsed.
    pub async fn parse(&self, source: impl Into<Source>) -> Result<Value, RefError> {
        let deadline = Deadline::from_options(&self.options);
        let (_, value) = self.load_root(source.into(), deadline.as_ref()).await?;
        Ok(value)
    }

    /// Parse the root schema and fetch every document it references.
    ///
    /// # Errors
    ///
    /// Returns the first failure, or under `continue_on_error` a
    /// [`RefError::Grouped`] carrying the registry.
    pub async fn resolve(&self, source: impl Into<Source>) -> Result<Registry, RefError> {
        let deadline = Deadline::from_options(&self.options);
        let registry = self.crawl(source.into(), deadline.as_ref()).await?;
        if registry.errors().is_empty() {
            Ok(registry)
        } else {
            Err(grouped(&registry, Partial::Registry(registry.clone())))
        }
    }

    /// Resolve, then replace every `$ref` with its target.
    ///
    /// # Errors
    ///
    /// Returns the first failure, or under `continue_on_error` a
    /// [`RefError::Grouped`] carrying the partially dereferenced result.
    pub async fn dereference(
        &self,
        source: impl Into<Source>,
    ) -> Result<Dereferenced, RefError> {
        let deadline = Deadline::from_options(&self.options);
        let registry = self.crawl(source.into(), deadline.as_ref()).await?;
        let dereferenced =
            crate::dereference::dereference(registry, &self.options, deadline.as_ref())?;
        if dereferenced.registry().errors().is_empty() {
            Ok(dereferenced)
        } else {
            let error = grouped(
                dereferenced.registry(),
                Partial::Dereferenced(dereferenced.clone()),
            );
            Err(error)
        }
    }

    /// Dereference an in-memory schema, writing the result back into it when
    /// `mutate_input_schema` is set. Cycles are written as internal `$ref`s.
    ///
    /// # Errors
    ///
    /// Same as [`dereference`](RefParser::dereference); `schema` is left
    /// untouched on error.
    pub async fn dereference_in_place(
        &self,
        schema: &mut Value,
    ) -> Result<Dereferenced, RefError> {
        let dereferenced = self.dereference(schema.clone()).await?;
        if self.options.mutate_input_schema {
            *schema = dereferenced.to_value();
        }
        Ok(dereferenced)
    }

    /// Resolve, then merge every external document into the root.
    ///
    /// # Errors
    ///
    /// Returns the first failure, or under `continue_on_error` a
    /// [`RefError::Grouped`] carrying the partially bundled document.
    pub async fn bundle(&self, source: impl Into<Source>) -> Result<Value, RefError> {
        let deadline = Deadline::from_options(&self.options);
        let mut registry = self.crawl(source.into(), deadline.as_ref()).await?;
        let bundled = crate::bundle::bundle(&mut registry, &self.options, deadline.as_ref())?;
        if registry.errors().is_empty() {
            Ok(bundled)
        } else {
            Err(grouped(&registry, Partial::Value(bundled)))
        }
    }

    async fn crawl(
        &self,
        source: Source,
        deadline: Option<&Deadline>,
    ) -> Result<Registry, RefError> {
        let (root, value) = self.load_root(source, deadline).await?;
        let mut registry = Registry::new();
        registry.add(&root).set_value(value);
        crawler::crawl(&mut registry, &self.loader, &self.options, deadline).await?;
        Ok(registry)
    }

    /// Root location and value. Failing to load the root is always fatal.
    async fn load_root(
        &self,
        source: Source,
        deadline: Option<&Deadline>,
    ) -> Result<(Url, Value), RefError> {
        match source {
            Source::Location(input) => {
                let root = location::document(&location::parse(&input)?);
                let value = within(deadline, self.loader.load(&root)).await?;
                Ok((root, value))
            }
            Source::Path(path) => {
                let root = location::from_path(&path)?;
                let value = within(deadline, self.loader.load(&root)).await?;
                Ok((root, value))
            }
            Source::Value { value, base } => {
                let root = match base {
                    Some(base) => location::document(&location::parse(&base)?),
                    None => location::cwd()?,
                };
                Ok((root, value))
            }
        }
    }
}

/// Run a future under the operation deadline, if any.
async fn within<T, F>(deadline: Option<&Deadline>, future: F) -> Result<T, RefError>
where
    F: Future<Output = Result<T, RefError>>,
{
    Deadline::check(deadline)?;
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline.remaining(), future)
            .await
            .map_err(|_| deadline.error())?,
        None => future.await,
    }
}

fn grouped(registry: &Registry, partial: Partial) -> RefError {
    RefError::Grouped {
        location: registry
            .root_location()
            .map(location::display)
            .unwrap_or_default(),
        errors: registry.errors(),
        partial: Box::new(partial),
    }
}

/// Read and parse a schema without following any `$ref`.
///
/// # Errors
///
/// See [`RefParser::parse`].
pub async fn parse(source: impl Into<Source>, options: &Options) -> Result<Value, RefError> {
    RefParser::new(options.clone()).parse(source).await
}

/// Parse a schema and fetch every document it references.
///
/// # Errors
///
/// See [`RefParser::resolve`].
pub async fn resolve(source: impl Into<Source>, options: &Options) -> Result<Registry, RefError> {
    RefParser::new(options.clone()).resolve(source).await
}

/// Replace every `$ref` in a schema with its target.
///
/// # Errors
///
/// See [`RefParser::dereference`].
pub async fn dereference(
    source: impl Into<Source>,
    options: &Options,
) -> Result<Dereferenced, RefError> {
    RefParser::new(options.clone()).dereference(source).await
}

/// Merge every external document a schema references into the schema.
///
/// # Errors
///
/// See [`RefParser::bundle`].
pub async fn bundle(source: impl Into<Source>, options: &Options) -> Result<Value, RefError> {
    RefParser::new(options.clone()).bundle(source).await
}
