//! External reference crawler.
//!
//! Finds every `$ref` that leaves its document, registers the target document
//! and fetches it, then repeats for each newly fetched document until nothing
//! new turns up. All fetches run concurrently on the caller's task.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use url::Url;

use crate::error::{CollectedError, RefError};
use crate::loader::Loader;
use crate::location;
use crate::pointer;
use crate::registry::Registry;
use crate::types::{Deadline, ExternalResolution, Options};

/// An external document found while walking a parsed document.
#[derive(Debug)]
struct Discovered {
    /// Document containing the `$ref`.
    source: Url,
    /// JSON path of the `$ref` node within `source`.
    path: String,
    target: Result<Url, RefError>,
}

/// A finished fetch.
struct Fetched {
    document: Url,
    path: String,
    result: Result<Value, RefError>,
}

/// Fetch every document transitively referenced from the registered ones.
///
/// Does nothing when external resolution is disabled.
///
/// # Errors
///
/// Returns the first fetch or parse failure unless `continue_on_error` is set,
/// in which case failures are recorded on the failing document. Returns
/// [`RefError::Timeout`] if the deadline passes first.
pub(crate) async fn crawl(
    registry: &mut Registry,
    loader: &Loader,
    options: &Options,
    deadline: Option<&Deadline>,
) -> Result<(), RefError> {
    if !options.resolve.external {
        tracing::debug!("external resolution disabled, skipping crawl");
        return Ok(());
    }

    Deadline::check(deadline)?;
    let fetch_all = fetch_all(registry, loader, options);
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline.remaining(), fetch_all)
            .await
            .map_err(|_| deadline.error())?,
        None => fetch_all.await,
    }
}

async fn fetch_all(
    registry: &mut Registry,
    loader: &Loader,
    options: &Options,
) -> Result<(), RefError> {
    let Some(root) = registry.root_location().cloned() else {
        return Ok(());
    };
    let mode = options.dereference.external_reference_resolution;
    let mut pending = FuturesUnordered::new();

    let loaded: Vec<Url> = registry
        .documents()
        .filter(|doc| doc.value().is_some())
        .map(|doc| doc.location().clone())
        .collect();
    for document in loaded {
        let found = discover(registry, &document, &root, mode);
        schedule(registry, loader, options, found, &mut pending)?;
    }

    while let Some(fetched) = pending.next().await {
        match fetched.result {
            Ok(value) => {
                tracing::debug!("resolved {}", fetched.document);
                registry.add(&fetched.document).set_value(value);
                let found = discover(registry, &fetched.document, &root, mode);
                schedule(registry, loader, options, found, &mut pending)?;
            }
            Err(error) if options.continue_on_error && error.is_recoverable() => {
                let collected = CollectedError {
                    error,
                    source: location::display(&fetched.document),
                    path: fetched.path,
                };
                registry.record_error(&fetched.document, collected);
            }
            // Dropping `pending` cancels the fetches still in flight
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

/// Register a placeholder for each new document and start its fetch.
fn schedule<'l>(
    registry: &mut Registry,
    loader: &'l Loader,
    options: &Options,
    found: Vec<Discovered>,
    pending: &mut FuturesUnordered<BoxFuture<'l, Fetched>>,
) -> Result<(), RefError> {
    for Discovered {
        source,
        path,
        target,
    } in found
    {
        let target = match target {
            Ok(target) => target,
            Err(error) if options.continue_on_error => {
                let collected = CollectedError {
                    error,
                    source: location::display(&source),
                    path,
                };
                registry.record_error(&source, collected);
                continue;
            }
            Err(error) => return Err(error),
        };
        if registry.contains(&target) {
            continue;
        }
        let document = location::document(&target);
        registry.add(&document);
        tracing::debug!("fetching {} (referenced from {})", document, path);
        let fragment = location::tokens(&target)
            .map(|tokens| pointer::fragment(&tokens))
            .unwrap_or_else(|_| "#".to_string());
        pending.push(fetch(loader, document, fragment));
    }
    Ok(())
}

fn fetch(loader: &Loader, document: Url, path: String) -> BoxFuture<'_, Fetched> {
    async move {
        let result = loader.load(&document).await;
        Fetched {
            document,
            path,
            result,
        }
    }
    .boxed()
}

/// External `$ref` targets within one registered document.
fn discover(
    registry: &Registry,
    document: &Url,
    root: &Url,
    mode: ExternalResolution,
) -> Vec<Discovered> {
    let mut found = Vec::new();
    if let Some(value) = registry.document(document).and_then(|doc| doc.value()) {
        let mut path = Vec::new();
        discover_in(value, document, root, mode, &mut path, &mut found);
    }
    found
}

fn discover_in(
    value: &Value,
    document: &Url,
    root: &Url,
    mode: ExternalResolution,
    path: &mut Vec<String>,
    found: &mut Vec<Discovered>,
) {
    if let Some(reference) = pointer::ref_target(value) {
        let base = pointer::ref_base(document, root, reference, mode);
        let target = location::resolve(base, reference);
        let external = match &target {
            Ok(target) => !location::same_document(target, document),
            Err(_) => true,
        };
        if external {
            found.push(Discovered {
                source: document.clone(),
                path: pointer::fragment(path),
                target,
            });
        }
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                discover_in(child, document, root, mode, path, found);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                path.push(i.to_string());
                discover_in(child, document, root, mode, path, found);
                path.pop();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::parsers::JsonParser;
    use crate::resolvers::{FileInfo, Resolver};

    /// Serves documents from memory under the `mem:` scheme.
    struct Memory {
        documents: HashMap<String, String>,
        reads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Resolver for Memory {
        fn name(&self) -> &str {
            "memory"
        }

        fn can_read(&self, file: &FileInfo) -> bool {
            file.url.scheme() == "mem"
        }

        async fn read(&self, file: &FileInfo) -> Result<Vec<u8>, RefError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.documents
                .get(file.url.as_str())
                .map(|data| data.as_bytes().to_vec())
                .ok_or_else(|| RefError::Resolver {
                    location: file.display(),
                    message: "not found".to_string(),
                    code: None,
                })
        }
    }

    fn setup(documents: &[(&str, Value)]) -> (Loader, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let memory = Memory {
            documents: documents
                .iter()
                .map(|(url, value)| (url.to_string(), value.to_string()))
                .collect(),
            reads: reads.clone(),
        };
        let loader = Loader::empty().with_resolver(memory).with_parser(JsonParser);
        (loader, reads)
    }

    fn registry_with_root(root: Value) -> Registry {
        let mut registry = Registry::new();
        let url = Url::parse("mem://schemas/root.json").unwrap();
        registry.add(&url).set_value(root);
        registry
    }

    #[tokio::test]
    async fn fetches_each_document_once() {
        let (loader, reads) = setup(&[
            (
                "mem://schemas/a.json",
                json!({"b": {"$ref": "b.json"}, "again": {"$ref": "b.json#/x"}}),
            ),
            ("mem://schemas/b.json", json!({"x": {"$ref": "a.json"}})),
        ]);
        let mut registry = registry_with_root(json!({
            "one": {"$ref": "a.json"},
            "two": {"$ref": "a.json#/b"},
            "three": {"$ref": "b.json"}
        }));

        crawl(&mut registry, &loader, &Options::new(), None)
            .await
            .unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert!(registry.documents().all(|doc| doc.value().is_some()));
    }

    #[tokio::test]
    async fn ref_siblings_are_crawled() {
        let (loader, _) = setup(&[
            ("mem://schemas/a.json", json!({"type": "string"})),
            ("mem://schemas/b.json", json!({"type": "integer"})),
        ]);
        let mut registry = registry_with_root(json!({
            "x": {"$ref": "a.json", "items": {"$ref": "b.json"}}
        }));

        crawl(&mut registry, &loader, &Options::new(), None)
            .await
            .unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn external_disabled_skips_crawl() {
        let (loader, reads) = setup(&[("mem://schemas/a.json", json!({}))]);
        let mut registry = registry_with_root(json!({"a": {"$ref": "a.json"}}));

        crawl(&mut registry, &loader, &Options::new().external(false), None)
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_aborts_by_default() {
        let (loader, _) = setup(&[]);
        let mut registry = registry_with_root(json!({"a": {"$ref": "missing.json"}}));

        let err = crawl(&mut registry, &loader, &Options::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::Resolver { .. }));
    }

    #[tokio::test]
    async fn continue_on_error_records_failure() {
        let (loader, _) = setup(&[("mem://schemas/a.json", json!({"ok": true}))]);
        let mut registry = registry_with_root(json!({
            "a": {"$ref": "a.json"},
            "b": {"$ref": "missing.json#/x"}
        }));

        crawl(
            &mut registry,
            &loader,
            &Options::new().continue_on_error(true),
            None,
        )
        .await
        .unwrap();

        let missing = Url::parse("mem://schemas/missing.json").unwrap();
        let doc = registry.document(&missing).unwrap();
        assert!(doc.value().is_none());
        assert_eq!(doc.errors().len(), 1);
        assert_eq!(doc.errors()[0].path, "#/x");
        assert_eq!(registry.errors().len(), 1);
    }

    #[tokio::test]
    async fn root_mode_resolves_against_root() {
        let (loader, _) = setup(&[
            (
                "mem://schemas/nested/a.json",
                json!({"b": {"$ref": "b.json"}}),
            ),
            ("mem://schemas/b.json", json!({"type": "string"})),
        ]);
        let mut registry = registry_with_root(json!({"a": {"$ref": "nested/a.json"}}));
        let options = Options::new().external_reference_resolution(ExternalResolution::Root);

        crawl(&mut registry, &loader, &options, None).await.unwrap();
        assert!(registry.contains(&Url::parse("mem://schemas/b.json").unwrap()));
        assert!(!registry.contains(&Url::parse("mem://schemas/nested/b.json").unwrap()));
    }

    #[test]
    fn discover_skips_internal_refs() {
        let registry = registry_with_root(json!({
            "a": {"$ref": "#/b"},
            "b": {"$ref": "root.json#/a"},
            "c": [{"$ref": "other.json#/x"}]
        }));
        let root = registry.root_location().unwrap().clone();
        let found = discover(&registry, &root, &root, ExternalResolution::Relative);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "#/c/0");
        assert_eq!(
            found[0].target.as_ref().unwrap().as_str(),
            "mem://schemas/other.json#/x"
        );
    }
}
