//! Fetch and parse orchestration.
//!
//! Turns a location into a value by asking the registered resolvers for its
//! bytes and the registered parsers for a value, in plugin order.

use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::error::RefError;
use crate::parsers::{JsonParser, Parser, TextParser, YamlParser};
use crate::resolvers::{FileInfo, FileResolver, Resolver};

/// Ordered resolver and parser plugins.
#[derive(Clone)]
pub struct Loader {
    resolvers: Vec<Arc<dyn Resolver>>,
    parsers: Vec<Arc<dyn Parser>>,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field(
                "resolvers",
                &self.resolvers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field(
                "parsers",
                &self.parsers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    /// Loader with the built-in resolvers and parsers.
    ///
    /// HTTP support requires the `remote` feature (enabled by default).
    pub fn new() -> Self {
        let loader = Self::empty()
            .with_resolver(FileResolver)
            .with_parser(JsonParser)
            .with_parser(YamlParser)
            .with_parser(TextParser);

        #[cfg(feature = "remote")]
        let loader = match crate::resolvers::HttpResolver::new() {
            Ok(http) => loader.with_resolver(http),
            Err(e) => {
                tracing::warn!("HTTP resolver unavailable: {}", e);
                loader
            }
        };

        loader
    }

    /// Loader without any plugins.
    pub fn empty() -> Self {
        Self {
            resolvers: Vec::new(),
            parsers: Vec::new(),
        }
    }

    /// Add a resolver, keeping resolvers sorted by order.
    pub fn with_resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self.resolvers.sort_by_key(|r| r.order());
        self
    }

    /// Add a parser, keeping parsers sorted by order.
    pub fn with_parser(mut self, parser: impl Parser + 'static) -> Self {
        self.parsers.push(Arc::new(parser));
        self.parsers.sort_by_key(|p| p.order());
        self
    }

    /// Read and parse the document at `url`.
    pub async fn load(&self, url: &Url) -> Result<Value, RefError> {
        let mut file = FileInfo::new(url.clone());
        file.data = self.read(&file).await?;
        self.parse(&file)
    }

    /// Read with the first resolver that can read the file and succeeds.
    pub async fn read(&self, file: &FileInfo) -> Result<Vec<u8>, RefError> {
        let candidates: Vec<_> = self
            .resolvers
            .iter()
            .filter(|r| r.can_read(file))
            .collect();
        if candidates.is_empty() {
            return Err(RefError::UnmatchedResolver {
                location: file.display(),
            });
        }

        let mut failures = Vec::new();
        for resolver in candidates {
            match resolver.read(file).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    tracing::debug!("resolver {} failed: {}", resolver.name(), e);
                    failures.push(e);
                }
            }
        }
        Err(aggregate_read_failures(file, failures))
    }

    /// Parse with the first parser that claims the file and succeeds.
    ///
    /// When no parser claims the file every parser is tried.
    pub fn parse(&self, file: &FileInfo) -> Result<Value, RefError> {
        let claimed: Vec<_> = self
            .parsers
            .iter()
            .filter(|p| p.can_parse(file))
            .collect();
        let matched = !claimed.is_empty();
        let candidates = if matched {
            claimed
        } else {
            self.parsers.iter().collect()
        };

        let mut last_error = None;
        for parser in candidates {
            if file.data.is_empty() && !parser.allow_empty() {
                last_error = Some(RefError::Parser {
                    location: file.display(),
                    message: format!("{} parser does not accept empty files", parser.name()),
                });
                continue;
            }
            match parser.parse(file) {
                Ok(value) => {
                    tracing::debug!("parsed {} with {} parser", file.display(), parser.name());
                    return Ok(value);
                }
                Err(e) => {
                    tracing::debug!("parser {} failed: {}", parser.name(), e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if matched => Err(e),
            _ => Err(RefError::UnmatchedParser {
                location: file.display(),
            }),
        }
    }
}

/// One failure passes through; several are merged into one message.
fn aggregate_read_failures(file: &FileInfo, mut failures: Vec<RefError>) -> RefError {
    if failures.len() == 1 {
        return failures.remove(0);
    }
    let code = failures.iter().find_map(|e| match e {
        RefError::Resolver { code, .. } => *code,
        _ => None,
    });
    let message = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    RefError::Resolver {
        location: file.display(),
        message,
        code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    use crate::location;

    struct Fixed {
        name: &'static str,
        order: u32,
        result: Result<&'static str, &'static str>,
    }

    #[async_trait]
    impl Resolver for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> u32 {
            self.order
        }

        fn can_read(&self, file: &FileInfo) -> bool {
            file.url.scheme() == "mem"
        }

        async fn read(&self, file: &FileInfo) -> Result<Vec<u8>, RefError> {
            match self.result {
                Ok(data) => Ok(data.as_bytes().to_vec()),
                Err(message) => Err(RefError::Resolver {
                    location: file.display(),
                    message: message.to_string(),
                    code: None,
                }),
            }
        }
    }

    struct Strict;

    impl Parser for Strict {
        fn name(&self) -> &str {
            "strict"
        }

        fn allow_empty(&self) -> bool {
            false
        }

        fn can_parse(&self, file: &FileInfo) -> bool {
            file.extension == ".strict"
        }

        fn parse(&self, _file: &FileInfo) -> Result<Value, RefError> {
            Ok(json!("strict"))
        }
    }

    #[tokio::test]
    async fn load_file() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, r#"{{"type": "object"}}"#).unwrap();

        let url = location::from_path(file.path()).unwrap();
        let value = Loader::new().load(&url).await.unwrap();
        assert_eq!(value["type"], "object");
    }

    #[tokio::test]
    async fn load_invalid_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, "{{ not json").unwrap();

        let url = location::from_path(file.path()).unwrap();
        let result = Loader::new().load(&url).await;
        assert!(matches!(result, Err(RefError::Parser { .. })));
    }

    #[tokio::test]
    async fn unknown_extension_falls_back_to_all_parsers() {
        let mut file = NamedTempFile::with_suffix(".schema").unwrap();
        writeln!(file, "type: string").unwrap();

        let url = location::from_path(file.path()).unwrap();
        let value = Loader::new().load(&url).await.unwrap();
        assert_eq!(value, json!({"type": "string"}));
    }

    #[tokio::test]
    async fn unmatched_resolver() {
        let url = Url::parse("ftp://example.com/schema.json").unwrap();
        let result = Loader::new().load(&url).await;
        assert!(matches!(result, Err(RefError::UnmatchedResolver { .. })));
    }

    #[tokio::test]
    async fn first_successful_resolver_wins() {
        let loader = Loader::empty()
            .with_resolver(Fixed {
                name: "second",
                order: 20,
                result: Ok(r#"{"from": "second"}"#),
            })
            .with_resolver(Fixed {
                name: "first",
                order: 10,
                result: Err("offline"),
            })
            .with_parser(JsonParser);

        let url = Url::parse("mem://schemas/a.json").unwrap();
        assert_eq!(loader.load(&url).await.unwrap(), json!({"from": "second"}));
    }

    #[tokio::test]
    async fn resolver_failures_are_aggregated() {
        let loader = Loader::empty()
            .with_resolver(Fixed {
                name: "a",
                order: 1,
                result: Err("first failure"),
            })
            .with_resolver(Fixed {
                name: "b",
                order: 2,
                result: Err("second failure"),
            });

        let url = Url::parse("mem://schemas/a.json").unwrap();
        let err = loader.load(&url).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("first failure"));
        assert!(message.contains("second failure"));
    }

    #[test]
    fn empty_file_rejected_by_strict_parser() {
        let loader = Loader::empty().with_parser(Strict);
        let file = FileInfo::new(Url::parse("mem:///a.strict").unwrap());
        assert!(matches!(loader.parse(&file), Err(RefError::Parser { .. })));
    }

    #[test]
    fn no_parser_succeeds_is_unmatched() {
        let loader = Loader::empty().with_parser(JsonParser);
        let mut file = FileInfo::new(Url::parse("mem://a.bin").unwrap());
        file.data = vec![0xff, 0xfe];
        assert!(matches!(
            loader.parse(&file),
            Err(RefError::UnmatchedParser { .. })
        ));
    }
}
