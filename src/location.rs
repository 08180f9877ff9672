//! Absolute document locations.
//!
//! Every document is identified by an absolute [`Url`]. Filesystem paths are
//! converted to `file:` URLs so relative `$ref`s resolve with plain URL
//! joining, and converted back for display.

use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::RefError;
use crate::pointer;

/// Parse a user-supplied location: an absolute URL or a filesystem path.
///
/// Relative paths are resolved against the current working directory.
/// A `#fragment` suffix is kept on the returned URL.
pub fn parse(input: &str) -> Result<Url, RefError> {
    if has_scheme(input) {
        return Url::parse(input).map_err(|e| RefError::InvalidLocation {
            location: input.to_string(),
            message: e.to_string(),
        });
    }

    let (path, fragment) = match input.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (input, None),
    };
    let mut url = from_path(Path::new(path))?;
    if fragment.is_some() {
        url.set_fragment(fragment);
    }
    Ok(url)
}

/// Convert a filesystem path to a normalized `file:` URL.
pub fn from_path(path: &Path) -> Result<Url, RefError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        current_dir()?.join(path)
    };
    let url = Url::from_file_path(&absolute).map_err(|()| RefError::InvalidLocation {
        location: path.display().to_string(),
        message: "not an absolute filesystem path".to_string(),
    })?;
    // Re-parse to collapse `..` segments
    Url::parse(url.as_str()).map_err(|e| RefError::InvalidLocation {
        location: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Location of the current working directory, used as the base for in-memory roots.
pub fn cwd() -> Result<Url, RefError> {
    let dir = current_dir()?;
    Url::from_directory_path(&dir).map_err(|()| RefError::InvalidLocation {
        location: dir.display().to_string(),
        message: "not an absolute filesystem path".to_string(),
    })
}

fn current_dir() -> Result<PathBuf, RefError> {
    std::env::current_dir().map_err(|e| RefError::InvalidLocation {
        location: ".".to_string(),
        message: e.to_string(),
    })
}

/// Resolve a `$ref` string against a base location.
pub fn resolve(base: &Url, reference: &str) -> Result<Url, RefError> {
    base.join(reference).map_err(|e| RefError::InvalidLocation {
        location: reference.to_string(),
        message: e.to_string(),
    })
}

/// The document part of a location.
pub fn document(url: &Url) -> Url {
    let mut document = url.clone();
    document.set_fragment(None);
    document
}

/// Registry key for the document a location belongs to.
pub fn document_key(url: &Url) -> &str {
    match url.as_str().split_once('#') {
        Some((document, _)) => document,
        None => url.as_str(),
    }
}

/// Whether two locations name the same document.
pub fn same_document(a: &Url, b: &Url) -> bool {
    document_key(a) == document_key(b)
}

/// JSON Pointer tokens of a location's fragment.
///
/// A missing or empty fragment addresses the whole document.
pub fn tokens(url: &Url) -> Result<Vec<String>, RefError> {
    match url.fragment() {
        None | Some("") => Ok(Vec::new()),
        Some(fragment) => {
            let decoded = percent_decode(fragment);
            pointer::parse(&decoded).map_err(|_| RefError::InvalidPointer {
                pointer: format!("#{}", fragment),
                path: display(url),
            })
        }
    }
}

/// A document location with its fragment set to the given pointer tokens.
pub fn with_tokens(document: &Url, tokens: &[String]) -> Url {
    let mut url = document.clone();
    let fragment = pointer::compile(tokens).replace('%', "%25");
    url.set_fragment(Some(&fragment));
    url
}

/// Extension of the last path segment, lowercased and including the dot.
pub fn extension(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rfind('.').map(|idx| name[idx..].to_lowercase()))
        .unwrap_or_default()
}

/// Human-readable form: OS paths for `file:` URLs, the URL otherwise.
pub fn display(url: &Url) -> String {
    if url.scheme() == "file" {
        if let Ok(path) = document(url).to_file_path() {
            return match url.fragment() {
                Some(fragment) => {
                    format!("{}#{}", path.display(), percent_decode(fragment))
                }
                None => path.display().to_string(),
            };
        }
    }
    url.to_string()
}

/// A scheme is at least two characters, so `C:\schemas` stays a path.
fn has_scheme(input: &str) -> bool {
    match input.find(':') {
        Some(idx) if idx > 1 => {
            let scheme = &input[..idx];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_url() {
        let url = parse("https://example.com/schemas/a.json#/definitions/b").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.fragment(), Some("/definitions/b"));
    }

    #[test]
    fn parse_relative_path_is_absolute_file_url() {
        let url = parse("schemas/a.json").unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/schemas/a.json"));
    }

    #[cfg(unix)]
    #[test]
    fn parse_absolute_path_normalizes_dot_segments() {
        let url = parse("/tmp/schemas/../a.json#/x").unwrap();
        assert_eq!(url.as_str(), "file:///tmp/a.json#/x");
        assert_eq!(display(&url), "/tmp/a.json#/x");
    }

    #[test]
    fn drive_letter_is_not_a_scheme() {
        assert!(!has_scheme("C:\\schemas\\a.json"));
        assert!(has_scheme("file:///a.json"));
        assert!(has_scheme("urn:example:a"));
        assert!(!has_scheme("a.json"));
    }

    #[test]
    fn resolve_relative_ref() {
        let base = Url::parse("https://example.com/schemas/root.json#/a").unwrap();
        let url = resolve(&base, "types/b.yaml#/c").unwrap();
        assert_eq!(url.as_str(), "https://example.com/schemas/types/b.yaml#/c");

        let url = resolve(&base, "#/definitions/x").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/schemas/root.json#/definitions/x"
        );
    }

    #[test]
    fn document_key_strips_fragment() {
        let url = Url::parse("https://example.com/a.json#/b").unwrap();
        assert_eq!(document_key(&url), "https://example.com/a.json");
        assert_eq!(document(&url).as_str(), "https://example.com/a.json");
        let other = Url::parse("https://example.com/a.json").unwrap();
        assert!(same_document(&url, &other));
    }

    #[test]
    fn tokens_are_decoded() {
        let url = Url::parse("https://example.com/a.json#/paths/~1users~1%7Bid%7D/a%20b").unwrap();
        assert_eq!(tokens(&url).unwrap(), vec!["paths", "/users/{id}", "a b"]);

        let url = Url::parse("https://example.com/a.json#").unwrap();
        assert!(tokens(&url).unwrap().is_empty());
    }

    #[test]
    fn tokens_reject_non_pointer_fragment() {
        let url = Url::parse("https://example.com/a.json#anchor").unwrap();
        assert!(matches!(
            tokens(&url),
            Err(RefError::InvalidPointer { .. })
        ));
    }

    #[test]
    fn with_tokens_round_trips() {
        let doc = Url::parse("https://example.com/a.json").unwrap();
        let tokens_in = vec!["a b".to_string(), "50%".to_string(), "x/y".to_string()];
        let url = with_tokens(&doc, &tokens_in);
        assert_eq!(tokens(&url).unwrap(), tokens_in);
    }

    #[test]
    fn trailing_escape_is_decoded() {
        let url = Url::parse("https://example.com/a.json#/caf%C3%A9/%41").unwrap();
        assert_eq!(tokens(&url).unwrap(), vec!["café", "A"]);
    }

    #[test]
    fn extension_of_last_segment() {
        let url = Url::parse("https://example.com/a/Schema.YAML#/x").unwrap();
        assert_eq!(extension(&url), ".yaml");
        let url = Url::parse("https://example.com/a/schema").unwrap();
        assert_eq!(extension(&url), "");
    }
}
