//! Parsers: turn the bytes read by a resolver into a JSON value.

use serde::Deserialize;
use serde_json::Value;

use crate::error::RefError;
use crate::resolvers::FileInfo;

/// Extensions the text parser claims.
pub const TEXT_EXTENSIONS: &[&str] = &[
    ".txt", ".htm", ".html", ".md", ".xml", ".js", ".min", ".map", ".css", ".scss", ".less",
    ".svg",
];

/// Parses file contents into a value.
pub trait Parser: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first.
    fn order(&self) -> u32 {
        100
    }

    /// Whether an empty file is accepted (parsed as `null` or `""`).
    fn allow_empty(&self) -> bool {
        true
    }

    fn can_parse(&self, file: &FileInfo) -> bool;

    fn parse(&self, file: &FileInfo) -> Result<Value, RefError>;
}

/// JSON documents (`.json`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn name(&self) -> &str {
        "json"
    }

    fn order(&self) -> u32 {
        100
    }

    fn can_parse(&self, file: &FileInfo) -> bool {
        file.extension == ".json"
    }

    fn parse(&self, file: &FileInfo) -> Result<Value, RefError> {
        let data = strip_bom(&file.data);
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        parse_unbounded(data).map_err(|source| RefError::Parser {
            location: file.display(),
            message: source.to_string(),
        })
    }
}

/// Parse JSON of any nesting depth, growing the stack as needed.
///
/// `max_depth` is the only bound on how deep a schema may be.
fn parse_unbounded(data: &[u8]) -> Result<Value, serde_json::Error> {
    let mut de = serde_json::Deserializer::from_slice(data);
    de.disable_recursion_limit();
    let value = Value::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

/// YAML documents (`.yaml`, `.yml`, and `.json` since YAML is a superset).
///
/// `serde_yaml` stops at 128 levels of nesting; deeper documents fail to
/// parse whatever `max_depth` allows. JSON files reach [`JsonParser`] first.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlParser;

impl Parser for YamlParser {
    fn name(&self) -> &str {
        "yaml"
    }

    fn order(&self) -> u32 {
        200
    }

    fn can_parse(&self, file: &FileInfo) -> bool {
        matches!(file.extension.as_str(), ".yaml" | ".yml" | ".json")
    }

    fn parse(&self, file: &FileInfo) -> Result<Value, RefError> {
        let data = strip_bom(&file.data);
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_yaml::from_slice(data).map_err(|source| RefError::Parser {
            location: file.display(),
            message: source.to_string(),
        })
    }
}

/// Plain text files, parsed to a JSON string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl Parser for TextParser {
    fn name(&self) -> &str {
        "text"
    }

    fn order(&self) -> u32 {
        300
    }

    fn can_parse(&self, file: &FileInfo) -> bool {
        TEXT_EXTENSIONS.contains(&file.extension.as_str())
    }

    fn parse(&self, file: &FileInfo) -> Result<Value, RefError> {
        std::str::from_utf8(strip_bom(&file.data))
            .map(|text| Value::String(text.to_string()))
            .map_err(|source| RefError::Parser {
                location: file.display(),
                message: source.to_string(),
            })
    }
}

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data)
}
