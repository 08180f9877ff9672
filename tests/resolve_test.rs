//! Integration tests for parsing and resolving external references.

use std::fs;
use std::path::{Path, PathBuf};

use json_schema_ref::{parse, resolve, Options, Partial, PathType, RefError};
use serde_json::json;
use tempfile::TempDir;

// Helper to create a schema file, creating parent directories
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn contains_path(paths: &[String], path: &Path) -> bool {
    let path = path.canonicalize().unwrap();
    paths
        .iter()
        .any(|p| Path::new(p).canonicalize().ok().as_deref() == Some(path.as_path()))
}

// === Parsing ===

mod parsing {
    use super::*;

    #[tokio::test]
    async fn json_file() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", r#"{"type": "object"}"#);

        let value = parse(schema.as_path(), &Options::new()).await.unwrap();
        assert_eq!(value, json!({"type": "object"}));
    }

    #[tokio::test]
    async fn yaml_file() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.yaml",
            "type: object\nproperties:\n  name:\n    $ref: '#/definitions/name'\n",
        );

        let value = parse(schema.as_path(), &Options::new()).await.unwrap();
        assert_eq!(
            value["properties"]["name"],
            json!({"$ref": "#/definitions/name"})
        );
    }

    #[tokio::test]
    async fn location_string() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "nested/schema.json", r#"{"const": 1}"#);

        let location = schema.to_str().unwrap().to_string();
        let value = parse(location, &Options::new()).await.unwrap();
        assert_eq!(value, json!({"const": 1}));
    }

    #[tokio::test]
    async fn invalid_json_is_parser_error() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", "{ not json");

        let err = parse(schema.as_path(), &Options::new()).await.unwrap_err();
        assert!(matches!(err, RefError::Parser { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_resolver_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");

        let err = parse(missing.as_path(), &Options::new()).await.unwrap_err();
        match &err {
            RefError::Resolver { code, .. } => assert!(code.is_some()),
            other => panic!("expected Resolver error, got {:?}", other),
        }
        assert_eq!(err.exit_code(), 3);
    }
}

// === External Files ===

mod external_files {
    use super::*;

    #[tokio::test]
    async fn registry_lists_every_document() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(
            &dir,
            "root.json",
            r#"{"properties": {"name": {"$ref": "definitions/name.yaml"}}}"#,
        );
        let name = write_temp_file(&dir, "definitions/name.yaml", "type: string\n");

        let registry = resolve(root.as_path(), &Options::new()).await.unwrap();
        let paths = registry.paths(&[]);
        assert_eq!(paths.len(), 2);
        assert!(contains_path(&paths, &root));
        assert!(contains_path(&paths, &name));
        assert_eq!(registry.values(&[PathType::File]).len(), 2);
        assert!(registry.paths(&[PathType::Http]).is_empty());
    }

    #[tokio::test]
    async fn get_follows_refs_across_files() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(
            &dir,
            "root.json",
            r#"{"definitions": {"person": {"$ref": "person.json"}}}"#,
        );
        write_temp_file(
            &dir,
            "person.json",
            r#"{"properties": {"age": {"type": "integer"}}}"#,
        );

        let registry = resolve(root.as_path(), &Options::new()).await.unwrap();
        assert_eq!(
            registry
                .get("#/definitions/person/properties/age/type")
                .unwrap(),
            &json!("integer")
        );
        assert_eq!(
            registry.get("person.json#/properties/age").unwrap(),
            &json!({"type": "integer"})
        );
        assert!(registry.exists("#/definitions/person"));
        assert!(!registry.exists("#/definitions/person/properties/name"));
    }

    #[tokio::test]
    async fn set_writes_into_registered_documents() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(&dir, "root.json", r#"{"a": {"$ref": "b.json"}}"#);
        write_temp_file(&dir, "b.json", r#"{"type": "string"}"#);

        let mut registry = resolve(root.as_path(), &Options::new()).await.unwrap();
        registry.set("b.json#/minLength", json!(1)).unwrap();
        assert_eq!(registry.get("#/a/minLength").unwrap(), &json!(1));
    }

    #[tokio::test]
    async fn transitive_documents_are_resolved() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(&dir, "root.json", r#"{"$ref": "a/a.json"}"#);
        write_temp_file(&dir, "a/a.json", r#"{"items": {"$ref": "../b/b.json"}}"#);
        write_temp_file(&dir, "b/b.json", r#"{"items": {"$ref": "../a/a.json"}}"#);

        let registry = resolve(root.as_path(), &Options::new()).await.unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn no_external_skips_fetching() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(&dir, "root.json", r#"{"a": {"$ref": "missing.json"}}"#);

        let registry = resolve(root.as_path(), &Options::new().external(false))
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn resolve_from_root() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(&dir, "root.json", r#"{"a": {"$ref": "nested/a.json"}}"#);
        write_temp_file(&dir, "nested/a.json", r#"{"b": {"$ref": "b.json"}}"#);
        write_temp_file(&dir, "b.json", r#"{"type": "string"}"#);

        let options = Options::new().external_reference_resolution(
            json_schema_ref::ExternalResolution::Root,
        );
        let registry = resolve(root.as_path(), &options).await.unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("b.json#/type").unwrap(), &json!("string"));
    }
}

// === Error Handling ===

mod error_handling {
    use super::*;

    #[tokio::test]
    async fn missing_external_file_fails_by_default() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(&dir, "root.json", r#"{"a": {"$ref": "missing.json"}}"#);

        let err = resolve(root.as_path(), &Options::new()).await.unwrap_err();
        assert!(matches!(err, RefError::Resolver { .. }));
    }

    #[tokio::test]
    async fn continue_on_error_groups_failures() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(
            &dir,
            "root.json",
            r#"{
                "a": {"$ref": "missing.json"},
                "b": {"$ref": "broken.json"},
                "c": {"$ref": "ok.json"}
            }"#,
        );
        write_temp_file(&dir, "broken.json", "{ not json");
        write_temp_file(&dir, "ok.json", "{}");

        let err = resolve(root.as_path(), &Options::new().continue_on_error(true))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.errors().len(), 2);
        assert!(err
            .errors()
            .iter()
            .any(|e| matches!(e.error, RefError::Resolver { .. })));
        assert!(err
            .errors()
            .iter()
            .any(|e| matches!(e.error, RefError::Parser { .. })));

        match err.partial() {
            Some(Partial::Registry(registry)) => {
                assert_eq!(registry.len(), 4);
                assert_eq!(registry.values(&[]).len(), 2);
            }
            other => panic!("expected registry partial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn expired_timeout() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(&dir, "root.json", "{}");

        let err = resolve(root.as_path(), &Options::new().timeout_ms(0))
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::Timeout { timeout_ms: 0 }));
        assert_eq!(err.exit_code(), 3);
    }
}

// === HTTP ===

#[cfg(feature = "remote")]
mod http {
    use super::*;

    #[tokio::test]
    async fn remote_root_and_relative_refs() {
        let mut server = mockito::Server::new_async().await;
        let root_mock = server
            .mock("GET", "/schemas/root.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"a": {"$ref": "types.json#/a"}, "b": {"$ref": "types.json#/b"}}"#)
            .create_async()
            .await;
        let types_mock = server
            .mock("GET", "/schemas/types.json")
            .with_status(200)
            .with_body(r#"{"a": {"type": "string"}, "b": {"type": "integer"}}"#)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/schemas/root.json", server.url());
        let registry = resolve(url.as_str(), &Options::new()).await.unwrap();

        root_mock.assert_async().await;
        types_mock.assert_async().await;
        assert_eq!(registry.paths(&[PathType::Http]).len(), 2);
        assert_eq!(registry.get("types.json#/b/type").unwrap(), &json!("integer"));
    }

    #[tokio::test]
    async fn local_file_refers_to_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/name.yaml")
            .with_status(200)
            .with_body("type: string\n")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let root = write_temp_file(
            &dir,
            "root.json",
            &format!(r#"{{"name": {{"$ref": "{}/name.yaml"}}}}"#, server.url()),
        );

        let registry = resolve(root.as_path(), &Options::new()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(registry.paths(&[PathType::File]).len(), 1);
        assert_eq!(registry.paths(&[PathType::Http]).len(), 1);
        assert_eq!(registry.get("#/name/type").unwrap(), &json!("string"));
    }

    #[tokio::test]
    async fn http_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.json")
            .with_status(404)
            .create_async()
            .await;

        let url = format!("{}/missing.json", server.url());
        let err = parse(url.as_str(), &Options::new()).await.unwrap_err();
        match err {
            RefError::Resolver { code, .. } => assert_eq!(code, Some(404)),
            other => panic!("expected Resolver error, got {:?}", other),
        }
    }
}
