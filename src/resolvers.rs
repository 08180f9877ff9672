//! Resolvers: read the raw bytes of a location.
//!
//! Resolvers are tried in ascending [`Resolver::order`] among those whose
//! [`Resolver::can_read`] accepts the file; the first successful read wins.

use async_trait::async_trait;
use url::Url;

use crate::error::RefError;
use crate::location;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (60 seconds).
#[cfg(feature = "remote")]
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of HTTP redirects followed.
#[cfg(feature = "remote")]
pub const HTTP_REDIRECTS: usize = 5;

/// A location being read or parsed.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Absolute location, without fragment.
    pub url: Url,
    /// Lowercased extension including the dot (`.json`), or empty.
    pub extension: String,
    /// Raw contents; empty until a resolver has read them.
    pub data: Vec<u8>,
}

impl FileInfo {
    pub fn new(url: Url) -> Self {
        let url = location::document(&url);
        let extension = location::extension(&url);
        Self {
            url,
            extension,
            data: Vec::new(),
        }
    }

    /// Location for messages: an OS path for `file:` URLs.
    pub fn display(&self) -> String {
        location::display(&self.url)
    }
}

/// Reads the contents of a location.
#[async_trait]
pub trait Resolver: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first.
    fn order(&self) -> u32 {
        100
    }

    fn can_read(&self, file: &FileInfo) -> bool;

    async fn read(&self, file: &FileInfo) -> Result<Vec<u8>, RefError>;
}

/// Reads `file:` locations from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileResolver;

#[async_trait]
impl Resolver for FileResolver {
    fn name(&self) -> &str {
        "file"
    }

    fn order(&self) -> u32 {
        100
    }

    fn can_read(&self, file: &FileInfo) -> bool {
        file.url.scheme() == "file"
    }

    async fn read(&self, file: &FileInfo) -> Result<Vec<u8>, RefError> {
        let path = file
            .url
            .to_file_path()
            .map_err(|()| RefError::Resolver {
                location: file.url.to_string(),
                message: "not a local file path".to_string(),
                code: None,
            })?;
        tracing::debug!("reading {}", path.display());
        tokio::fs::read(&path)
            .await
            .map_err(|source| RefError::Resolver {
                location: path.display().to_string(),
                message: source.to_string(),
                code: source.raw_os_error(),
            })
    }
}

/// Downloads `http:` and `https:` locations.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
}

#[cfg(feature = "remote")]
impl HttpResolver {
    /// Resolver with the default timeout and redirect limit.
    pub fn new() -> Result<Self, RefError> {
        Self::with_limits(HTTP_TIMEOUT, HTTP_REDIRECTS)
    }

    /// Resolver with a custom request timeout and redirect limit.
    pub fn with_limits(timeout: Duration, redirects: usize) -> Result<Self, RefError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(redirects))
            .build()
            .map_err(|source| RefError::Resolver {
                location: "http client".to_string(),
                message: source.to_string(),
                code: None,
            })?;
        Ok(Self { client })
    }
}

#[cfg(feature = "remote")]
#[async_trait]
impl Resolver for HttpResolver {
    fn name(&self) -> &str {
        "http"
    }

    fn order(&self) -> u32 {
        200
    }

    fn can_read(&self, file: &FileInfo) -> bool {
        matches!(file.url.scheme(), "http" | "https")
    }

    async fn read(&self, file: &FileInfo) -> Result<Vec<u8>, RefError> {
        let network_error = |source: reqwest::Error| RefError::Resolver {
            location: file.url.to_string(),
            message: source.to_string(),
            code: source.status().map(|status| i32::from(status.as_u16())),
        };

        tracing::debug!("downloading {}", file.url);
        let response = self
            .client
            .get(file.url.clone())
            .send()
            .await
            .map_err(network_error)?;

        // Check for HTTP errors before reading the body
        let response = response.error_for_status().map_err(network_error)?;

        let bytes = response.bytes().await.map_err(network_error)?;
        Ok(bytes.to_vec())
    }
}
