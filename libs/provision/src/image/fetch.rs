//! Base image transfer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};

/// Transfers a base image from its source to a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Write the full contents of `source` to `dest`, returning the byte count.
    ///
    /// On error `dest` may hold partial data; the caller discards it.
    async fn fetch(&self, source: &str, dest: &Path) -> Result<u64>;
}

/// Where a base image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Remote(Url),
    Local(PathBuf),
}

impl ImageSource {
    /// Classify a catalog `url` value: http(s) URL, `file://` URL or plain path.
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |detail: String| {
            ProvisionError::Configuration(format!("invalid image source {source:?}: {detail}"))
        };

        if !source.contains("://") {
            return Ok(ImageSource::Local(PathBuf::from(source)));
        }

        let url = Url::parse(source).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(ImageSource::Remote(url)),
            "file" => url
                .to_file_path()
                .map(ImageSource::Local)
                .map_err(|_| invalid("not a local file URL".to_string())),
            other => Err(invalid(format!("unsupported scheme {other}"))),
        }
    }

    /// Final path component of the source.
    pub fn basename(&self) -> Option<String> {
        match self {
            ImageSource::Remote(url) => url
                .path_segments()
                .and_then(|segments| segments.last())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ImageSource::Local(path) => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string),
        }
    }
}

/// Fetcher for HTTP(S) URLs (streamed) and local files (copied).
#[derive(Debug, Clone, Default)]
pub struct ImageFetcher {
    client: reqwest::Client,
}

impl ImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn download(&self, source: &str, url: Url, dest: &Path) -> Result<u64> {
        let failed = |detail: String| ProvisionError::Download {
            source_url: source.to_string(),
            detail,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| failed(e.to_string()))?;

        info!(
            source = %source,
            content_length = ?response.content_length(),
            "Downloading base image"
        );

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ProvisionError::io(dest, e))?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| failed(format!("transfer interrupted: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ProvisionError::io(dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| ProvisionError::io(dest, e))?;
        file.sync_all()
            .await
            .map_err(|e| ProvisionError::io(dest, e))?;

        Ok(written)
    }
}

#[async_trait]
impl Fetcher for ImageFetcher {
    async fn fetch(&self, source: &str, dest: &Path) -> Result<u64> {
        match ImageSource::parse(source)? {
            ImageSource::Remote(url) => self.download(source, url, dest).await,
            ImageSource::Local(path) => {
                debug!(source = %path.display(), "Copying local base image");
                tokio::fs::copy(&path, dest)
                    .await
                    .map_err(|e| ProvisionError::Download {
                        source_url: source.to_string(),
                        detail: e.to_string(),
                    })
            }
        }
    }
}
