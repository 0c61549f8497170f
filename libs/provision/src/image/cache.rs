//! Base image resolution and caching.
//!
//! Cached images live directly under the cache root, named after the source
//! URL's basename. A file with the final name is only ever produced by an
//! atomic rename of a completed transfer, so its presence means the image is
//! complete. Cached images are never written to; VM disks are qcow2 overlays.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::fetch::{Fetcher, ImageSource};
use crate::catalog::Catalog;
use crate::error::{ProvisionError, Result};

/// Suffixes recognised as disk images.
const IMAGE_SUFFIXES: &[&str] = &[".qcow2", ".img"];

/// Suffix appended to names without a recognised one.
const DEFAULT_SUFFIX: &str = ".qcow2";

/// Prefix/suffix of in-progress downloads.
const PARTIAL_PREFIX: &str = ".";
const PARTIAL_SUFFIX: &str = ".partial";

/// Leading bytes of every qcow2 image.
const QCOW2_MAGIC: &[u8; 4] = b"QFI\xfb";

/// On-disk format of a base image, as passed to `qemu-img -F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskFormat {
    Qcow2,
    Raw,
}

impl DiskFormat {
    /// Detect the format from the file header; anything not qcow2 is raw.
    pub fn detect(path: &Path) -> Result<Self> {
        let mut file = fs::File::open(path).map_err(|e| ProvisionError::io(path, e))?;
        let mut magic = [0u8; 4];
        let mut read = 0;
        while read < magic.len() {
            let n = file
                .read(&mut magic[read..])
                .map_err(|e| ProvisionError::io(path, e))?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(if &magic == QCOW2_MAGIC {
            DiskFormat::Qcow2
        } else {
            DiskFormat::Raw
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Raw => "raw",
        }
    }
}

/// A resolved base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    /// Path of the cached image.
    pub path: PathBuf,

    /// Source URL or path it came from.
    pub source: String,

    /// Whether the image was already cached.
    pub was_cached: bool,
}

/// Deterministic cache file name for a source URL or path.
pub fn cache_file_name(source: &str) -> Result<String> {
    let parsed = ImageSource::parse(source)?;
    let mut name = parsed.basename().ok_or_else(|| {
        ProvisionError::Configuration(format!("image source {source:?} does not name a file"))
    })?;

    if name.starts_with('.') {
        return Err(ProvisionError::Configuration(format!(
            "image source {source:?} names a hidden file"
        )));
    }
    if !IMAGE_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        name.push_str(DEFAULT_SUFFIX);
    }
    Ok(name)
}

/// Resolves guest OS keys to local base images, downloading on first use.
///
/// Concurrent first resolutions of the same image within one process are
/// collapsed into a single download.
pub struct ImageResolver {
    cache_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    /// Per-file locks so only one task downloads a given image.
    fetch_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ImageResolver {
    pub fn new(cache_dir: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            fetcher,
            fetch_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolve a catalog OS key to a local base image.
    pub async fn resolve(&self, os_variant: &str, catalog: &Catalog) -> Result<CachedImage> {
        let spec = catalog.get(os_variant)?;
        self.resolve_source(&spec.url).await
    }

    /// Resolve an explicit source URL or path to a local base image.
    pub async fn resolve_source(&self, source: &str) -> Result<CachedImage> {
        let file_name = cache_file_name(source)?;
        let path = self.cache_dir.join(&file_name);

        if path.is_file() {
            debug!(path = %path.display(), "Base image cache hit");
            return Ok(CachedImage {
                path,
                source: source.to_string(),
                was_cached: true,
            });
        }

        let lock = self.fetch_lock(&file_name).await;
        let _guard = lock.lock().await;

        // Another task may have finished the download while we waited.
        if path.is_file() {
            debug!(path = %path.display(), "Base image cached by concurrent fetch");
            return Ok(CachedImage {
                path,
                source: source.to_string(),
                was_cached: true,
            });
        }

        fs::create_dir_all(&self.cache_dir).map_err(|e| ProvisionError::io(&self.cache_dir, e))?;

        let start = Instant::now();
        let partial = tempfile::Builder::new()
            .prefix(&format!("{PARTIAL_PREFIX}{file_name}"))
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(&self.cache_dir)
            .map_err(|e| ProvisionError::io(&self.cache_dir, e))?;

        info!(source = %source, path = %path.display(), "Fetching base image");

        // Dropping `partial` on error removes the incomplete file.
        let bytes = self.fetcher.fetch(source, partial.path()).await?;

        // qemu may run as a different user under qemu:///system.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(partial.path(), fs::Permissions::from_mode(0o644))
                .map_err(|e| ProvisionError::io(partial.path(), e))?;
        }

        partial
            .persist(&path)
            .map_err(|e| ProvisionError::io(&path, e.error))?;

        info!(
            path = %path.display(),
            bytes = bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Base image cached"
        );

        Ok(CachedImage {
            path,
            source: source.to_string(),
            was_cached: false,
        })
    }

    /// Completed images in the cache, sorted by name.
    pub fn list_cached(&self) -> Result<Vec<PathBuf>> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }

        let io_err = |e| ProvisionError::io(&self.cache_dir, e);
        let mut images = Vec::new();
        for entry in fs::read_dir(&self.cache_dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let path = entry.path();
            let is_partial = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(PARTIAL_PREFIX))
                .unwrap_or(true);
            if path.is_file() && !is_partial {
                images.push(path);
            }
        }
        images.sort();
        Ok(images)
    }

    async fn fetch_lock(&self, file_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.fetch_locks.lock().await;
        locks
            .entry(file_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
