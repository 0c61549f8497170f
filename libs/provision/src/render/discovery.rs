//! Local project discovery.
//!
//! Finds what the guest needs to run the application: either a container
//! build recipe, or (as a best-effort fallback) a handful of conventional
//! application files. This is a heuristic, not a build system.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{ProvisionError, Result};

/// Container build recipe file name.
pub const BUILD_RECIPE: &str = "Dockerfile";

/// Conventional application files collected when no recipe exists.
const CONVENTIONAL_FILES: &[&str] = &[
    "index.html",
    "index.php",
    "app.py",
    "server.js",
    "main.py",
    "requirements.txt",
    "package.json",
    "composer.json",
    "nginx.conf",
    "apache.conf",
    "default.conf",
];

/// Conventional asset directories collected recursively.
const CONVENTIONAL_DIRS: &[&str] = &["static", "templates", "public", "www", "html"];

/// Application artifacts found in the invocation directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalProject {
    /// Contents of the container build recipe, if present.
    pub build_recipe: Option<String>,

    /// Relative path (`/`-separated) to file contents.
    pub app_files: BTreeMap<String, String>,
}

impl LocalProject {
    pub fn is_empty(&self) -> bool {
        self.build_recipe.is_none() && self.app_files.is_empty()
    }
}

/// Strategy for collecting project files.
pub trait ProjectDiscovery: Send + Sync {
    fn collect(&self, dir: &Path) -> Result<LocalProject>;
}

/// Discovers the build recipe, or falls back to conventional file names.
#[derive(Debug, Clone)]
pub struct ConventionalDiscovery {
    files: Vec<String>,
    dirs: Vec<String>,
}

impl Default for ConventionalDiscovery {
    fn default() -> Self {
        Self {
            files: CONVENTIONAL_FILES.iter().map(|s| s.to_string()).collect(),
            dirs: CONVENTIONAL_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ConventionalDiscovery {
    pub fn new(files: Vec<String>, dirs: Vec<String>) -> Self {
        Self { files, dirs }
    }
}

impl ProjectDiscovery for ConventionalDiscovery {
    fn collect(&self, dir: &Path) -> Result<LocalProject> {
        let recipe_path = dir.join(BUILD_RECIPE);
        if recipe_path.is_file() {
            info!(path = %recipe_path.display(), "Found build recipe");
            let recipe = fs::read_to_string(&recipe_path)
                .map_err(|e| ProvisionError::io(&recipe_path, e))?;
            return Ok(LocalProject {
                build_recipe: Some(recipe),
                app_files: BTreeMap::new(),
            });
        }

        let mut app_files = BTreeMap::new();

        for name in &self.files {
            let path = dir.join(name);
            if path.is_file() {
                if let Some(contents) = read_text(&path)? {
                    debug!(file = %name, "Found app file");
                    app_files.insert(name.clone(), contents);
                }
            }
        }

        for name in &self.dirs {
            let root = dir.join(name);
            if !root.is_dir() {
                continue;
            }
            debug!(dir = %name, "Found app directory");
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    let path = e.path().unwrap_or(&root).to_path_buf();
                    ProvisionError::io(path, io::Error::from(e))
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(relative) = relative_slash_path(dir, entry.path()) else {
                    continue;
                };
                if let Some(contents) = read_text(entry.path())? {
                    app_files.insert(relative, contents);
                }
            }
        }

        info!(count = app_files.len(), "Collected app files");
        Ok(LocalProject {
            build_recipe: None,
            app_files,
        })
    }
}

/// Read a file as UTF-8; binary files are skipped.
fn read_text(path: &Path) -> Result<Option<String>> {
    let bytes = fs::read(path).map_err(|e| ProvisionError::io(path, e))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(Some(text)),
        Err(_) => {
            warn!(path = %path.display(), "Skipping non-UTF-8 file");
            Ok(None)
        }
    }
}

fn relative_slash_path(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Option<Vec<&str>> = relative.iter().map(|c| c.to_str()).collect();
    Some(parts?.join("/"))
}
