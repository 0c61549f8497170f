//! Per-VM workspace directory.
//!
//! Layout under `<home>/<name>/`:
//!
//! ```text
//! user-data            cloud-config document
//! meta-data            NoCloud meta-data
//! Caddyfile            reverse proxy routing (also embedded in user-data)
//! docker-compose.yml   composition (also embedded in user-data)
//! cidata.iso           init-configuration medium
//! <name>.qcow2         copy-on-write disk
//! ```
//!
//! Workspaces are left in place after destroy for post-mortem inspection.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::Config;
use crate::error::{ProvisionError, Result};
use crate::render::RenderedDocuments;
use crate::request::VmName;

const USER_DATA: &str = "user-data";
const META_DATA: &str = "meta-data";
const CADDYFILE: &str = "Caddyfile";
const COMPOSE_FILE: &str = "docker-compose.yml";
const INIT_MEDIUM: &str = "cidata.iso";

/// Artifact directory for one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmWorkspace {
    root: PathBuf,
    name: VmName,
}

impl VmWorkspace {
    /// Workspace location for `name`; nothing is created.
    pub fn locate(config: &Config, name: &VmName) -> Self {
        Self {
            root: config.workspace_dir(name.as_str()),
            name: name.clone(),
        }
    }

    /// Create (or reuse) the workspace directory.
    pub fn create(config: &Config, name: &VmName) -> Result<Self> {
        let workspace = Self::locate(config, name);
        fs::create_dir_all(&workspace.root).map_err(|e| ProvisionError::io(&workspace.root, e))?;
        debug!(path = %workspace.root.display(), "Workspace ready");
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    pub fn user_data(&self) -> PathBuf {
        self.root.join(USER_DATA)
    }

    pub fn meta_data(&self) -> PathBuf {
        self.root.join(META_DATA)
    }

    pub fn caddyfile(&self) -> PathBuf {
        self.root.join(CADDYFILE)
    }

    pub fn compose_file(&self) -> PathBuf {
        self.root.join(COMPOSE_FILE)
    }

    pub fn init_medium(&self) -> PathBuf {
        self.root.join(INIT_MEDIUM)
    }

    pub fn disk(&self) -> PathBuf {
        self.root.join(format!("{}.qcow2", self.name))
    }

    /// Write all rendered documents.
    pub fn write_documents(&self, docs: &RenderedDocuments) -> Result<()> {
        self.write_file(&self.user_data(), &docs.user_data)?;
        self.write_file(&self.meta_data(), &docs.meta_data)?;
        self.write_file(&self.caddyfile(), &docs.caddyfile)?;
        self.write_file(&self.compose_file(), &docs.compose)?;
        Ok(())
    }

    /// Replace `path` atomically: readers see the old or the new contents.
    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(|e| ProvisionError::io(&self.root, e))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| ProvisionError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| ProvisionError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| ProvisionError::io(path, e.error))?;
        Ok(())
    }
}
