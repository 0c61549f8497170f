//! Configuration for the provisioning pipeline.
//!
//! Handles:
//! - The dockvirt home directory (workspaces and image cache)
//! - The guest OS catalog from `config.yaml`
//! - libvirt connection URI and network name
//! - Per-project defaults from a `.dockvirt` file

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::Deserialize;
use tracing::debug;

use crate::catalog::{Catalog, GuestOsSpec};
use crate::error::{ProvisionError, Result};

/// Config file name inside the home directory.
pub(crate) const CONFIG_FILE: &str = "config.yaml";

/// Image cache directory name inside the home directory.
pub(crate) const CACHE_DIR: &str = "images";

/// Project defaults file name.
const PROJECT_FILE: &str = ".dockvirt";

/// Default libvirt network.
const DEFAULT_NETWORK: &str = "default";

/// Default OS key.
const DEFAULT_OS: &str = "ubuntu22.04";

/// Provisioning configuration. Built once and passed to the controller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for workspaces and the image cache (`~/.dockvirt`).
    pub home: PathBuf,

    /// libvirt connection URI; `None` uses the tools' own default.
    pub connect_uri: Option<String>,

    /// libvirt network VMs attach to.
    pub network: String,

    /// OS key used when a request does not name one.
    pub default_os: String,

    /// Merged guest OS catalog.
    pub catalog: Catalog,
}

/// On-disk shape of `config.yaml`.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    images: BTreeMap<String, GuestOsSpec>,

    #[serde(default)]
    os_images: BTreeMap<String, GuestOsSpec>,

    default_os: Option<String>,

    connect_uri: Option<String>,

    network: Option<String>,
}

impl Config {
    /// Config rooted at `home` with built-in defaults only.
    ///
    /// A relative `home` is made absolute against the current directory;
    /// qemu resolves relative backing paths against the overlay instead.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let home = std::path::absolute(&home).unwrap_or(home);
        Self {
            home,
            connect_uri: None,
            network: DEFAULT_NETWORK.to_string(),
            default_os: DEFAULT_OS.to_string(),
            catalog: Catalog::builtin(),
        }
    }

    /// Load configuration from the environment and `config.yaml`.
    ///
    /// Precedence: built-in defaults, then the config file, then
    /// `DOCKVIRT_HOME` / `LIBVIRT_DEFAULT_URI` / `DOCKVIRT_NETWORK`.
    pub fn load() -> Result<Self> {
        let home = match std::env::var("DOCKVIRT_HOME") {
            Ok(home) if !home.is_empty() => PathBuf::from(home),
            _ => default_home()?,
        };

        let mut config = Self::load_from(home)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load `config.yaml` from `home`, if present, over the built-in defaults.
    pub fn load_from(home: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::with_home(home);
        let path = config.config_path();

        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(config);
        }

        let contents = fs::read_to_string(&path).map_err(|e| ProvisionError::io(&path, e))?;
        config.merge_yaml(&contents)?;
        debug!(
            path = %path.display(),
            images = config.catalog.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Merge a `config.yaml` document into this config.
    pub fn merge_yaml(&mut self, contents: &str) -> Result<()> {
        let file: ConfigFile = if contents.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(contents).map_err(|e| {
                ProvisionError::Configuration(format!("malformed {CONFIG_FILE}: {e}"))
            })?
        };

        let user_catalog = Catalog::from_namespaces(file.os_images, file.images)?;
        self.catalog = std::mem::take(&mut self.catalog).overlay(user_catalog);

        if let Some(os) = file.default_os {
            self.default_os = os;
        }
        if let Some(uri) = file.connect_uri {
            self.connect_uri = Some(uri);
        }
        if let Some(network) = file.network {
            self.network = network;
        }
        Ok(())
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(uri) = lookup("LIBVIRT_DEFAULT_URI").filter(|v| !v.is_empty()) {
            self.connect_uri = Some(uri);
        }
        if let Some(network) = lookup("DOCKVIRT_NETWORK").filter(|v| !v.is_empty()) {
            self.network = network;
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join(CONFIG_FILE)
    }

    /// Base image cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join(CACHE_DIR)
    }

    /// Workspace directory for a VM.
    pub fn workspace_dir(&self, name: &str) -> PathBuf {
        self.home.join(name)
    }
}

fn default_home() -> Result<PathBuf> {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".dockvirt"))
        .ok_or_else(|| ProvisionError::Configuration("could not determine home directory".into()))
}

/// Defaults read from a project's `.dockvirt` file.
///
/// The file holds `key=value` lines; `#` starts a comment. Unknown keys are
/// ignored so projects can carry settings for other tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectDefaults {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub image: Option<String>,
    pub port: Option<u16>,
    pub os: Option<String>,
    pub mem: Option<u32>,
    pub disk: Option<u32>,
    pub cpus: Option<u32>,
}

impl ProjectDefaults {
    /// Read `.dockvirt` from `dir`; a missing file yields empty defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PROJECT_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path).map_err(|e| ProvisionError::io(&path, e))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut defaults = Self::default();

        for (lineno, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ProvisionError::Configuration(format!(
                    "{PROJECT_FILE} line {}: expected key=value",
                    lineno + 1
                )));
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"').to_string();

            match key {
                "name" => defaults.name = Some(value),
                "domain" => defaults.domain = Some(value),
                "image" => defaults.image = Some(value),
                "os" => defaults.os = Some(value),
                "port" => defaults.port = Some(parse_number(key, &value)?),
                "mem" => defaults.mem = Some(parse_number(key, &value)?),
                "disk" => defaults.disk = Some(parse_number(key, &value)?),
                "cpus" => defaults.cpus = Some(parse_number(key, &value)?),
                _ => {}
            }
        }

        Ok(defaults)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        ProvisionError::Configuration(format!("{PROJECT_FILE}: {key}={value} is not a number"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::with_home("/tmp/dv");
        assert_eq!(config.network, "default");
        assert_eq!(config.default_os, "ubuntu22.04");
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/dv/images"));
        assert_eq!(config.workspace_dir("demo"), PathBuf::from("/tmp/dv/demo"));
        assert!(config.catalog.contains("fedora38"));
    }

    #[test]
    fn test_relative_home_is_made_absolute() {
        let config = Config::with_home("dvhome");
        assert!(config.home.is_absolute());
        assert!(config.home.ends_with("dvhome"));
        assert!(config.cache_dir().is_absolute());
    }

    #[test]
    fn test_merge_yaml_both_namespaces() {
        let mut config = Config::with_home("/tmp/dv");
        config
            .merge_yaml(
                r#"
default_os: fedora38
network: lab
os_images:
  ubuntu22.04:
    url: https://legacy.example/jammy.img
    variant: ubuntu22.04
  alpine:
    url: /srv/alpine.qcow2
    variant: alpinelinux3.18
images:
  ubuntu22.04:
    url: https://mirror.example/jammy.img
    variant: ubuntu22.04
"#,
            )
            .unwrap();

        assert_eq!(config.default_os, "fedora38");
        assert_eq!(config.network, "lab");
        assert_eq!(
            config.catalog.get("ubuntu22.04").unwrap().url,
            "https://mirror.example/jammy.img"
        );
        assert_eq!(config.catalog.get("alpine").unwrap().url, "/srv/alpine.qcow2");
        // Built-ins not mentioned in the file are kept.
        assert!(config.catalog.contains("fedora38"));
    }

    #[test]
    fn test_malformed_yaml() {
        let mut config = Config::with_home("/tmp/dv");
        let err = config.merge_yaml("images: [not, a, map]").unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration(_)));
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.catalog, Catalog::builtin());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "connect_uri: qemu:///system\n",
        )
        .unwrap();

        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.connect_uri.as_deref(), Some("qemu:///system"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::with_home("/tmp/dv");
        config.apply_overrides(|key| match key {
            "LIBVIRT_DEFAULT_URI" => Some("qemu:///session".to_string()),
            "DOCKVIRT_NETWORK" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.connect_uri.as_deref(), Some("qemu:///session"));
        assert_eq!(config.network, "default");
    }

    #[test]
    fn test_project_defaults_parse() {
        let defaults = ProjectDefaults::parse(
            "# static site\nname=static-site\ndomain = static-site.dockvirt.dev\nimage=nginx:alpine\nport=80\nos=fedora38\nunknown=1\n",
        )
        .unwrap();

        assert_eq!(defaults.name.as_deref(), Some("static-site"));
        assert_eq!(defaults.domain.as_deref(), Some("static-site.dockvirt.dev"));
        assert_eq!(defaults.image.as_deref(), Some("nginx:alpine"));
        assert_eq!(defaults.port, Some(80));
        assert_eq!(defaults.os.as_deref(), Some("fedora38"));
        assert_eq!(defaults.mem, None);
    }

    #[test]
    fn test_project_defaults_errors() {
        assert!(ProjectDefaults::parse("port=eighty").is_err());
        assert!(ProjectDefaults::parse("just-a-word").is_err());
    }

    #[test]
    fn test_project_defaults_missing_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            ProjectDefaults::load(dir.path()).unwrap(),
            ProjectDefaults::default()
        );
    }
}
