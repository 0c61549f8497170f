//! Guest OS catalog.
//!
//! Maps an OS key (`ubuntu22.04`, `fedora38`, ...) to the base image source
//! and the libvirt `--os-variant` tag. Config files may carry entries under
//! the current `images` key and the legacy `os_images` key; both are read and
//! merged with `images` taking precedence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// Tokens in an OS key that select the Fedora-like family.
const FEDORA_LIKE_TOKENS: &[&str] = &["fedora", "centos", "rhel", "rocky", "alma"];

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestOsSpec {
    /// Download URL or local path of the base image.
    pub url: String,

    /// libvirt OS variant tag passed to virt-install.
    pub variant: String,

    /// Login account override; defaults to the family's account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl GuestOsSpec {
    pub fn new(url: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            variant: variant.into(),
            user: None,
        }
    }
}

/// Guest OS family; selects the login account and package bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Debian,
    Fedora,
}

impl OsFamily {
    /// Detect the family from an OS key.
    pub fn detect(os_variant: &str) -> Self {
        let lower = os_variant.to_ascii_lowercase();
        if FEDORA_LIKE_TOKENS.iter().any(|t| lower.contains(t)) {
            OsFamily::Fedora
        } else {
            OsFamily::Debian
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Debian => "debian",
            OsFamily::Fedora => "fedora",
        }
    }

    /// Default account created by the distribution's cloud image.
    pub fn default_user(&self) -> &'static str {
        match self {
            OsFamily::Debian => "ubuntu",
            OsFamily::Fedora => "fedora",
        }
    }

    /// Commands that install the prerequisites for the container runtime installer.
    pub fn bootstrap_commands(&self) -> Vec<String> {
        let cmds: &[&str] = match self {
            OsFamily::Debian => &[
                "apt-get update",
                "DEBIAN_FRONTEND=noninteractive apt-get install -y ca-certificates curl",
            ],
            OsFamily::Fedora => &["dnf install -y ca-certificates curl"],
        };
        cmds.iter().map(|c| c.to_string()).collect()
    }
}

/// Merged guest OS catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<String, GuestOsSpec>,
}

impl Catalog {
    /// Built-in entries available without any config file.
    pub fn builtin() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "ubuntu22.04".to_string(),
            GuestOsSpec::new(
                "https://cloud-images.ubuntu.com/jammy/current/jammy-server-cloudimg-amd64.img",
                "ubuntu22.04",
            ),
        );
        entries.insert(
            "fedora38".to_string(),
            GuestOsSpec::new(
                "https://download.fedoraproject.org/pub/fedora/linux/releases/38/Cloud/x86_64/images/Fedora-Cloud-Base-38-1.6.x86_64.qcow2",
                "fedora38",
            ),
        );
        Self { entries }
    }

    /// Merge the legacy and current namespaces; current entries win.
    pub fn from_namespaces(
        legacy: BTreeMap<String, GuestOsSpec>,
        current: BTreeMap<String, GuestOsSpec>,
    ) -> Result<Self> {
        let mut entries = legacy;
        entries.extend(current);

        for (key, spec) in &entries {
            if spec.url.trim().is_empty() {
                return Err(ProvisionError::Configuration(format!(
                    "catalog entry {key} has an empty url"
                )));
            }
            if spec.variant.trim().is_empty() {
                return Err(ProvisionError::Configuration(format!(
                    "catalog entry {key} has an empty variant"
                )));
            }
        }

        Ok(Self { entries })
    }

    /// Overlay `other` on top of this catalog.
    pub fn overlay(mut self, other: Catalog) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn get(&self, os_variant: &str) -> Result<&GuestOsSpec> {
        self.entries.get(os_variant).ok_or_else(|| {
            ProvisionError::Configuration(format!("unknown operating system: {os_variant}"))
        })
    }

    pub fn contains(&self, os_variant: &str) -> bool {
        self.entries.contains_key(os_variant)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &GuestOsSpec)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Login account for an OS key: catalog override, else the family default.
    pub fn login_user(&self, os_variant: &str) -> String {
        self.entries
            .get(os_variant)
            .and_then(|spec| spec.user.clone())
            .unwrap_or_else(|| OsFamily::detect(os_variant).default_user().to_string())
    }
}
