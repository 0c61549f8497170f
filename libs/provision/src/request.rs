//! Provisioning request and argument validation.
//!
//! Every value that ends up on an external command line is validated here
//! first, so the command builders never see free-form input.

use std::fmt;

use crate::config::{CACHE_DIR, CONFIG_FILE};
use crate::error::{ProvisionError, Result};
use crate::render::PROXY_SERVICE;

pub const DEFAULT_CONTAINER_PORT: u16 = 8000;
pub const DEFAULT_MEMORY_MB: u32 = 4096;
pub const DEFAULT_DISK_GB: u32 = 20;
pub const DEFAULT_VCPUS: u32 = 2;

pub const MEMORY_MB_RANGE: (u32, u32) = (256, 1024 * 1024);
pub const DISK_GB_RANGE: (u32, u32) = (1, 65536);
pub const VCPU_RANGE: (u32, u32) = (1, 256);

const MAX_NAME_LEN: usize = 64;
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// VM names that collide with fixed entries of the dockvirt home or the
/// compose file.
const RESERVED_NAMES: &[&str] = &[CACHE_DIR, CONFIG_FILE, PROXY_SERVICE];

/// A validated VM (libvirt domain) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VmName(String);

impl VmName {
    /// Validate a name: 1-64 chars of `[A-Za-z0-9._-]`, starting alphanumeric.
    pub fn parse(raw: &str) -> Result<Self> {
        validate_identifier("VM name", raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VmName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate a libvirt-style identifier (domain, network, OS variant tag).
pub fn validate_identifier(what: &str, raw: &str) -> Result<()> {
    if raw.is_empty() || raw.len() > MAX_NAME_LEN {
        return Err(ProvisionError::InvalidArgument(format!(
            "{what} must be 1-{MAX_NAME_LEN} characters, got {:?}",
            raw
        )));
    }
    let mut chars = raw.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !first_ok || !rest_ok {
        return Err(ProvisionError::InvalidArgument(format!(
            "{what} {raw:?} may only contain letters, digits, '.', '_' and '-' and must start with a letter or digit"
        )));
    }
    Ok(())
}

/// Validate a DNS name used for routing.
pub fn validate_domain(raw: &str) -> Result<()> {
    let invalid = |reason: &str| {
        ProvisionError::InvalidArgument(format!("domain {raw:?} is invalid: {reason}"))
    };

    if raw.is_empty() || raw.len() > MAX_DOMAIN_LEN {
        return Err(invalid("must be 1-253 characters"));
    }
    for label in raw.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(invalid("labels must be 1-63 characters"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("labels may only contain letters, digits and '-'"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("labels may not start or end with '-'"));
        }
    }
    Ok(())
}

/// Validate a container image reference.
pub fn validate_image_ref(raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(ProvisionError::InvalidArgument(
            "container image must not be empty".into(),
        ));
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ProvisionError::InvalidArgument(format!(
            "container image {raw:?} must not contain whitespace"
        )));
    }
    if raw.starts_with('-') {
        return Err(ProvisionError::InvalidArgument(format!(
            "container image {raw:?} must not start with '-'"
        )));
    }
    Ok(())
}

/// Check `value` lies within `range` (inclusive).
pub fn validate_range(what: &str, value: u32, range: (u32, u32)) -> Result<()> {
    let (min, max) = range;
    if value < min || value > max {
        return Err(ProvisionError::InvalidArgument(format!(
            "{what} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

/// Immutable description of the VM to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    /// VM name; unique among live VMs.
    pub name: String,

    /// DNS name the reverse proxy routes to the container.
    pub domain: String,

    /// Container image reference.
    pub container_image: String,

    /// Port the container listens on.
    pub container_port: u16,

    pub memory_mb: u32,

    pub disk_gb: u32,

    pub vcpus: u32,

    /// Catalog key of the guest OS.
    pub os_variant: String,

    /// Base image URL or path overriding the catalog source.
    pub base_image: Option<String>,
}

impl ProvisioningRequest {
    /// Request with default sizing, guest OS and port.
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        container_image: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            container_image: container_image.into(),
            container_port: DEFAULT_CONTAINER_PORT,
            memory_mb: DEFAULT_MEMORY_MB,
            disk_gb: DEFAULT_DISK_GB,
            vcpus: DEFAULT_VCPUS,
            os_variant: "ubuntu22.04".to_string(),
            base_image: None,
        }
    }

    /// Validate every field; returns the validated VM name.
    pub fn validate(&self) -> Result<VmName> {
        let name = VmName::parse(&self.name)?;
        if RESERVED_NAMES
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name.as_str()))
        {
            return Err(ProvisionError::InvalidArgument(format!(
                "VM name {name:?} is reserved",
                name = name.as_str()
            )));
        }
        validate_domain(&self.domain)?;
        validate_image_ref(&self.container_image)?;
        if self.container_port == 0 {
            return Err(ProvisionError::InvalidArgument(
                "container port must be between 1 and 65535".into(),
            ));
        }
        validate_range("memory (MB)", self.memory_mb, MEMORY_MB_RANGE)?;
        validate_range("disk (GB)", self.disk_gb, DISK_GB_RANGE)?;
        validate_range("vCPU count", self.vcpus, VCPU_RANGE)?;
        validate_identifier("OS variant", &self.os_variant)?;
        if let Some(base) = &self.base_image {
            if base.trim().is_empty() {
                return Err(ProvisionError::InvalidArgument(
                    "base image override must not be empty".into(),
                ));
            }
        }
        Ok(name)
    }
}
