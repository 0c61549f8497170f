//! Typed builders for the external management commands.
//!
//! Each builder validates its inputs and produces an argument vector; nothing
//! is ever passed through a shell.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::Path;

use crate::error::{ProvisionError, Result};
use crate::image::DiskFormat;
use crate::request::{
    validate_identifier, validate_range, VmName, DISK_GB_RANGE, MEMORY_MB_RANGE, VCPU_RANGE,
};

/// A fully built external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypervisorCommand {
    program: String,
    verb: Option<&'static str>,
    args: Vec<OsString>,
}

impl HypervisorCommand {
    fn new(program: &str, verb: Option<&'static str>) -> Self {
        Self {
            program: program.to_string(),
            verb,
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// `program` plus its subcommand, e.g. `virsh domifaddr`.
    pub fn key(&self) -> String {
        match self.verb {
            Some(verb) => format!("{} {}", self.program, verb),
            None => self.program.clone(),
        }
    }

    /// Arguments as lossy UTF-8, for logging and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for HypervisorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Reject paths virt-install's `--disk` option syntax cannot carry.
fn disk_path_arg(what: &str, path: &Path) -> Result<String> {
    let s = path.to_str().ok_or_else(|| {
        ProvisionError::InvalidArgument(format!("{what} path {} is not UTF-8", path.display()))
    })?;
    if s.contains(',') {
        return Err(ProvisionError::InvalidArgument(format!(
            "{what} path {s:?} must not contain ','"
        )));
    }
    Ok(s.to_string())
}

/// `virsh` subcommands, optionally bound to a connection URI.
#[derive(Debug, Clone, Default)]
pub struct Virsh {
    connect_uri: Option<String>,
}

impl Virsh {
    pub fn new(connect_uri: Option<&str>) -> Self {
        Self {
            connect_uri: connect_uri.map(str::to_string),
        }
    }

    fn command(&self, verb: &'static str) -> HypervisorCommand {
        let mut cmd = HypervisorCommand::new("virsh", Some(verb));
        if let Some(uri) = &self.connect_uri {
            cmd = cmd.arg("--connect").arg(uri);
        }
        cmd.arg(verb)
    }

    /// Addresses known to the DHCP lease source.
    pub fn domifaddr_lease(&self, name: &VmName) -> HypervisorCommand {
        self.command("domifaddr")
            .arg(name.as_str())
            .arg("--source")
            .arg("lease")
    }

    pub fn domiflist(&self, name: &VmName) -> HypervisorCommand {
        self.command("domiflist").arg(name.as_str())
    }

    pub fn dumpxml(&self, name: &VmName) -> HypervisorCommand {
        self.command("dumpxml").arg(name.as_str())
    }

    pub fn net_dhcp_leases(&self, network: &str) -> Result<HypervisorCommand> {
        validate_identifier("network name", network)?;
        Ok(self.command("net-dhcp-leases").arg(network))
    }

    /// Hard stop.
    pub fn destroy(&self, name: &VmName) -> HypervisorCommand {
        self.command("destroy").arg(name.as_str())
    }

    pub fn undefine_with_storage(&self, name: &VmName) -> HypervisorCommand {
        self.command("undefine")
            .arg(name.as_str())
            .arg("--remove-all-storage")
    }

    pub fn domstate(&self, name: &VmName) -> HypervisorCommand {
        self.command("domstate").arg(name.as_str())
    }
}

/// `cloud-localds` invocation building the NoCloud seed image.
pub fn cloud_localds(iso: &Path, user_data: &Path, meta_data: &Path) -> HypervisorCommand {
    HypervisorCommand::new("cloud-localds", None)
        .arg(iso)
        .arg(user_data)
        .arg(meta_data)
}

/// `qemu-img create` for a qcow2 overlay backed by `base`.
///
/// `base` must be absolute: qemu resolves a relative backing path against
/// the overlay's directory.
pub fn qemu_img_overlay(
    base: &Path,
    base_format: DiskFormat,
    disk: &Path,
    size_gb: u32,
) -> Result<HypervisorCommand> {
    validate_range("disk (GB)", size_gb, DISK_GB_RANGE)?;
    if !base.is_absolute() {
        return Err(ProvisionError::InvalidArgument(format!(
            "backing image path {} must be absolute",
            base.display()
        )));
    }
    Ok(HypervisorCommand::new("qemu-img", Some("create"))
        .arg("create")
        .arg("-f")
        .arg("qcow2")
        .arg("-F")
        .arg(base_format.as_str())
        .arg("-b")
        .arg(base)
        .arg(disk)
        .arg(format!("{size_gb}G")))
}

/// `virt-install` in import mode.
#[derive(Debug, Clone)]
pub struct VirtInstall<'a> {
    pub connect_uri: Option<&'a str>,
    pub name: &'a VmName,
    pub memory_mb: u32,
    pub vcpus: u32,
    pub disk: &'a Path,
    pub init_medium: &'a Path,
    pub os_variant: &'a str,
    pub network: &'a str,
}

impl VirtInstall<'_> {
    pub fn build(&self) -> Result<HypervisorCommand> {
        validate_range("memory (MB)", self.memory_mb, MEMORY_MB_RANGE)?;
        validate_range("vCPU count", self.vcpus, VCPU_RANGE)?;
        validate_identifier("OS variant", self.os_variant)?;
        validate_identifier("network name", self.network)?;
        let disk = disk_path_arg("disk", self.disk)?;
        let medium = disk_path_arg("init medium", self.init_medium)?;

        let mut cmd = HypervisorCommand::new("virt-install", None);
        if let Some(uri) = self.connect_uri {
            cmd = cmd.arg("--connect").arg(uri);
        }
        Ok(cmd
            .arg("--name")
            .arg(self.name.as_str())
            .arg("--memory")
            .arg(self.memory_mb.to_string())
            .arg("--vcpus")
            .arg(self.vcpus.to_string())
            .arg("--disk")
            .arg(format!("path={disk},format=qcow2"))
            .arg("--disk")
            .arg(format!("path={medium},device=cdrom,readonly=on"))
            .arg("--os-variant")
            .arg(self.os_variant)
            .arg("--import")
            .arg("--network")
            .arg(format!("network={}", self.network))
            .arg("--noautoconsole")
            .arg("--graphics")
            .arg("none"))
    }
}
