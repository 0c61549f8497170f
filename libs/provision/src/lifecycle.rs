//! VM lifecycle controller.
//!
//! `create` runs the provisioning pipeline strictly in order; each step's
//! failure aborts the rest and is reported with the [`Stage`] it happened
//! at. Completed steps are not undone: a failed create can leave a workspace
//! and a defined VM behind, and `destroy` is the way to reconcile.
//!
//! `resolve_address`, `destroy` and `state` are independent operations keyed
//! by VM name and query the hypervisor live; the controller keeps no VM
//! state of its own.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ProvisionError, Result, Stage};
use crate::hypervisor::{
    cloud_localds, first_ipv4, first_mac, lease_for_mac, qemu_img_overlay, CommandRunner,
    HypervisorCommand, VirtInstall, Virsh, VmAddress, VmState,
};
use crate::image::{CachedImage, DiskFormat, Fetcher, ImageResolver};
use crate::render::{self, LocalProject};
use crate::request::{ProvisioningRequest, VmName};
use crate::workspace::VmWorkspace;

/// stderr fragments virsh prints for a domain that does not exist.
const NO_SUCH_DOMAIN: &[&str] = &["failed to get domain", "domain not found"];

/// Result of a successful create.
#[derive(Debug, Clone)]
pub struct CreatedVm {
    pub name: VmName,
    pub workspace: VmWorkspace,
    pub base_image: CachedImage,
    pub disk: PathBuf,
    pub init_medium: PathBuf,
}

/// Result of a destroy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyOutcome {
    pub name: VmName,
    /// Whether the stop step succeeded; `false` usually means it was already stopped.
    pub stopped: bool,
}

/// Drives VMs through create, address lookup and destroy.
pub struct VmController {
    config: Config,
    runner: Arc<dyn CommandRunner>,
    resolver: ImageResolver,
    virsh: Virsh,
}

impl VmController {
    pub fn new(config: Config, runner: Arc<dyn CommandRunner>, fetcher: Arc<dyn Fetcher>) -> Self {
        let resolver = ImageResolver::new(config.cache_dir(), fetcher);
        let virsh = Virsh::new(config.connect_uri.as_deref());
        Self {
            config,
            runner,
            resolver,
            virsh,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &ImageResolver {
        &self.resolver
    }

    /// Provision and start a VM for `request`.
    pub async fn create(
        &self,
        request: &ProvisioningRequest,
        project: &LocalProject,
    ) -> Result<CreatedVm> {
        let start = Instant::now();

        let name = request.validate().map_err(|e| e.at_stage(Stage::Validate))?;
        let os_variant = self
            .os_variant_tag(request)
            .map_err(|e| e.at_stage(Stage::Validate))?;
        self.ensure_absent(&name)
            .await
            .map_err(|e| e.at_stage(Stage::Validate))?;

        info!(
            name = %name,
            domain = %request.domain,
            image = %request.container_image,
            os = %request.os_variant,
            "Creating VM"
        );

        let workspace =
            VmWorkspace::create(&self.config, &name).map_err(|e| e.at_stage(Stage::Workspace))?;

        render::render(request, &self.config.catalog, project)
            .and_then(|docs| workspace.write_documents(&docs))
            .map_err(|e| e.at_stage(Stage::Render))?;
        debug!(name = %name, path = %workspace.root().display(), "Documents written");

        let init_medium = workspace.init_medium();
        self.runner
            .run_checked(&cloud_localds(
                &init_medium,
                &workspace.user_data(),
                &workspace.meta_data(),
            ))
            .await
            .map_err(|e| e.at_stage(Stage::InitMedium))?;
        debug!(name = %name, path = %init_medium.display(), "Init medium built");

        let base_image = match &request.base_image {
            Some(source) => self.resolver.resolve_source(source).await,
            None => {
                self.resolver
                    .resolve(&request.os_variant, &self.config.catalog)
                    .await
            }
        }
        .map_err(|e| e.at_stage(Stage::BaseImage))?;

        let disk = workspace.disk();
        let base_format =
            DiskFormat::detect(&base_image.path).map_err(|e| e.at_stage(Stage::Disk))?;
        self.run_stage(
            Stage::Disk,
            qemu_img_overlay(&base_image.path, base_format, &disk, request.disk_gb),
        )
        .await?;
        debug!(
            name = %name,
            path = %disk.display(),
            backing_format = base_format.as_str(),
            size_gb = request.disk_gb,
            "Disk created"
        );

        let install = VirtInstall {
            connect_uri: self.config.connect_uri.as_deref(),
            name: &name,
            memory_mb: request.memory_mb,
            vcpus: request.vcpus,
            disk: &disk,
            init_medium: &init_medium,
            os_variant: &os_variant,
            network: &self.config.network,
        };
        self.run_stage(Stage::Define, install.build()).await?;

        info!(
            name = %name,
            base_image = %base_image.path.display(),
            cached = base_image.was_cached,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "VM created"
        );

        Ok(CreatedVm {
            name,
            workspace,
            base_image,
            disk,
            init_medium,
        })
    }

    /// Best-effort IPv4 address of a VM.
    ///
    /// Tries the lease-source address query first, then looks up the VM's
    /// MAC address in the network's DHCP lease table. `Unknown` is a normal
    /// answer while the guest boots; callers that need an address poll.
    pub async fn resolve_address(&self, name: &VmName) -> Result<VmAddress> {
        let lease = self.query(&self.virsh.domifaddr_lease(name)).await?;
        if let Some(ip) = first_ipv4(&lease) {
            debug!(name = %name, ip = %ip, "Address from lease source");
            return Ok(VmAddress::Known(ip));
        }

        let mac = match first_mac(&self.query(&self.virsh.domiflist(name)).await?) {
            Some(mac) => Some(mac),
            None => first_mac(&self.query(&self.virsh.dumpxml(name)).await?),
        };
        let Some(mac) = mac else {
            debug!(name = %name, "No interface MAC found");
            return Ok(VmAddress::Unknown);
        };

        let leases = self
            .query(&self.virsh.net_dhcp_leases(&self.config.network)?)
            .await?;
        match lease_for_mac(&leases, &mac) {
            Some(ip) => {
                debug!(name = %name, mac = %mac, ip = %ip, "Address from lease table");
                Ok(VmAddress::Known(ip))
            }
            None => {
                debug!(name = %name, mac = %mac, "No lease for MAC yet");
                Ok(VmAddress::Unknown)
            }
        }
    }

    /// Stop the VM and remove its definition and storage.
    ///
    /// A failed stop (typically: already stopped) is logged and does not
    /// prevent the undefine. The workspace directory is left in place.
    pub async fn destroy(&self, name: &VmName) -> Result<DestroyOutcome> {
        info!(name = %name, "Destroying VM");

        let stopped = match self.runner.run(&self.virsh.destroy(name)).await {
            Ok(out) if out.is_success() => true,
            Ok(out) => {
                warn!(
                    name = %name,
                    exit_code = ?out.exit_code,
                    stderr = %out.stderr.trim(),
                    "Stop failed, continuing with undefine"
                );
                false
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Stop failed, continuing with undefine");
                false
            }
        };

        self.runner
            .run_checked(&self.virsh.undefine_with_storage(name))
            .await?;

        info!(name = %name, stopped, "VM destroyed");
        Ok(DestroyOutcome {
            name: name.clone(),
            stopped,
        })
    }

    /// Live hypervisor state of a VM; `Absent` if it is not defined.
    pub async fn state(&self, name: &VmName) -> Result<VmState> {
        let cmd = self.virsh.domstate(name);
        let out = self.runner.run(&cmd).await?;
        if out.is_success() {
            return Ok(VmState::parse(&out.stdout));
        }

        let stderr = out.stderr.to_ascii_lowercase();
        if NO_SUCH_DOMAIN.iter().any(|s| stderr.contains(s)) {
            return Ok(VmState::Absent);
        }
        Err(ProvisionError::Hypervisor {
            command: cmd.to_string(),
            exit_code: out.exit_code,
            stderr: out.stderr,
        })
    }

    /// virt-install `--os-variant` tag: the catalog's, else the OS key itself.
    fn os_variant_tag(&self, request: &ProvisioningRequest) -> Result<String> {
        match (&request.base_image, self.config.catalog.get(&request.os_variant)) {
            (_, Ok(spec)) => Ok(spec.variant.clone()),
            (Some(_), Err(_)) => Ok(request.os_variant.clone()),
            (None, Err(e)) => Err(e),
        }
    }

    /// Refuse to reuse a live VM's name.
    async fn ensure_absent(&self, name: &VmName) -> Result<()> {
        match self.state(name).await? {
            VmState::Absent => Ok(()),
            state => Err(ProvisionError::InvalidArgument(format!(
                "a VM named {name} already exists ({state})"
            ))),
        }
    }

    async fn run_stage(&self, stage: Stage, cmd: Result<HypervisorCommand>) -> Result<()> {
        let cmd = cmd.map_err(|e| e.at_stage(stage))?;
        self.runner
            .run_checked(&cmd)
            .await
            .map_err(|e| e.at_stage(stage))?;
        Ok(())
    }

    /// Run a read-only query; a non-zero exit counts as empty output.
    async fn query(&self, cmd: &HypervisorCommand) -> Result<String> {
        let out = self.runner.run(cmd).await?;
        if out.is_success() {
            Ok(out.stdout)
        } else {
            debug!(
                command = %cmd,
                exit_code = ?out.exit_code,
                stderr = %out.stderr.trim(),
                "Query failed, treating as empty"
            );
            Ok(String::new())
        }
    }
}
