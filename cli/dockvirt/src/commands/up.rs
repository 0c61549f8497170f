//! `dockvirt up`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use dockvirt_provision::request::{DEFAULT_DISK_GB, DEFAULT_MEMORY_MB, DEFAULT_VCPUS};
use dockvirt_provision::{
    ConventionalDiscovery, ProjectDefaults, ProjectDiscovery, ProvisioningRequest, VmAddress,
};
use serde::Serialize;

use crate::output::{print_field, print_info, print_json, print_success, OutputFormat};

use super::ip::wait_for_address;
use super::CommandContext;

#[derive(Debug, Args)]
pub struct UpCommand {
    /// VM name (default: `name` from .dockvirt).
    #[arg(long)]
    name: Option<String>,

    /// Domain the proxy serves the app on.
    #[arg(long)]
    domain: Option<String>,

    /// Container image to run.
    #[arg(long)]
    image: Option<String>,

    /// Port the container listens on.
    #[arg(long)]
    port: Option<u16>,

    /// Guest OS key from the catalog.
    #[arg(long)]
    os: Option<String>,

    /// Memory in MB.
    #[arg(long)]
    mem: Option<u32>,

    /// Disk size in GB.
    #[arg(long)]
    disk: Option<u32>,

    /// vCPU count.
    #[arg(long)]
    cpus: Option<u32>,

    /// Base image URL or path, bypassing the catalog source.
    #[arg(long)]
    base_image: Option<String>,

    /// Project directory to discover the app in.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Seconds to wait for the VM to get an address.
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    wait: u64,
}

#[derive(Debug, Serialize)]
struct UpOutput {
    name: String,
    domain: String,
    image: String,
    os: String,
    ip: Option<String>,
    workspace: String,
    base_image: String,
}

impl UpCommand {
    /// Merge flags over `.dockvirt` defaults.
    fn request(&self, defaults: ProjectDefaults, default_os: &str) -> Result<ProvisioningRequest> {
        let missing = |flag: &str| anyhow!("--{flag} is required (or set {flag}= in .dockvirt)");

        let name = self.name.clone().or(defaults.name).ok_or_else(|| missing("name"))?;
        let domain = self
            .domain
            .clone()
            .or(defaults.domain)
            .ok_or_else(|| missing("domain"))?;
        let image = self
            .image
            .clone()
            .or(defaults.image)
            .ok_or_else(|| missing("image"))?;

        let mut request = ProvisioningRequest::new(name, domain, image);
        if let Some(port) = self.port.or(defaults.port) {
            request.container_port = port;
        }
        request.os_variant = self
            .os
            .clone()
            .or(defaults.os)
            .unwrap_or_else(|| default_os.to_string());
        request.memory_mb = self.mem.or(defaults.mem).unwrap_or(DEFAULT_MEMORY_MB);
        request.disk_gb = self.disk.or(defaults.disk).unwrap_or(DEFAULT_DISK_GB);
        request.vcpus = self.cpus.or(defaults.cpus).unwrap_or(DEFAULT_VCPUS);
        request.base_image = self.base_image.clone();
        Ok(request)
    }

    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let defaults = ProjectDefaults::load(&self.dir)?;
        let request = self.request(defaults, &ctx.config.default_os)?;

        let project = ConventionalDiscovery::default()
            .collect(&self.dir)
            .with_context(|| format!("reading project files in {}", self.dir.display()))?;
        if project.is_empty() && ctx.format == OutputFormat::Table {
            print_info("No Dockerfile or app files found; the image runs as published");
        }

        let controller = ctx.controller();
        let created = controller.create(&request, &project).await?;

        let address = if self.wait > 0 {
            wait_for_address(&controller, &created.name, Duration::from_secs(self.wait)).await?
        } else {
            VmAddress::Unknown
        };

        match ctx.format {
            OutputFormat::Json => print_json(&UpOutput {
                name: created.name.to_string(),
                domain: request.domain.clone(),
                image: request.container_image.clone(),
                os: request.os_variant.clone(),
                ip: address.ip().map(|ip| ip.to_string()),
                workspace: created.workspace.root().display().to_string(),
                base_image: created.base_image.path.display().to_string(),
            }),
            OutputFormat::Table => {
                print_success(&format!("VM {} created", created.name));
                print_field("Domain", &request.domain);
                print_field("Image", &request.container_image);
                print_field("OS", &request.os_variant);
                print_field("IP", address);
                print_field("Workspace", created.workspace.root().display());
                if !address.is_known() {
                    print_info(&format!(
                        "The guest is still booting; run `dockvirt ip --name {} --wait 120`",
                        created.name
                    ));
                }
            }
        }
        Ok(())
    }
}
