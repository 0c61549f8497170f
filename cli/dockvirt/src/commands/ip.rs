//! `dockvirt ip`.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use dockvirt_provision::{VmAddress, VmController, VmName};
use serde::Serialize;
use tracing::debug;

use crate::output::{print_json, OutputFormat};

use super::CommandContext;

/// Delay between address lookups while waiting.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Args)]
pub struct IpCommand {
    /// VM name.
    #[arg(long)]
    name: String,

    /// Keep polling up to this many seconds until an address appears.
    #[arg(long, value_name = "SECS")]
    wait: Option<u64>,
}

#[derive(Debug, Serialize)]
struct IpOutput {
    name: String,
    ip: Option<String>,
}

impl IpCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let name = VmName::parse(&self.name)?;
        let controller = ctx.controller();

        let address = match self.wait {
            Some(secs) => wait_for_address(&controller, &name, Duration::from_secs(secs)).await?,
            None => controller.resolve_address(&name).await?,
        };

        match ctx.format {
            OutputFormat::Json => print_json(&IpOutput {
                name: name.to_string(),
                ip: address.ip().map(|ip| ip.to_string()),
            }),
            OutputFormat::Table => println!("{address}"),
        }
        Ok(())
    }
}

/// Poll `resolve_address` until it yields an address or `timeout` passes.
///
/// `Unknown` after the deadline is returned as is; it is not an error.
pub async fn wait_for_address(
    controller: &VmController,
    name: &VmName,
    timeout: Duration,
) -> Result<VmAddress> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let address = controller.resolve_address(name).await?;
        if address.is_known() || tokio::time::Instant::now() + POLL_INTERVAL > deadline {
            return Ok(address);
        }
        debug!(name = %name, "No address yet, retrying");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
