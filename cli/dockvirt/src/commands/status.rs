//! `dockvirt status`.

use anyhow::Result;
use clap::Args;
use dockvirt_provision::{VmAddress, VmName, VmState};
use serde::Serialize;

use crate::output::{print_field, print_json, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// VM name.
    #[arg(long)]
    name: String,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    name: String,
    state: String,
    ip: Option<String>,
    workspace: Option<String>,
}

impl StatusCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let name = VmName::parse(&self.name)?;
        let controller = ctx.controller();

        let state = controller.state(&name).await?;
        let address = match state {
            VmState::Running => controller.resolve_address(&name).await?,
            _ => VmAddress::Unknown,
        };
        let workspace = ctx.config.workspace_dir(name.as_str());
        let workspace = workspace.is_dir().then(|| workspace.display().to_string());

        match ctx.format {
            OutputFormat::Json => print_json(&StatusOutput {
                name: name.to_string(),
                state: state.to_string(),
                ip: address.ip().map(|ip| ip.to_string()),
                workspace,
            }),
            OutputFormat::Table => {
                print_field("Name", &name);
                print_field("State", &state);
                print_field("IP", address);
                print_field("Workspace", workspace.as_deref().unwrap_or("-"));
            }
        }
        Ok(())
    }
}
