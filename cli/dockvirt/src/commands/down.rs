//! `dockvirt down`.

use anyhow::Result;
use clap::Args;
use dockvirt_provision::VmName;
use serde::Serialize;

use crate::output::{print_info, print_json, print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct DownCommand {
    /// VM name.
    #[arg(long)]
    name: String,
}

#[derive(Debug, Serialize)]
struct DownOutput {
    name: String,
    stopped: bool,
    workspace: String,
}

impl DownCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let name = VmName::parse(&self.name)?;
        let outcome = ctx.controller().destroy(&name).await?;
        let workspace = ctx.config.workspace_dir(name.as_str());

        match ctx.format {
            OutputFormat::Json => print_json(&DownOutput {
                name: name.to_string(),
                stopped: outcome.stopped,
                workspace: workspace.display().to_string(),
            }),
            OutputFormat::Table => {
                print_success(&format!("VM {name} destroyed"));
                if !outcome.stopped {
                    print_info("VM was not running");
                }
                if workspace.exists() {
                    print_info(&format!("Workspace kept at {}", workspace.display()));
                }
            }
        }
        Ok(())
    }
}
