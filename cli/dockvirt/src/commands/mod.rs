//! CLI commands.

mod down;
mod images;
mod ip;
mod status;
mod up;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dockvirt_provision::{Config, ImageFetcher, ProcessRunner, VmController};

use crate::output::OutputFormat;

/// dockvirt - run a containerized app in its own libvirt VM.
#[derive(Debug, Parser)]
#[command(name = "dockvirt")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create and start a VM running the app in the current directory.
    Up(up::UpCommand),

    /// Stop a VM and remove its definition and storage.
    Down(down::DownCommand),

    /// Show a VM's IP address.
    Ip(ip::IpCommand),

    /// Show a VM's state and address.
    Status(status::StatusCommand),

    /// List configured operating systems and cached base images.
    Images(images::ImagesCommand),
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let config = Config::load()?;
        let ctx = CommandContext {
            config,
            format: self.format,
        };

        match self.command {
            Commands::Up(cmd) => cmd.run(ctx).await,
            Commands::Down(cmd) => cmd.run(ctx).await,
            Commands::Ip(cmd) => cmd.run(ctx).await,
            Commands::Status(cmd) => cmd.run(ctx).await,
            Commands::Images(cmd) => cmd.run(ctx).await,
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Controller driving the real libvirt tools.
    pub fn controller(&self) -> VmController {
        VmController::new(
            self.config.clone(),
            Arc::new(ProcessRunner::new()),
            Arc::new(ImageFetcher::new()),
        )
    }
}
