//! Error display for the CLI.

use colored::Colorize;
use dockvirt_provision::{ProvisionError, Stage};

/// Print an error, with the failing tool's output verbatim and a hint where
/// one applies.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let Some(provision_err) = err.downcast_ref::<ProvisionError>() else {
        return;
    };

    if let ProvisionError::Hypervisor {
        command,
        exit_code,
        stderr,
    } = provision_err.root()
    {
        if !stderr.trim().is_empty() {
            eprintln!("\n{} {}", "Command:".bold(), command);
            eprintln!("{}", stderr.trim_end());
        }
        if exit_code.is_none() {
            eprintln!(
                "\n{}",
                "Hint: check that libvirt, virt-install, qemu-img and cloud-localds are installed."
                    .yellow()
            );
        }
    }

    match provision_err.stage() {
        Some(Stage::Validate) | None => {}
        Some(_) => eprintln!(
            "\n{}",
            "Hint: partial artifacts were left in place; run `dockvirt down --name <name>` to clean up."
                .yellow()
        ),
    }

    if let ProvisionError::Configuration(msg) = provision_err.root() {
        if msg.starts_with("unknown operating system") {
            eprintln!(
                "\n{}",
                "Hint: run `dockvirt images` to list the configured operating systems.".yellow()
            );
        }
    }
}
