//! libvirt and disk tooling interface.
//!
//! All hypervisor interaction goes through command-line tools:
//! `virt-install`, `virsh`, `qemu-img` and `cloud-localds`.
//!
//! ## Components
//!
//! - `command`: typed, validating argument-vector builders
//! - `runner`: `CommandRunner` trait and the process-spawning implementation
//! - `mock`: scripted runner for tests
//! - `parse`: parsers for virsh tables and XML

mod command;
mod mock;
mod parse;
mod runner;

pub use command::{cloud_localds, qemu_img_overlay, HypervisorCommand, VirtInstall, Virsh};
pub use mock::MockRunner;
pub use parse::{first_ipv4, first_mac, lease_for_mac, VmAddress, VmState};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};
