//! dockvirt provisioning library
//!
//! Turns a declarative request (name, domain, container image, sizing, guest
//! OS) into a running libvirt VM that serves the container behind a Caddy
//! reverse proxy. The guest is configured entirely through cloud-init.
//!
//! ## Pipeline
//!
//! ```text
//! VmController::create
//! ├── render              (user-data, meta-data, Caddyfile, compose)
//! ├── cloud-localds       (init-configuration medium)
//! ├── ImageResolver       (cached base image, downloaded on first use)
//! ├── qemu-img create     (copy-on-write disk backed by the base image)
//! └── virt-install        (define + start)
//! ```
//!
//! Address resolution and destroy are independent operations keyed by VM
//! name. Every external tool is driven through [`hypervisor::CommandRunner`],
//! so tests substitute [`hypervisor::MockRunner`].
//!
//! ## Modules
//!
//! - `catalog`: guest OS catalog and family detection
//! - `config`: explicit configuration (home dir, catalog, libvirt URI)
//! - `hypervisor`: typed command builders, runner trait, output parsers
//! - `image`: base image resolution and download cache
//! - `lifecycle`: the VM lifecycle controller
//! - `render`: cloud-init/Caddy/compose documents and project discovery
//! - `request`: the provisioning request and its validation
//! - `workspace`: per-VM artifact directory

pub mod catalog;
pub mod config;
pub mod error;
pub mod hypervisor;
pub mod image;
pub mod lifecycle;
pub mod render;
pub mod request;
pub mod workspace;

pub use catalog::{Catalog, GuestOsSpec, OsFamily};
pub use config::{Config, ProjectDefaults};
pub use error::{ProvisionError, Result, Stage};
pub use hypervisor::{CommandOutput, CommandRunner, MockRunner, ProcessRunner, VmAddress, VmState};
pub use image::{CachedImage, DiskFormat, Fetcher, ImageFetcher, ImageResolver};
pub use lifecycle::{CreatedVm, DestroyOutcome, VmController};
pub use render::{ConventionalDiscovery, LocalProject, ProjectDiscovery, RenderedDocuments};
pub use request::{ProvisioningRequest, VmName};
pub use workspace::VmWorkspace;
