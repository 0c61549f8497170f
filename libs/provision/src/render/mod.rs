//! Guest first-boot documents.
//!
//! Produces, for one [`ProvisioningRequest`]:
//! - `user-data`: the `#cloud-config` document that bootstraps the container
//!   runtime and embeds everything below
//! - `meta-data`: NoCloud instance id and hostname
//! - `Caddyfile`: routes the request domain to the container port
//! - `docker-compose.yml`: the application service plus the proxy
//!
//! Rendering is pure: the same request, catalog and project always produce
//! byte-identical documents.

mod discovery;
mod templates;

use tracing::debug;

pub use discovery::{ConventionalDiscovery, LocalProject, ProjectDiscovery, BUILD_RECIPE};
pub use templates::{APP_NETWORK, GUEST_DIR, PROXY_IMAGE, PROXY_SERVICE};

use crate::catalog::{Catalog, OsFamily};
use crate::error::{ProvisionError, Result};
use crate::request::ProvisioningRequest;
use templates::CloudConfigInput;

/// Rendered documents for one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocuments {
    pub user_data: String,
    pub meta_data: String,
    pub caddyfile: String,
    pub compose: String,
}

/// Render all documents for `request`.
///
/// The OS family and login account come from the request's OS key; a
/// catalog entry may override the account.
pub fn render(
    request: &ProvisioningRequest,
    catalog: &Catalog,
    project: &LocalProject,
) -> Result<RenderedDocuments> {
    let family = OsFamily::detect(&request.os_variant);
    let user = catalog.login_user(&request.os_variant);
    let service = request.name.as_str();

    let caddyfile = templates::caddyfile(&request.domain, service, request.container_port)?;
    let compose = templates::compose_file(service, &request.container_image)?;

    let user_data = templates::cloud_config(&CloudConfigInput {
        hostname: service,
        image: &request.container_image,
        family,
        user: &user,
        compose: &compose,
        caddyfile: &caddyfile,
        build_recipe: project.build_recipe.as_deref(),
        app_files: &project.app_files,
    })?;
    let meta_data = templates::meta_data(service);

    for (what, doc) in [
        ("user-data", &user_data),
        ("meta-data", &meta_data),
        ("Caddyfile", &caddyfile),
        ("compose file", &compose),
    ] {
        if doc.trim().is_empty() {
            return Err(ProvisionError::Render(format!("{what} rendered empty")));
        }
    }

    debug!(
        name = %service,
        family = family.as_str(),
        user = %user,
        recipe = project.build_recipe.is_some(),
        app_files = project.app_files.len(),
        user_data_bytes = user_data.len(),
        "Rendered guest documents"
    );

    Ok(RenderedDocuments {
        user_data,
        meta_data,
        caddyfile,
        compose,
    })
}
