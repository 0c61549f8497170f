//! Document templates: Caddyfile, compose file, cloud-config.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use indoc::formatdoc;
use serde::Serialize;

use crate::catalog::OsFamily;
use crate::error::{ProvisionError, Result};

/// Guest directory holding the rendered documents and app tree.
pub const GUEST_DIR: &str = "/opt/dockvirt";

/// Reverse proxy container image.
pub const PROXY_IMAGE: &str = "caddy:2-alpine";

/// Docker network shared by the app and the proxy.
pub const APP_NETWORK: &str = "dockvirt";

/// Installs the container runtime and compose plugin on both families.
const RUNTIME_INSTALLER: &str = "curl -fsSL https://get.docker.com | sh";

/// Reject values that would break out of a Caddyfile token.
fn caddy_token(what: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '"' | '#'))
    {
        return Err(ProvisionError::Render(format!(
            "{what} {value:?} cannot be used in the proxy config"
        )));
    }
    Ok(())
}

/// Reverse proxy routing `domain` to `service:port`.
pub fn caddyfile(domain: &str, service: &str, port: u16) -> Result<String> {
    caddy_token("domain", domain)?;
    caddy_token("service name", service)?;

    Ok(formatdoc! {"
        # Routes {domain} to the {service} container.
        http://{domain} {{
            reverse_proxy {service}:{port}
        }}

        # Requests by IP or another host name.
        :80 {{
            reverse_proxy {service}:{port}
        }}
    "})
}

/// Compose service name of the reverse proxy.
pub const PROXY_SERVICE: &str = "caddy";

#[derive(Debug, Serialize)]
struct ComposeFile {
    services: BTreeMap<String, ComposeService>,
    networks: BTreeMap<String, ComposeNetwork>,
}

#[derive(Debug, Serialize)]
struct ComposeService {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_name: Option<String>,
    restart: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ComposeNetwork {
    name: String,
}

/// Composition running `image` as `service` behind the Caddy proxy.
pub fn compose_file(service: &str, image: &str) -> Result<String> {
    if service == PROXY_SERVICE {
        return Err(ProvisionError::Render(format!(
            "service name {service:?} is reserved for the reverse proxy"
        )));
    }

    let mut services = BTreeMap::new();
    services.insert(
        service.to_string(),
        ComposeService {
            image: image.to_string(),
            container_name: Some(service.to_string()),
            restart: "unless-stopped",
            ports: Vec::new(),
            volumes: Vec::new(),
            depends_on: Vec::new(),
        },
    );
    services.insert(
        PROXY_SERVICE.to_string(),
        ComposeService {
            image: PROXY_IMAGE.to_string(),
            container_name: None,
            restart: "unless-stopped",
            ports: vec!["80:80".to_string()],
            volumes: vec!["./Caddyfile:/etc/caddy/Caddyfile:ro".to_string()],
            depends_on: vec![service.to_string()],
        },
    );
    let mut networks = BTreeMap::new();
    networks.insert(
        "default".to_string(),
        ComposeNetwork {
            name: APP_NETWORK.to_string(),
        },
    );

    serde_yaml::to_string(&ComposeFile { services, networks })
        .map_err(|e| ProvisionError::Render(format!("compose file: {e}")))
}

/// Inputs to the cloud-config document.
#[derive(Debug)]
pub struct CloudConfigInput<'a> {
    pub hostname: &'a str,
    pub image: &'a str,
    pub family: OsFamily,
    pub user: &'a str,
    pub compose: &'a str,
    pub caddyfile: &'a str,
    pub build_recipe: Option<&'a str>,
    pub app_files: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct CloudConfig {
    hostname: String,
    manage_etc_hosts: bool,
    users: Vec<CloudUser>,
    package_update: bool,
    packages: Vec<&'static str>,
    write_files: Vec<WriteFile>,
    runcmd: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CloudUser {
    name: String,
    sudo: &'static str,
    shell: &'static str,
    lock_passwd: bool,
}

#[derive(Debug, Serialize)]
struct WriteFile {
    path: String,
    content: String,
    permissions: &'static str,
}

impl WriteFile {
    fn new(path: String, content: &str) -> Self {
        Self {
            path,
            content: content.to_string(),
            permissions: "0644",
        }
    }
}

/// A relative path that stays inside the app tree.
fn app_path(relative: &str) -> Result<String> {
    let path = Path::new(relative);
    let contained = !relative.is_empty()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if !contained {
        return Err(ProvisionError::Render(format!(
            "app file path {relative:?} must be relative and stay inside the project"
        )));
    }
    Ok(format!("{GUEST_DIR}/app/{relative}"))
}

/// The `#cloud-config` user-data document.
pub fn cloud_config(input: &CloudConfigInput<'_>) -> Result<String> {
    let mut write_files = vec![
        WriteFile::new(format!("{GUEST_DIR}/docker-compose.yml"), input.compose),
        WriteFile::new(format!("{GUEST_DIR}/Caddyfile"), input.caddyfile),
        WriteFile::new(
            format!("{GUEST_DIR}/dockvirt.env"),
            &format!(
                "DOCKVIRT_IMAGE={}\nDOCKVIRT_OS_FAMILY={}\nDOCKVIRT_USER={}\n",
                input.image,
                input.family.as_str(),
                input.user
            ),
        ),
    ];

    if let Some(recipe) = input.build_recipe {
        write_files.push(WriteFile::new(format!("{GUEST_DIR}/app/Dockerfile"), recipe));
    }
    for (relative, contents) in input.app_files {
        write_files.push(WriteFile::new(app_path(relative)?, contents));
    }

    let mut runcmd = input.family.bootstrap_commands();
    runcmd.push(RUNTIME_INSTALLER.to_string());
    runcmd.push("systemctl enable --now docker".to_string());
    runcmd.push(format!("usermod -aG docker {}", input.user));
    if input.build_recipe.is_some() {
        runcmd.push(format!("docker build -t {} {GUEST_DIR}/app", input.image));
    }
    runcmd.push(format!("docker compose -f {GUEST_DIR}/docker-compose.yml up -d"));

    let config = CloudConfig {
        hostname: input.hostname.to_string(),
        manage_etc_hosts: true,
        users: vec![CloudUser {
            name: input.user.to_string(),
            sudo: "ALL=(ALL) NOPASSWD:ALL",
            shell: "/bin/bash",
            lock_passwd: true,
        }],
        package_update: true,
        packages: vec!["ca-certificates", "curl"],
        write_files,
        runcmd,
    };

    let body = serde_yaml::to_string(&config)
        .map_err(|e| ProvisionError::Render(format!("cloud-config: {e}")))?;
    Ok(format!("#cloud-config\n{body}"))
}

/// The NoCloud meta-data document.
pub fn meta_data(name: &str) -> String {
    format!("instance-id: {name}\nlocal-hostname: {name}\n")
}
