//! Integration tests for the VM lifecycle controller against a scripted
//! hypervisor.

mod common;

use std::fs;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tempfile::TempDir;

use common::{no_such_domain, TestFetcher};
use dockvirt_provision::{
    CommandOutput, Config, ConventionalDiscovery, LocalProject, MockRunner, ProjectDiscovery,
    ProvisionError, ProvisioningRequest, Stage, VmAddress, VmController, VmName, VmState,
};

const INDEX_HTML: &str = "<!doctype html>\n<h1>Hello from dockvirt</h1>\n";

const DOMIFLIST: &str = " Interface   Type      Source    Model    MAC
-------------------------------------------------------------
 vnet0       network   default   virtio   52:54:00:ab:cd:ef
";

const DHCP_LEASES: &str = " Expiry Time           MAC address         Protocol   IP address          Hostname   Client ID or DUID
-------------------------------------------------------------------------------------------------------------
 2026-10-17 12:00:00   52:54:00:11:22:33   ipv4       192.168.122.10/24   other      -
 2026-10-17 12:00:00   52:54:00:ab:cd:ef   ipv4       192.168.122.77/24   demo       -
";

struct Harness {
    home: TempDir,
    runner: Arc<MockRunner>,
    fetcher: Arc<TestFetcher>,
    controller: VmController,
}

fn harness() -> Harness {
    let home = TempDir::new().unwrap();
    let runner = Arc::new(MockRunner::new());
    let fetcher = Arc::new(TestFetcher::new());
    let controller = VmController::new(
        Config::with_home(home.path()),
        runner.clone(),
        fetcher.clone(),
    );
    Harness {
        home,
        runner,
        fetcher,
        controller,
    }
}

fn demo_request() -> ProvisioningRequest {
    let mut request = ProvisioningRequest::new("demo", "demo.local", "nginx:alpine");
    request.container_port = 80;
    request.os_variant = "ubuntu22.04".to_string();
    request
}

fn demo() -> VmName {
    VmName::parse("demo").unwrap()
}

#[tokio::test]
async fn test_create_demo_with_static_site() {
    let h = harness();
    h.runner.on("virsh domstate", no_such_domain("demo"));

    let project_dir = TempDir::new().unwrap();
    fs::write(project_dir.path().join("index.html"), INDEX_HTML).unwrap();
    let project = ConventionalDiscovery::default()
        .collect(project_dir.path())
        .unwrap();

    let created = h.controller.create(&demo_request(), &project).await.unwrap();

    let ws = created.workspace.root().to_path_buf();
    assert_eq!(ws, h.home.path().join("demo"));

    let caddyfile = fs::read_to_string(ws.join("Caddyfile")).unwrap();
    assert!(caddyfile.contains("http://demo.local {"));
    assert!(caddyfile.contains("reverse_proxy demo:80"));

    let compose = fs::read_to_string(ws.join("docker-compose.yml")).unwrap();
    assert!(compose.contains("image: nginx:alpine"));

    let user_data = fs::read_to_string(ws.join("user-data")).unwrap();
    assert!(user_data.starts_with("#cloud-config\n"));
    let value: serde_yaml::Value = serde_yaml::from_str(&user_data).unwrap();
    let index = value["write_files"]
        .as_sequence()
        .unwrap()
        .iter()
        .find(|f| f["path"].as_str() == Some("/opt/dockvirt/app/index.html"))
        .unwrap();
    assert_eq!(index["content"].as_str(), Some(INDEX_HTML));

    assert_eq!(
        fs::read_to_string(ws.join("meta-data")).unwrap(),
        "instance-id: demo\nlocal-hostname: demo\n"
    );

    assert_eq!(
        h.runner.call_keys(),
        vec!["virsh domstate", "cloud-localds", "qemu-img create", "virt-install"]
    );
    assert_eq!(h.fetcher.calls(), 1);
    assert!(!created.base_image.was_cached);
    assert_eq!(created.disk, ws.join("demo.qcow2"));
}

#[tokio::test]
async fn test_create_passes_typed_arguments() {
    let h = harness();
    h.runner.on("virsh domstate", no_such_domain("demo"));

    let created = h
        .controller
        .create(&demo_request(), &LocalProject::default())
        .await
        .unwrap();

    let calls = h.runner.calls();
    let qemu = calls.iter().find(|c| c.key() == "qemu-img create").unwrap();
    let base = created.base_image.path.to_string_lossy().into_owned();
    let disk = created.disk.to_string_lossy().into_owned();
    assert_eq!(
        qemu.args_lossy(),
        vec!["create", "-f", "qcow2", "-F", "qcow2", "-b", base.as_str(), disk.as_str(), "20G"]
    );

    let install = calls.iter().find(|c| c.key() == "virt-install").unwrap();
    let args = install.args_lossy();
    assert!(args.windows(2).any(|w| w == ["--name", "demo"]));
    assert!(args.windows(2).any(|w| w == ["--memory", "4096"]));
    assert!(args.windows(2).any(|w| w == ["--os-variant", "ubuntu22.04"]));
    assert!(args.contains(&format!(
        "path={},device=cdrom,readonly=on",
        created.init_medium.display()
    )));
    assert!(args.contains(&"--import".to_string()));
    assert!(args.contains(&"network=default".to_string()));
}

#[tokio::test]
async fn test_second_create_reuses_cached_image() {
    let h = harness();
    h.runner.on("virsh domstate", no_such_domain("demo"));

    h.controller
        .create(&demo_request(), &LocalProject::default())
        .await
        .unwrap();

    let mut other = demo_request();
    other.name = "demo2".to_string();
    let created = h
        .controller
        .create(&other, &LocalProject::default())
        .await
        .unwrap();

    assert!(created.base_image.was_cached);
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_create_refuses_existing_name() {
    let h = harness();
    h.runner.on("virsh domstate", CommandOutput::success("running\n"));

    let err = h
        .controller
        .create(&demo_request(), &LocalProject::default())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Validate));
    assert!(err.to_string().contains("already exists"));
    assert_eq!(h.runner.call_keys(), vec!["virsh domstate"]);
    assert!(!h.home.path().join("demo").exists());
}

#[tokio::test]
async fn test_invalid_request_never_reaches_hypervisor() {
    let h = harness();
    let mut request = demo_request();
    request.name = "demo; rm -rf /".to_string();

    let err = h
        .controller
        .create(&request, &LocalProject::default())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Validate));
    assert_eq!(err.reason_code(), "invalid_argument");
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_reserved_names_fail_before_workspace() {
    for reserved in ["images", "config.yaml", "caddy"] {
        let h = harness();
        let mut request = demo_request();
        request.name = reserved.to_string();

        let err = h
            .controller
            .create(&request, &LocalProject::default())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Validate), "{reserved}");
        assert!(err.to_string().contains("reserved"), "{reserved}");
        assert!(h.runner.calls().is_empty());
        assert!(fs::read_dir(h.home.path()).unwrap().next().is_none());
    }
}

#[tokio::test]
async fn test_relative_home_gives_absolute_backing_path() {
    let cwd = std::env::current_dir().unwrap();
    let home = TempDir::new_in(&cwd).unwrap();
    let relative = home.path().strip_prefix(&cwd).unwrap();
    assert!(relative.is_relative());

    let runner = Arc::new(MockRunner::new());
    runner.on("virsh domstate", no_such_domain("demo"));
    let controller = VmController::new(
        Config::with_home(relative),
        runner.clone(),
        Arc::new(TestFetcher::new()),
    );

    controller
        .create(&demo_request(), &LocalProject::default())
        .await
        .unwrap();

    let calls = runner.calls();
    let args = calls
        .iter()
        .find(|c| c.key() == "qemu-img create")
        .unwrap()
        .args_lossy();
    let backing = args.iter().position(|a| a == "-b").unwrap() + 1;
    assert!(std::path::Path::new(&args[backing]).is_absolute());
    assert!(std::path::Path::new(&args[backing + 1]).is_absolute());
}

#[tokio::test]
async fn test_raw_base_image_sets_backing_format() {
    let h = harness();
    h.runner.on("virsh domstate", no_such_domain("demo"));
    let cache = h.home.path().join("images");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("appliance.img"), b"\xeb\x63\x90 raw disk").unwrap();

    let mut request = demo_request();
    request.base_image = Some("/srv/appliance.img".to_string());
    let created = h
        .controller
        .create(&request, &LocalProject::default())
        .await
        .unwrap();

    assert!(created.base_image.was_cached);
    let calls = h.runner.calls();
    let args = calls
        .iter()
        .find(|c| c.key() == "qemu-img create")
        .unwrap()
        .args_lossy();
    assert!(args.windows(2).any(|w| w == ["-F", "raw"]));
}

#[tokio::test]
async fn test_unknown_os_fails_before_workspace() {
    let h = harness();
    h.runner.on("virsh domstate", no_such_domain("demo"));
    let mut request = demo_request();
    request.os_variant = "plan9".to_string();

    let err = h
        .controller
        .create(&request, &LocalProject::default())
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "configuration_error");
    assert!(!h.home.path().join("demo").exists());
}

#[tokio::test]
async fn test_disk_failure_reports_stage_and_keeps_workspace() {
    let h = harness();
    h.runner
        .on("virsh domstate", no_such_domain("demo"))
        .on(
            "qemu-img create",
            CommandOutput::failure(1, "qemu-img: Could not open backing file\n"),
        );

    let err = h
        .controller
        .create(&demo_request(), &LocalProject::default())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Disk));
    match err.root() {
        ProvisionError::Hypervisor {
            command,
            exit_code,
            stderr,
        } => {
            assert!(command.starts_with("qemu-img create"));
            assert_eq!(*exit_code, Some(1));
            assert!(stderr.contains("Could not open backing file"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(h.runner.count("virt-install"), 0);
    assert!(h.home.path().join("demo/user-data").exists());
}

#[tokio::test]
async fn test_download_failure_reports_base_image_stage() {
    let home = TempDir::new().unwrap();
    let runner = Arc::new(MockRunner::new());
    runner.on("virsh domstate", no_such_domain("demo"));
    let controller = VmController::new(
        Config::with_home(home.path()),
        runner.clone(),
        Arc::new(TestFetcher::failing_first(1)),
    );

    let err = controller
        .create(&demo_request(), &LocalProject::default())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::BaseImage));
    assert_eq!(err.reason_code(), "download_error");
    assert_eq!(runner.count("qemu-img create"), 0);
}

#[tokio::test]
async fn test_base_image_override() {
    let h = harness();
    h.runner.on("virsh domstate", no_such_domain("demo"));
    let mut request = demo_request();
    request.base_image = Some("https://mirror.example/custom/noble.img".to_string());

    let created = h
        .controller
        .create(&request, &LocalProject::default())
        .await
        .unwrap();

    assert_eq!(created.base_image.source, "https://mirror.example/custom/noble.img");
    assert!(created.base_image.path.ends_with("images/noble.img"));
}

#[tokio::test]
async fn test_destroy_tolerates_stopped_vm() {
    let h = harness();
    h.runner.on(
        "virsh destroy",
        CommandOutput::failure(1, "error: Requested operation is not valid: domain is not running\n"),
    );

    let outcome = h.controller.destroy(&demo()).await.unwrap();

    assert!(!outcome.stopped);
    assert_eq!(h.runner.call_keys(), vec!["virsh destroy", "virsh undefine"]);
    let undefine = &h.runner.calls()[1];
    assert_eq!(
        undefine.args_lossy(),
        vec!["undefine", "demo", "--remove-all-storage"]
    );
}

#[tokio::test]
async fn test_destroy_undefine_failure_propagates() {
    let h = harness();
    h.runner.on("virsh undefine", no_such_domain("demo"));

    let err = h.controller.destroy(&demo()).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Hypervisor { .. }));
}

#[tokio::test]
async fn test_destroy_keeps_workspace() {
    let h = harness();
    h.runner.on("virsh domstate", no_such_domain("demo"));
    let created = h
        .controller
        .create(&demo_request(), &LocalProject::default())
        .await
        .unwrap();

    let outcome = h.controller.destroy(&created.name).await.unwrap();
    assert!(outcome.stopped);
    assert!(created.workspace.exists());
}

#[tokio::test]
async fn test_address_from_lease_source() {
    let h = harness();
    h.runner.on(
        "virsh domifaddr",
        CommandOutput::success(
            " Name       MAC address          Protocol     Address\n\
             -------------------------------------------------------\n \
             vnet0      52:54:00:ab:cd:ef    ipv4         192.168.122.45/24\n",
        ),
    );

    let address = h.controller.resolve_address(&demo()).await.unwrap();
    assert_eq!(address, VmAddress::Known(Ipv4Addr::new(192, 168, 122, 45)));
    assert_eq!(h.runner.call_keys(), vec!["virsh domifaddr"]);
}

#[tokio::test]
async fn test_address_falls_back_to_lease_table() {
    let h = harness();
    h.runner
        .on("virsh domiflist", CommandOutput::success(DOMIFLIST))
        .on("virsh net-dhcp-leases", CommandOutput::success(DHCP_LEASES));

    let address = h.controller.resolve_address(&demo()).await.unwrap();
    assert_eq!(address, VmAddress::Known(Ipv4Addr::new(192, 168, 122, 77)));
    assert_eq!(
        h.runner.call_keys(),
        vec!["virsh domifaddr", "virsh domiflist", "virsh net-dhcp-leases"]
    );
}

#[tokio::test]
async fn test_address_mac_from_definition_dump() {
    let h = harness();
    h.runner
        .on(
            "virsh dumpxml",
            CommandOutput::success(
                "<domain type='kvm'>\n  <devices>\n    <interface type='network'>\n      <mac address='52:54:00:AB:CD:EF'/>\n    </interface>\n  </devices>\n</domain>\n",
            ),
        )
        .on("virsh net-dhcp-leases", CommandOutput::success(DHCP_LEASES));

    let address = h.controller.resolve_address(&demo()).await.unwrap();
    assert_eq!(address, VmAddress::Known(Ipv4Addr::new(192, 168, 122, 77)));
    assert_eq!(h.runner.count("virsh dumpxml"), 1);
}

#[tokio::test]
async fn test_address_unknown_without_lease() {
    let h = harness();
    h.runner
        .on("virsh domiflist", CommandOutput::success(DOMIFLIST))
        .on(
            "virsh net-dhcp-leases",
            CommandOutput::success(" Expiry Time   MAC address   Protocol   IP address\n"),
        );

    let address = h.controller.resolve_address(&demo()).await.unwrap();
    assert_eq!(address, VmAddress::Unknown);
    assert_eq!(address.to_string(), "unknown");
}

#[tokio::test]
async fn test_address_unknown_for_failed_queries() {
    let h = harness();
    h.runner
        .on("virsh domifaddr", no_such_domain("demo"))
        .on("virsh domiflist", no_such_domain("demo"))
        .on("virsh dumpxml", no_such_domain("demo"));

    let address = h.controller.resolve_address(&demo()).await.unwrap();
    assert_eq!(address, VmAddress::Unknown);
    assert_eq!(h.runner.count("virsh net-dhcp-leases"), 0);
}

#[tokio::test]
async fn test_state() {
    let h = harness();
    h.runner
        .on("virsh domstate", CommandOutput::success("shut off\n"))
        .on("virsh domstate", no_such_domain("demo"))
        .on(
            "virsh domstate",
            CommandOutput::failure(1, "error: failed to connect to the hypervisor\n"),
        );

    assert_eq!(h.controller.state(&demo()).await.unwrap(), VmState::ShutOff);
    assert_eq!(h.controller.state(&demo()).await.unwrap(), VmState::Absent);
    assert!(matches!(
        h.controller.state(&demo()).await,
        Err(ProvisionError::Hypervisor { .. })
    ));
}
