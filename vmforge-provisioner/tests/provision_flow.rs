//! End-to-end pipeline tests against the scripted executor and the mock
//! hypervisor.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use vmforge_provisioner::hypervisor::MockHypervisor;
use vmforge_provisioner::{
    FlavorInfo, HostTarget, NetworkDescriptor, ProvisionConfig, ProvisionError, ProvisionRequest,
    Provisioner, ScriptedExecutor,
};

fn request() -> ProvisionRequest {
    ProvisionRequest {
        uuid: "abc-123".to_string(),
        name: "instance-00000001".to_string(),
        hostname: "web-1".to_string(),
        memory_mb: 4096,
        vcpus: 4,
        created_at: Utc.with_ymd_and_hms(2020, 5, 21, 3, 45, 12).unwrap(),
        flavor: FlavorInfo {
            name: "c4m4".to_string(),
            memory_mb: 4096,
            vcpus: 4,
            root_gb: 40,
        },
        network: NetworkDescriptor {
            vlan: 100,
            cidr: "10.0.0.0/24".to_string(),
            bridge: "br100".to_string(),
            dhcp_server: "10.0.0.1".to_string(),
            dhcp_start: "10.0.0.3".to_string(),
            lease_max: 256,
            gateway: "10.0.0.254".to_string(),
            netmask: "255.255.255.0".to_string(),
            label: "prod".to_string(),
            ip: "10.0.0.17".to_string(),
            mac: "fa:16:3e:aa:bb:cc".to_string(),
            hostname: "web-1".to_string(),
        },
        host: HostTarget::new("hv-01"),
    }
}

fn pipeline() -> (Arc<ScriptedExecutor>, MockHypervisor, Provisioner) {
    let executor = Arc::new(ScriptedExecutor::new());
    let hypervisor = MockHypervisor::new();
    let provisioner = Provisioner::new(
        ProvisionConfig::default(),
        executor.clone(),
        Arc::new(hypervisor.clone()),
    );
    (executor, hypervisor, provisioner)
}

/// Make the host look empty: no vlan, no bridge, no dnsmasq.
fn stage_empty_host(executor: &ScriptedExecutor) {
    executor.fail_matching("ls /sys/class/net/vlan100", "No such file or directory");
    executor.fail_matching("ls /sys/class/net/br100", "No such file or directory");
    executor.fail_matching("wc -l", "ls: cannot access '999'");
}

#[tokio::test]
async fn full_build_runs_the_steps_in_order_and_launches_the_domain() {
    let (executor, hypervisor, provisioner) = pipeline();
    stage_empty_host(&executor);

    let report = provisioner.build(&request()).await.unwrap();

    assert_eq!(report.instance_dir, "/data/nova/instances/abc-123");
    assert_eq!(report.instance_name, "instance-00000001");
    assert_eq!(report.domain.uuid, "abc-123");
    assert_eq!(report.running_domains, ["instance-00000001"]);
    assert_eq!(hypervisor.running_domains(), ["instance-00000001"]);
    assert!(hypervisor.is_defined("abc-123"));

    // The fixed step order: vlan, bridge, dhcp, directory, disk.info,
    // console.log, libvirt.xml, disk relocation.
    let commands = executor.commands();
    let position = |needle: &str| {
        commands
            .iter()
            .position(|c| c.contains(needle))
            .unwrap_or_else(|| panic!("no command matching {needle:?}"))
    };

    let vlan = position("ip link add link bond0 name vlan100");
    let bridge = position("ip link add br100 type bridge");
    let dnsmasq = position("dnsmasq --strict-order");
    let dir = position("mkdir -p /data/nova/instances/abc-123");
    let disk_info = position("disk.info");
    let console = position("touch /data/nova/instances/abc-123/console.log");
    let xml = position("libvirt.xml");
    let relocate = position("mv /opt/migrate/disk /data/nova/instances/abc-123");

    assert!(vlan < bridge);
    assert!(bridge < dnsmasq);
    assert!(dnsmasq < dir);
    assert!(dir < disk_info);
    assert!(disk_info < console);
    assert!(console < xml);
    assert!(xml < relocate);
}

#[tokio::test]
async fn generated_artifacts_have_the_expected_content() {
    let (executor, _hypervisor, provisioner) = pipeline();
    stage_empty_host(&executor);

    provisioner.build(&request()).await.unwrap();

    // disk.info is a JSON map from the disk path to its format, with a
    // space after the colon.
    let disk_info_writes = executor.commands_matching("disk.info");
    assert!(disk_info_writes[0]
        .contains(r#"{"/data/nova/instances/abc-123/disk": "qcow2"}"#));

    // libvirt.xml is written via heredoc and carries the domain document.
    let xml_writes = executor.commands_matching("cat > /data/nova/instances/abc-123/libvirt.xml");
    assert_eq!(xml_writes.len(), 1);
    assert!(xml_writes[0].contains("<domain type=\"kvm\">"));
    assert!(xml_writes[0].contains("<source file=\"/data/nova/instances/abc-123/disk\"/>"));
    assert!(xml_writes[0].contains("<driver name=\"vhost\" queues=\"4\"/>"));

    // Ownership handoff: metadata files to nova, runtime files to qemu.
    assert_eq!(
        executor.commands_matching("chown nova:nova").len(),
        2 // disk.info + libvirt.xml
    );
    let qemu_chowns = executor.commands_matching("chown qemu:qemu");
    assert!(qemu_chowns.iter().any(|c| c.contains("console.log")));
    assert!(qemu_chowns.iter().any(|c| c.ends_with("/disk")));
}

#[tokio::test]
async fn first_failure_aborts_all_remaining_steps() {
    let (executor, hypervisor, provisioner) = pipeline();
    stage_empty_host(&executor);
    executor.fail_matching("mkdir -p /data/nova/instances", "disk full");

    let err = provisioner.build(&request()).await.unwrap_err();
    match err {
        ProvisionError::CommandFailed { host, command, stderr } => {
            assert_eq!(host, "hv-01");
            assert!(command.contains("mkdir -p /data/nova/instances/abc-123"));
            assert_eq!(stderr, "disk full");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Nothing after the failing step ran.
    assert!(executor.commands_matching("disk.info").is_empty());
    assert!(executor.commands_matching("mv /opt/migrate/disk").is_empty());
    assert!(hypervisor.running_domains().is_empty());
    assert!(!hypervisor.is_defined("abc-123"));
}

#[tokio::test]
async fn rerun_after_relocation_reports_the_missing_source_disk() {
    let (executor, hypervisor, provisioner) = pipeline();
    // Network devices already exist from the previous run; the staged disk
    // was already consumed.
    executor.fail_matching("wc -l", "ls: cannot access '999'");
    executor.fail_matching("ls /opt/migrate/disk", "No such file or directory");

    let err = provisioner.build(&request()).await.unwrap_err();
    match err {
        ProvisionError::MissingSourceDisk { host, path } => {
            assert_eq!(host, "hv-01");
            assert_eq!(path, "/opt/migrate/disk");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Idempotent network steps issued no device creations.
    assert!(executor.commands_matching("ip link add").is_empty());
    // The domain was never defined.
    assert!(!hypervisor.is_defined("abc-123"));
}

#[tokio::test]
async fn launch_rejection_surfaces_as_a_lifecycle_error() {
    let executor = Arc::new(ScriptedExecutor::new());
    let hypervisor = MockHypervisor::new().fail_launch();
    let provisioner = Provisioner::new(
        ProvisionConfig::default(),
        executor.clone(),
        Arc::new(hypervisor.clone()),
    );
    stage_empty_host(&executor);

    let err = provisioner.build(&request()).await.unwrap_err();
    match err {
        ProvisionError::Lifecycle { operation, domain, .. } => {
            assert_eq!(operation, "launch");
            assert_eq!(domain, "abc-123");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Defined but never started.
    assert!(hypervisor.is_defined("abc-123"));
    assert!(hypervisor.running_domains().is_empty());
}

#[tokio::test]
async fn refused_hypervisor_connection_is_fatal() {
    let executor = Arc::new(ScriptedExecutor::new());
    let hypervisor = MockHypervisor::new().refuse_connections();
    let provisioner = Provisioner::new(
        ProvisionConfig::default(),
        executor.clone(),
        Arc::new(hypervisor),
    );
    stage_empty_host(&executor);

    let err = provisioner.build(&request()).await.unwrap_err();
    assert!(matches!(err, ProvisionError::ConnectionFailed { .. }));
}
