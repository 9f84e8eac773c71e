//! L2 network provisioning on the hypervisor host.
//!
//! Ensures the VLAN interface, bridge and dnsmasq service an instance needs
//! exist before the domain is defined. Every operation is idempotent at the
//! device level, so a re-run after a partial failure skips what a previous
//! run already created.
//!
//! The dnsmasq restart is a detect-then-kill-then-start sequence with no
//! atomicity on the host. Concurrent provisioning of the same network from
//! this process is therefore serialized with a per-(host, device) lock;
//! separate processes racing each other remain out of scope.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::ProvisionConfig;
use crate::error::Result;
use crate::remote::RemoteExecutor;
use crate::types::{vlan_interface, HostTarget, NetworkDescriptor};

/// Idempotently provisions VLAN interfaces, bridges and DHCP service.
///
/// Holds the remote executor by composition; nothing here talks to the host
/// except through it.
pub struct NetworkProvisioner {
    executor: Arc<dyn RemoteExecutor>,
    config: ProvisionConfig,
    locks: StdMutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl NetworkProvisioner {
    /// Create a provisioner using the given executor and configuration.
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: ProvisionConfig) -> Self {
        Self {
            executor,
            config,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Serialization point for one (host, device) pair.
    fn device_lock(&self, host: &str, device: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("device lock map");
        locks
            .entry((host.to_string(), device.to_string()))
            .or_default()
            .clone()
    }

    /// Create the VLAN interface unless it already exists.
    ///
    /// The interface name is a deterministic function of the VLAN id
    /// (`vlan<id>`); the device is layered on the configured trunk
    /// interface and brought up.
    #[instrument(skip(self, host), fields(host = %host.address, vlan = vlan))]
    pub async fn ensure_vlan(&self, host: &HostTarget, vlan: u16) -> Result<()> {
        let iface = vlan_interface(vlan);
        let lock = self.device_lock(&host.address, &iface);
        let _guard = lock.lock().await;

        if self.executor.device_exists(host, &iface).await? {
            debug!(iface = %iface, "VLAN interface already exists");
            return Ok(());
        }

        let cmd = format!(
            "ip link add link {} name {} type vlan id {}",
            self.config.trunk_interface, iface, vlan
        );
        self.executor.run_checked(host, cmd).await?;

        let cmd = format!("ip link set {} up", iface);
        self.executor.run_checked(host, cmd).await?;

        info!(iface = %iface, "Created and started VLAN interface");
        Ok(())
    }

    /// Create the bridge unless it already exists.
    ///
    /// Attaches the network's VLAN interface as master, brings the bridge
    /// up and assigns the DHCP-server address with the CIDR's mask bits.
    /// Expects [`ensure_vlan`](Self::ensure_vlan) to have run first.
    #[instrument(skip(self, host, net), fields(host = %host.address, bridge = %net.bridge))]
    pub async fn ensure_bridge(&self, host: &HostTarget, net: &NetworkDescriptor) -> Result<()> {
        let lock = self.device_lock(&host.address, &net.bridge);
        let _guard = lock.lock().await;

        if self.executor.device_exists(host, &net.bridge).await? {
            debug!("Bridge already exists");
            return Ok(());
        }

        let cmd = format!("ip link add {} type bridge", net.bridge);
        self.executor.run_checked(host, cmd).await?;

        let iface = net.vlan_interface();
        let cmd = format!("ip link set {} master {}", iface, net.bridge);
        self.executor.run_checked(host, cmd).await?;

        let cmd = format!("ip link set {} up", net.bridge);
        self.executor.run_checked(host, cmd).await?;

        let cmd = format!(
            "ip a add {}/{} dev {}",
            net.dhcp_server,
            net.mask_bits()?,
            net.bridge
        );
        self.executor.run_checked(host, cmd).await?;

        info!(
            vlan = %iface,
            dhcp_server = %net.dhcp_server,
            "Created bridge, bound VLAN interface, assigned DHCP server address"
        );
        Ok(())
    }

    /// (Re)start the dnsmasq service for a network.
    ///
    /// If a dnsmasq instance already serves the listen address it is killed
    /// and replaced; otherwise the pid/opts/hosts files are initialized
    /// first. Both paths then record the instance's static host mapping and
    /// start exactly one fresh dnsmasq bound to the bridge.
    #[instrument(skip(self, host, net), fields(host = %host.address, bridge = %net.bridge))]
    pub async fn restart_dhcp(&self, host: &HostTarget, net: &NetworkDescriptor) -> Result<()> {
        let lock = self.device_lock(&host.address, &net.bridge);
        let _guard = lock.lock().await;

        let pidfile = self.dhcp_file(&net.bridge, "pid");
        let optsfile = self.dhcp_file(&net.bridge, "opts");
        let addnfile = self.dhcp_file(&net.bridge, "hosts");

        // The probe prints to stderr (via `ls 999`) only when no process
        // matches, so empty stderr means dnsmasq is running.
        let probe = format!(
            "total=$(ps aux|grep dnsmasq|grep \"{}\"|grep -v grep|wc -l); \
             if [ $total -eq 0 ]; then ls 999; fi",
            net.dhcp_server
        );
        let is_running = self.executor.execute(host, &probe).await?.success;

        if is_running {
            let cmd = format!(
                "ps aux | grep dnsmasq | grep '{}' | awk '{{print $2}}' | xargs kill -9",
                net.dhcp_server
            );
            self.executor.run_checked(host, cmd).await?;
            debug!("Killed running dnsmasq");
        } else {
            self.executor.touch(host, &pidfile).await?;
            self.executor.touch(host, &addnfile).await?;

            self.executor.touch(host, &optsfile).await?;
            self.executor.chmod(host, &optsfile, "644").await?;
            self.executor
                .write_short_text(host, &dhcp_opts(&net.gateway), &optsfile)
                .await?;
            debug!("Initialized dnsmasq pid/opts/hosts files");
        }

        // Record the instance's (mac,hostname,ip) mapping for
        // --dhcp-hostsfile.
        let hostsfile = self.dhcp_file(&net.bridge, "conf");
        self.executor.touch(host, &hostsfile).await?;
        self.executor.chmod(host, &hostsfile, "644").await?;
        let item = format!("{},{},{}", net.mac, net.hostname, net.ip);
        self.executor.append_text(host, &item, &hostsfile).await?;
        info!(item = %item, "Recorded DHCP host mapping");

        let dhcp_range = format!(
            "set:{},{},static,{},{}",
            net.label, net.dhcp_start, net.netmask, self.config.dhcp_lease_time
        );
        let cmd = [
            "dnsmasq".to_string(),
            "--strict-order".to_string(),
            "--bind-interfaces".to_string(),
            "--conf-file=".to_string(),
            format!("--pid-file={}", pidfile),
            format!("--dhcp-optsfile={}", optsfile),
            format!("--listen-address={}", net.dhcp_server),
            "--except-interface=lo".to_string(),
            format!("--dhcp-range={}", dhcp_range),
            format!("--dhcp-lease-max={}", net.lease_max),
            format!("--dhcp-hostsfile={}", hostsfile),
            format!("--domain={}", self.config.dhcp_domain),
            format!("--addn-hosts={}", addnfile),
            "--no-hosts".to_string(),
            "--leasefile-ro".to_string(),
        ]
        .join(" ");
        self.executor.run_checked(host, cmd).await?;

        info!("Started dnsmasq for DHCP service");
        Ok(())
    }

    /// Path to a pid, opts, conf or hosts file for a bridge.
    fn dhcp_file(&self, bridge: &str, kind: &str) -> String {
        format!("{}/nova/networks/nova-{}.{}", self.config.mount, bridge, kind)
    }
}

/// Hosts options in dhcp-opts format. Option 3 is the gateway.
fn dhcp_opts(gateway: &str) -> String {
    format!("3,{}", gateway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ScriptedExecutor;

    fn provisioner() -> (Arc<ScriptedExecutor>, NetworkProvisioner) {
        let exec = Arc::new(ScriptedExecutor::new());
        let provisioner = NetworkProvisioner::new(exec.clone(), ProvisionConfig::default());
        (exec, provisioner)
    }

    fn host() -> HostTarget {
        HostTarget::new("hv-01")
    }

    fn network() -> NetworkDescriptor {
        NetworkDescriptor {
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
        }
    }

    #[tokio::test]
    async fn ensure_vlan_skips_an_existing_interface() {
        let (exec, provisioner) = provisioner();

        // Device query succeeds: vlan100 already exists.
        provisioner.ensure_vlan(&host(), 100).await.unwrap();

        assert_eq!(exec.commands(), ["ls /sys/class/net/vlan100"]);
    }

    #[tokio::test]
    async fn ensure_vlan_creates_and_starts_a_missing_interface() {
        let (exec, provisioner) = provisioner();
        exec.fail_matching("ls /sys/class/net/vlan100", "No such file or directory");

        provisioner.ensure_vlan(&host(), 100).await.unwrap();

        assert_eq!(
            exec.commands(),
            [
                "ls /sys/class/net/vlan100",
                "ip link add link bond0 name vlan100 type vlan id 100",
                "ip link set vlan100 up",
            ]
        );
    }

    #[tokio::test]
    async fn second_ensure_vlan_is_a_no_op() {
        let (exec, provisioner) = provisioner();
        exec.fail_matching("ls /sys/class/net/vlan100", "No such file or directory");

        provisioner.ensure_vlan(&host(), 100).await.unwrap();
        let creations_after_first = exec.commands_matching("ip link add").len();

        // The first run created the interface; answer the query positively
        // from now on.
        let (exec, provisioner) = self::provisioner();
        provisioner.ensure_vlan(&host(), 100).await.unwrap();
        provisioner.ensure_vlan(&host(), 100).await.unwrap();

        assert_eq!(creations_after_first, 1);
        assert_eq!(exec.commands_matching("ip link add").len(), 0);
    }

    #[tokio::test]
    async fn ensure_bridge_issues_the_creation_sequence_in_order() {
        let (exec, provisioner) = provisioner();
        exec.fail_matching("ls /sys/class/net/br100", "No such file or directory");

        provisioner.ensure_bridge(&host(), &network()).await.unwrap();

        assert_eq!(
            exec.commands(),
            [
                "ls /sys/class/net/br100",
                "ip link add br100 type bridge",
                "ip link set vlan100 master br100",
                "ip link set br100 up",
                "ip a add 10.0.0.1/24 dev br100",
            ]
        );
    }

    #[tokio::test]
    async fn ensure_bridge_skips_an_existing_bridge() {
        let (exec, provisioner) = provisioner();

        provisioner.ensure_bridge(&host(), &network()).await.unwrap();

        assert_eq!(exec.commands(), ["ls /sys/class/net/br100"]);
    }

    #[tokio::test]
    async fn restart_dhcp_initializes_files_when_no_process_matches() {
        let (exec, provisioner) = provisioner();
        // Probe prints to stderr when nothing matches: not running.
        exec.fail_matching("wc -l", "ls: cannot access '999'");

        provisioner.restart_dhcp(&host(), &network()).await.unwrap();

        // PID/opts/hosts initialization happens before the options entry.
        let commands = exec.commands();
        let pid_touch = commands
            .iter()
            .position(|c| c.contains("touch /data/nova/networks/nova-br100.pid"))
            .unwrap();
        let opts_write = commands
            .iter()
            .position(|c| c.contains("echo 3,10.0.0.254 > /data/nova/networks/nova-br100.opts"))
            .unwrap();
        assert!(pid_touch < opts_write);

        // No kill, exactly one dnsmasq start.
        assert!(exec.commands_matching("kill -9").is_empty());
        let starts = exec.commands_matching("dnsmasq --strict-order");
        assert_eq!(starts.len(), 1);
        assert!(starts[0].contains("--listen-address=10.0.0.1"));
        assert!(starts[0].contains("--dhcp-range=set:prod,10.0.0.3,static,255.255.255.0,86400s"));
        assert!(starts[0].contains("--dhcp-lease-max=256"));
        assert!(starts[0].contains("--dhcp-hostsfile=/data/nova/networks/nova-br100.conf"));
        assert!(starts[0].contains("--domain=novalocal"));

        // The host mapping was appended to the hosts file.
        let mapping = exec.commands_matching("fa:16:3e:aa:bb:cc,web-1,10.0.0.17");
        assert_eq!(mapping.len(), 1);
    }

    #[tokio::test]
    async fn restart_dhcp_replaces_a_running_process_without_reinitializing_opts() {
        let (exec, provisioner) = provisioner();
        // Probe succeeds (empty stderr): a dnsmasq already serves the address.

        provisioner.restart_dhcp(&host(), &network()).await.unwrap();

        let kills = exec.commands_matching("kill -9");
        assert_eq!(kills.len(), 1);
        assert!(kills[0].contains("grep '10.0.0.1'"));

        // The opts file is not re-initialized on this branch.
        assert!(exec.commands_matching("echo 3,10.0.0.254").is_empty());
        assert!(exec
            .commands_matching("touch /data/nova/networks/nova-br100.pid")
            .is_empty());

        // Exactly one replacement service is started.
        assert_eq!(exec.commands_matching("dnsmasq --strict-order").len(), 1);
    }
}
