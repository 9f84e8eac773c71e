//! Request-scoped data types for a provisioning run.
//!
//! The caller resolves everything against its inventory (flavors, networks,
//! fixed IPs) before handing over a [`ProvisionRequest`]; nothing in here is
//! mutated by the pipeline.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// A remote host the pipeline runs commands on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostTarget {
    /// Hostname or IP address
    pub address: String,
    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Remote user
    #[serde(default = "default_ssh_user")]
    pub user: String,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

impl HostTarget {
    /// Create a target with the default SSH port and user.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: default_ssh_port(),
            user: default_ssh_user(),
        }
    }
}

/// Everything the L2 build needs to know about the instance's network.
///
/// Built once per request from inventory data; read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// VLAN id; the interface name is always `vlan<id>`
    pub vlan: u16,
    /// Network CIDR, e.g. `10.0.0.0/24`
    pub cidr: String,
    /// Bridge device name, e.g. `br100`
    pub bridge: String,
    /// Address dnsmasq listens on, assigned to the bridge
    pub dhcp_server: String,
    /// First address of the DHCP range
    pub dhcp_start: String,
    /// Maximum number of leases
    pub lease_max: u32,
    /// Gateway handed out via DHCP option 3
    pub gateway: String,
    /// Dotted netmask for the DHCP range
    pub netmask: String,
    /// Network label, used to tag the DHCP range
    pub label: String,
    /// Fixed IP assigned to this instance
    pub ip: String,
    /// MAC address of the instance's interface
    pub mac: String,
    /// Hostname recorded in the static host mapping
    pub hostname: String,
}

impl NetworkDescriptor {
    /// Deterministic VLAN interface name for this network.
    pub fn vlan_interface(&self) -> String {
        vlan_interface(self.vlan)
    }

    /// Mask bits taken from the CIDR suffix.
    pub fn mask_bits(&self) -> Result<&str> {
        self.cidr
            .split_once('/')
            .map(|(_, bits)| bits)
            .ok_or_else(|| {
                ProvisionError::InvalidNetwork(format!("CIDR has no mask bits: {}", self.cidr))
            })
    }
}

/// Deterministic VLAN interface name for a VLAN id.
pub fn vlan_interface(vlan: u16) -> String {
    format!("vlan{}", vlan)
}

/// Flavor attributes stamped into the domain metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlavorInfo {
    /// Flavor name, e.g. `c4m8`
    pub name: String,
    /// Memory in MiB
    pub memory_mb: u64,
    /// Number of vcpus
    pub vcpus: u32,
    /// Root disk in GiB
    pub root_gb: u64,
}

/// One VM provisioning request, fully resolved by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Instance UUID; the on-host directory layout is a pure function of it
    pub uuid: String,
    /// Domain name, e.g. `instance-0000002a`
    pub name: String,
    /// Guest hostname
    pub hostname: String,
    /// Guest memory in MiB
    pub memory_mb: u64,
    /// Guest vcpu count
    pub vcpus: u32,
    /// Instance creation time (stamped into the domain metadata)
    pub created_at: DateTime<Utc>,
    /// Flavor the instance was sized from
    pub flavor: FlavorInfo,
    /// Network attachment
    pub network: NetworkDescriptor,
    /// Hypervisor host to provision on
    pub host: HostTarget,
}

/// Canonical domain name for a numeric instance id, e.g. `instance-00000001`.
pub fn instance_name(instance_id: u64) -> String {
    format!("instance-{:08x}", instance_id)
}

/// Per-instance directory on the hypervisor host.
pub fn instance_dir(mount: &str, uuid: &str) -> String {
    format!("{}/nova/instances/{}", mount, uuid)
}

/// Generate an Ethernet MAC address.
///
/// 0xfa:16:3e keeps the unicast and locally-administered bits set without
/// colliding with the 0xfe range libvirt claims for its own tap devices.
pub fn generate_mac_address() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "fa:16:3e:{:02x}:{:02x}:{:02x}",
        rng.gen_range(0x00..=0xffu16),
        rng.gen_range(0x00..=0xffu16),
        rng.gen_range(0x00..=0xffu16)
    )
}
