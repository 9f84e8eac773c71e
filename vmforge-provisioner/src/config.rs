//! Configuration for the provisioning pipeline.
//!
//! One explicit structure, constructed once and handed to each component.
//! No component reads ambient global state.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Instance mount directory on the hypervisor host
    pub mount: String,
    /// Directory the staged source disk image is picked up from
    pub source_dir: String,
    /// Physical trunk interface VLAN devices are layered on
    pub trunk_interface: String,
    /// DHCP domain handed to dnsmasq
    pub dhcp_domain: String,
    /// DHCP lease time handed to dnsmasq
    pub dhcp_lease_time: String,
    /// Host CPU set the guest vcpus are pinned to
    pub cpuset: String,
    /// Package version stamped into the domain metadata
    pub package_version: String,
    /// Owning user id stamped into the domain metadata
    pub user_id: String,
    /// Owning tenant/project id stamped into the domain metadata
    pub tenant_id: String,
    /// Source image id stamped into the domain metadata
    pub image_ref: String,
    /// SSH transport settings
    pub ssh: SshConfig,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            mount: "/data".to_string(),
            source_dir: "/opt/migrate".to_string(),
            trunk_interface: "bond0".to_string(),
            dhcp_domain: "novalocal".to_string(),
            dhcp_lease_time: "86400s".to_string(),
            cpuset: "4-39".to_string(),
            package_version: "2015.1.4-1.el7".to_string(),
            user_id: String::new(),
            tenant_id: String::new(),
            image_ref: String::new(),
            ssh: SshConfig::default(),
        }
    }
}

impl ProvisionConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ProvisionConfig = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }
}

/// SSH transport configuration.
///
/// Per-host address and port live on the request's `HostTarget`; this only
/// carries what is shared across hosts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Remote user the commands and the libvirt connection run as
    pub user: String,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            connect_timeout_secs: 360,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_field() {
        let config = ProvisionConfig::default();
        assert_eq!(config.mount, "/data");
        assert_eq!(config.trunk_interface, "bond0");
        assert_eq!(config.ssh.user, "root");
        assert_eq!(config.ssh.connect_timeout_secs, 360);
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let config: ProvisionConfig =
            serde_yaml::from_str("mount: /srv\nssh:\n  user: deploy\n").unwrap();
        assert_eq!(config.mount, "/srv");
        assert_eq!(config.ssh.user, "deploy");
        assert_eq!(config.source_dir, "/opt/migrate");
        assert_eq!(config.ssh.connect_timeout_secs, 360);
    }
}
