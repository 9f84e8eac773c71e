//! The provisioning pipeline.
//!
//! One fixed, non-reorderable sequence per request: L2 connectivity,
//! on-host directory layout, descriptor document, disk relocation, domain
//! definition and launch. The first failure aborts everything after it;
//! no compensating rollback is attempted — the network steps are idempotent
//! on a re-run, disk relocation is not (see `MissingSourceDisk`).

use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::ProvisionConfig;
use crate::descriptor::{DomainDescriptor, DomainXmlBuilder};
use crate::error::{ProvisionError, Result};
use crate::hypervisor::{DomainHandle, HypervisorConnector};
use crate::network::NetworkProvisioner;
use crate::remote::RemoteExecutor;
use crate::types::{instance_dir, HostTarget, ProvisionRequest};

/// What a successful build leaves behind, for operator visibility.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    /// Per-instance directory on the host
    pub instance_dir: String,
    /// Name of the launched domain
    pub instance_name: String,
    /// Handle of the launched domain
    pub domain: DomainHandle,
    /// All domains running on the hypervisor after the launch
    pub running_domains: Vec<String>,
}

/// Drives one provisioning request end to end.
pub struct Provisioner {
    config: ProvisionConfig,
    executor: Arc<dyn RemoteExecutor>,
    network: NetworkProvisioner,
    connector: Arc<dyn HypervisorConnector>,
}

impl Provisioner {
    /// Wire up the pipeline components around one configuration.
    pub fn new(
        config: ProvisionConfig,
        executor: Arc<dyn RemoteExecutor>,
        connector: Arc<dyn HypervisorConnector>,
    ) -> Self {
        let network = NetworkProvisioner::new(executor.clone(), config.clone());
        Self {
            config,
            executor,
            network,
            connector,
        }
    }

    /// Build one instance on its hypervisor host.
    #[instrument(skip(self, request), fields(uuid = %request.uuid, host = %request.host.address))]
    pub async fn build(&self, request: &ProvisionRequest) -> Result<ProvisionReport> {
        let host = &request.host;
        let net = &request.network;

        // L2 connectivity first; all three are idempotent.
        self.network.ensure_vlan(host, net.vlan).await?;
        self.network.ensure_bridge(host, net).await?;
        self.network.restart_dhcp(host, net).await?;

        let instance_dir = instance_dir(&self.config.mount, &request.uuid);
        self.executor.mkdir(host, &instance_dir).await?;
        info!(dir = %instance_dir, "Built instance directory");

        // disk.info
        let disk_file = format!("{}/disk", instance_dir);
        let info_file = format!("{}/disk.info", instance_dir);
        // One-entry map, rendered by hand: the on-host artifact carries a
        // space after the colon, which serde_json's compact form omits.
        let disk_info = format!(
            "{{{}: {}}}",
            serde_json::Value::from(disk_file),
            serde_json::Value::from("qcow2")
        );
        self.executor
            .write_long_text(host, &disk_info, &info_file)
            .await?;
        self.executor.chown(host, &info_file, "nova", "nova").await?;
        info!("Wrote disk.info");

        // console.log
        let console_file = format!("{}/console.log", instance_dir);
        self.executor.touch(host, &console_file).await?;
        self.executor
            .chown(host, &console_file, "qemu", "qemu")
            .await?;
        info!("Built console.log");

        // libvirt.xml
        let descriptor =
            DomainDescriptor::from_request(request, &self.config, Uuid::new_v4().to_string())?;
        let xml = DomainXmlBuilder::new(&descriptor).build();
        let xml_file = format!("{}/libvirt.xml", instance_dir);
        self.executor.write_long_text(host, &xml, &xml_file).await?;
        self.executor.chown(host, &xml_file, "nova", "nova").await?;
        info!("Wrote libvirt.xml");

        // Relocate the staged disk image into the instance directory.
        self.move_disk(host, &instance_dir).await?;
        info!("Moved source disk into instance directory");

        // Define and launch the domain.
        let controller = self.connector.connect(&host.address).await?;
        let handle = controller.define(&xml).await?;
        controller.launch(&handle).await?;
        info!(domain = %handle.name, "Domain defined and launched");

        let running_domains = controller.list_running().await?;
        info!(count = running_domains.len(), "Enumerated running domains");

        Ok(ProvisionReport {
            instance_dir,
            instance_name: handle.name.clone(),
            domain: handle,
            running_domains,
        })
    }

    /// Move the staged disk into the instance directory and hand it to
    /// qemu. Consume-once: if the source is gone (e.g. a previous run got
    /// this far) the error names the host and the missing path.
    async fn move_disk(&self, host: &HostTarget, instance_dir: &str) -> Result<()> {
        let source = format!("{}/disk", self.config.source_dir);

        let probe = format!("ls {}", source);
        if !self.executor.execute(host, &probe).await?.success {
            return Err(ProvisionError::MissingSourceDisk {
                host: host.address.clone(),
                path: source,
            });
        }

        let cmd = format!("mv {} {}", source, instance_dir);
        self.executor.run_checked(host, cmd).await?;

        // virsh runs as root; the disk must end up owned by qemu.
        let disk_file = format!("{}/disk", instance_dir);
        self.executor.chown(host, &disk_file, "qemu", "qemu").await
    }
}
