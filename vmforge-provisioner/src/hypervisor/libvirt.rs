//! Libvirt control connection.

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::sys;

use crate::error::{ProvisionError, Result};

use super::{DomainHandle, HypervisorConnector, HypervisorController};

/// Opens libvirt control connections over SSH
/// (`qemu+ssh://<user>@<address>/system`).
pub struct LibvirtConnector {
    user: String,
}

impl LibvirtConnector {
    /// Connector authenticating as the given remote user.
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

impl Default for LibvirtConnector {
    fn default() -> Self {
        Self::new("root")
    }
}

#[async_trait]
impl HypervisorConnector for LibvirtConnector {
    #[instrument(skip(self))]
    async fn connect(&self, address: &str) -> Result<Box<dyn HypervisorController>> {
        let uri = format!("qemu+ssh://{}@{}/system", self.user, address);
        info!(uri = %uri, "Connecting to libvirt");

        let connection =
            Connect::open(Some(&uri)).map_err(|e| ProvisionError::ConnectionFailed {
                host: address.to_string(),
                detail: e.to_string(),
            })?;

        info!("Connected to libvirt");
        Ok(Box::new(LibvirtController { connection }))
    }
}

/// One open libvirt connection.
///
/// Handles are re-resolved by UUID per call, so a handle that outlived its
/// domain surfaces as a lifecycle error naming the domain instead of a
/// dangling pointer.
pub struct LibvirtController {
    connection: Connect,
}

impl LibvirtController {
    fn get_domain(&self, operation: &'static str, uuid: &str) -> Result<Domain> {
        Domain::lookup_by_uuid_string(&self.connection, uuid).map_err(|e| {
            ProvisionError::Lifecycle {
                operation,
                domain: uuid.to_string(),
                detail: e.to_string(),
            }
        })
    }
}

#[async_trait]
impl HypervisorController for LibvirtController {
    #[instrument(skip(self, xml))]
    async fn define(&self, xml: &str) -> Result<DomainHandle> {
        debug!(xml = %xml, "Defining domain");

        let domain =
            Domain::define_xml(&self.connection, xml).map_err(|e| ProvisionError::Lifecycle {
                operation: "define",
                domain: "<undefined>".to_string(),
                detail: e.to_string(),
            })?;

        let uuid = domain
            .get_uuid_string()
            .map_err(|e| ProvisionError::Lifecycle {
                operation: "define",
                domain: "<undefined>".to_string(),
                detail: e.to_string(),
            })?;
        let name = domain.get_name().map_err(|e| ProvisionError::Lifecycle {
            operation: "define",
            domain: uuid.clone(),
            detail: e.to_string(),
        })?;

        info!(uuid = %uuid, name = %name, "Domain defined");
        Ok(DomainHandle { uuid, name })
    }

    #[instrument(skip(self), fields(domain = %handle.uuid))]
    async fn undefine(&self, handle: &DomainHandle) -> Result<()> {
        let domain = self.get_domain("undefine", &handle.uuid)?;
        domain.undefine().map_err(|e| ProvisionError::Lifecycle {
            operation: "undefine",
            domain: handle.uuid.clone(),
            detail: e.to_string(),
        })?;
        info!("Domain undefined");
        Ok(())
    }

    #[instrument(skip(self), fields(domain = %handle.uuid))]
    async fn launch(&self, handle: &DomainHandle) -> Result<()> {
        let domain = self.get_domain("launch", &handle.uuid)?;
        domain.create().map_err(|e| ProvisionError::Lifecycle {
            operation: "launch",
            domain: handle.uuid.clone(),
            detail: e.to_string(),
        })?;
        info!("Domain launched");
        Ok(())
    }

    #[instrument(skip(self), fields(domain = %handle.uuid))]
    async fn destroy(&self, handle: &DomainHandle) -> Result<()> {
        let domain = self.get_domain("destroy", &handle.uuid)?;
        domain.destroy().map_err(|e| ProvisionError::Lifecycle {
            operation: "destroy",
            domain: handle.uuid.clone(),
            detail: e.to_string(),
        })?;
        info!("Domain destroyed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn lookup_by_uuid(&self, uuid: &str) -> Result<String> {
        let domain = self.get_domain("lookup", uuid)?;
        domain.get_name().map_err(|e| ProvisionError::Lifecycle {
            operation: "lookup",
            domain: uuid.to_string(),
            detail: e.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn list_running(&self) -> Result<Vec<String>> {
        let domains = self
            .connection
            .list_all_domains(sys::VIR_CONNECT_LIST_DOMAINS_ACTIVE)
            .map_err(|e| ProvisionError::Lifecycle {
                operation: "list",
                domain: "<all>".to_string(),
                detail: e.to_string(),
            })?;

        let mut names = Vec::with_capacity(domains.len());
        for domain in domains {
            names.push(domain.get_name().map_err(|e| ProvisionError::Lifecycle {
                operation: "list",
                domain: "<all>".to_string(),
                detail: e.to_string(),
            })?);
        }
        Ok(names)
    }
}
