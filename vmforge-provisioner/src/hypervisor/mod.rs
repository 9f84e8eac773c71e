//! Hypervisor control interface.
//!
//! One controller per control connection; domain handles are only valid
//! for the connection that produced them. The state machine per domain is
//! `undefined -> defined -> running -> (destroyed | undefined)`.

use async_trait::async_trait;

use crate::error::Result;

pub mod mock;

#[cfg(feature = "libvirt")]
pub mod libvirt;

pub use mock::MockHypervisor;

#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtConnector;

/// Opaque reference to a defined domain, valid for the lifetime of the
/// controller connection that returned it.
#[derive(Debug, Clone)]
pub struct DomainHandle {
    /// Domain UUID
    pub uuid: String,
    /// Domain name
    pub name: String,
}

/// Domain lifecycle operations against one open control connection.
#[async_trait]
pub trait HypervisorController: Send + Sync {
    /// Register a persistent domain definition from the descriptor
    /// document. Overwrites any prior definition with the same identity;
    /// does not start the VM.
    async fn define(&self, xml: &str) -> Result<DomainHandle>;

    /// Remove the persistent definition. A running domain keeps running
    /// as a transient instance.
    async fn undefine(&self, handle: &DomainHandle) -> Result<()>;

    /// Transition a defined domain to running.
    async fn launch(&self, handle: &DomainHandle) -> Result<()>;

    /// Forcibly stop a running domain and release hypervisor-side
    /// resources.
    async fn destroy(&self, handle: &DomainHandle) -> Result<()>;

    /// Resolve a domain UUID to its name.
    async fn lookup_by_uuid(&self, uuid: &str) -> Result<String>;

    /// Names of all running domains.
    async fn list_running(&self) -> Result<Vec<String>>;
}

/// Opens control connections to hypervisor hosts.
#[async_trait]
pub trait HypervisorConnector: Send + Sync {
    /// Open a control connection to the hypervisor at `address`. Fails
    /// fatally if the endpoint is unreachable or refuses the connection.
    async fn connect(&self, address: &str) -> Result<Box<dyn HypervisorController>>;
}
