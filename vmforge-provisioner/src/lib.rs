//! # vmforge Provisioner
//!
//! Provisions KVM virtual machines on remote hypervisor hosts.
//!
//! A single provisioning request walks a fixed pipeline:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Provisioner                       │
//! │  vlan → bridge → dhcp → dirs → files → xml → domain  │
//! └──────┬──────────────────────┬───────────────┬────────┘
//!        │                      │               │
//!        ▼                      ▼               ▼
//! ┌──────────────┐      ┌──────────────┐  ┌──────────────┐
//! │   Network    │      │    Remote    │  │  Hypervisor  │
//! │ Provisioner  │─────▶│   Executor   │  │  Controller  │
//! └──────────────┘      └──────────────┘  └──────────────┘
//! ```
//!
//! L2 connectivity (VLAN interface, bridge, dnsmasq) and the on-host
//! filesystem layout are driven over SSH; the domain itself is defined
//! and launched through the libvirt control interface. Network steps are
//! idempotent so a re-run after a partial failure skips what already
//! exists.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmforge_provisioner::{Provisioner, ProvisionConfig, SshExecutor};
//! use vmforge_provisioner::hypervisor::MockHypervisor;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ProvisionConfig::default();
//!     let executor = Arc::new(SshExecutor::new(&config.ssh));
//!     let hypervisor = MockHypervisor::new();
//!     let provisioner = Provisioner::new(config, executor, Arc::new(hypervisor));
//!
//!     let report = provisioner.build(&request).await.unwrap();
//!     println!("{} is running", report.instance_name);
//! }
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod hypervisor;
pub mod network;
pub mod orchestrator;
pub mod remote;
pub mod types;
pub mod xml;

pub use config::{ProvisionConfig, SshConfig};
pub use descriptor::{DomainDescriptor, DomainXmlBuilder};
pub use error::{ProvisionError, Result};
pub use hypervisor::{DomainHandle, HypervisorConnector, HypervisorController};
pub use network::NetworkProvisioner;
pub use orchestrator::{ProvisionReport, Provisioner};
pub use remote::{CommandResult, RemoteExecutor, ScriptedExecutor, SshExecutor};
pub use types::{FlavorInfo, HostTarget, NetworkDescriptor, ProvisionRequest};
pub use xml::XmlNode;

// Re-export libvirt controller when available
#[cfg(feature = "libvirt")]
pub use hypervisor::libvirt::LibvirtConnector;
