//! In-memory hypervisor for tests and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::xml::XmlNode;

use super::{DomainHandle, HypervisorConnector, HypervisorController};

/// Mock hypervisor simulating domain lifecycle in memory.
///
/// The connector and every controller it hands out share one state map,
/// so tests can assert on domain state after the pipeline finishes.
#[derive(Clone, Default)]
pub struct MockHypervisor {
    state: Arc<RwLock<MockState>>,
}

#[derive(Default)]
struct MockState {
    domains: HashMap<String, MockDomain>,
    refuse_connections: bool,
    fail_launch: bool,
}

struct MockDomain {
    name: String,
    defined: bool,
    running: bool,
}

impl MockHypervisor {
    /// Create an empty mock hypervisor.
    pub fn new() -> Self {
        info!("Creating mock hypervisor");
        Self::default()
    }

    /// Refuse all connection attempts.
    pub fn refuse_connections(self) -> Self {
        self.state.write().expect("mock state").refuse_connections = true;
        self
    }

    /// Reject every launch call.
    pub fn fail_launch(self) -> Self {
        self.state.write().expect("mock state").fail_launch = true;
        self
    }

    /// Names of currently running domains.
    pub fn running_domains(&self) -> Vec<String> {
        let state = self.state.read().expect("mock state");
        let mut names: Vec<String> = state
            .domains
            .values()
            .filter(|d| d.running)
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Whether the domain with this UUID holds a persistent definition.
    pub fn is_defined(&self, uuid: &str) -> bool {
        self.state
            .read()
            .expect("mock state")
            .domains
            .get(uuid)
            .map(|d| d.defined)
            .unwrap_or(false)
    }
}

#[async_trait]
impl HypervisorConnector for MockHypervisor {
    async fn connect(&self, address: &str) -> Result<Box<dyn HypervisorController>> {
        if self.state.read().expect("mock state").refuse_connections {
            return Err(ProvisionError::ConnectionFailed {
                host: address.to_string(),
                detail: "connection refused".to_string(),
            });
        }
        debug!(address = %address, "Opened mock control connection");
        Ok(Box::new(MockController {
            state: self.state.clone(),
        }))
    }
}

/// One mock control connection.
pub struct MockController {
    state: Arc<RwLock<MockState>>,
}

#[async_trait]
impl HypervisorController for MockController {
    async fn define(&self, xml: &str) -> Result<DomainHandle> {
        // Identity comes out of the descriptor document itself.
        let tree = XmlNode::parse(xml)?;
        let uuid = tree
            .find("uuid")
            .and_then(|n| n.text())
            .ok_or_else(|| ProvisionError::Lifecycle {
                operation: "define",
                domain: "<unknown>".to_string(),
                detail: "descriptor document has no uuid".to_string(),
            })?
            .to_string();
        let name = tree
            .find("name")
            .and_then(|n| n.text())
            .ok_or_else(|| ProvisionError::Lifecycle {
                operation: "define",
                domain: uuid.clone(),
                detail: "descriptor document has no name".to_string(),
            })?
            .to_string();

        let mut state = self.state.write().expect("mock state");
        // A prior definition with the same identity is overwritten; a
        // running domain stays running.
        let running = state
            .domains
            .get(&uuid)
            .map(|d| d.running)
            .unwrap_or(false);
        state.domains.insert(
            uuid.clone(),
            MockDomain {
                name: name.clone(),
                defined: true,
                running,
            },
        );

        info!(uuid = %uuid, name = %name, "Defined mock domain");
        Ok(DomainHandle { uuid, name })
    }

    async fn undefine(&self, handle: &DomainHandle) -> Result<()> {
        let mut state = self.state.write().expect("mock state");
        let domain = state.domains.get_mut(&handle.uuid).ok_or_else(|| {
            ProvisionError::Lifecycle {
                operation: "undefine",
                domain: handle.uuid.clone(),
                detail: "domain not found".to_string(),
            }
        })?;

        if domain.running {
            // Keeps running as a transient instance.
            domain.defined = false;
        } else {
            state.domains.remove(&handle.uuid);
        }
        Ok(())
    }

    async fn launch(&self, handle: &DomainHandle) -> Result<()> {
        let mut state = self.state.write().expect("mock state");
        if state.fail_launch {
            return Err(ProvisionError::Lifecycle {
                operation: "launch",
                domain: handle.uuid.clone(),
                detail: "hypervisor rejected the start".to_string(),
            });
        }
        let domain = state.domains.get_mut(&handle.uuid).ok_or_else(|| {
            ProvisionError::Lifecycle {
                operation: "launch",
                domain: handle.uuid.clone(),
                detail: "domain not defined".to_string(),
            }
        })?;
        domain.running = true;
        info!(uuid = %handle.uuid, "Launched mock domain");
        Ok(())
    }

    async fn destroy(&self, handle: &DomainHandle) -> Result<()> {
        let mut state = self.state.write().expect("mock state");
        let domain = state.domains.get_mut(&handle.uuid).ok_or_else(|| {
            ProvisionError::Lifecycle {
                operation: "destroy",
                domain: handle.uuid.clone(),
                detail: "domain not found".to_string(),
            }
        })?;
        domain.running = false;
        if !domain.defined {
            // Transient domain: destroying it releases everything.
            state.domains.remove(&handle.uuid);
        }
        Ok(())
    }

    async fn lookup_by_uuid(&self, uuid: &str) -> Result<String> {
        let state = self.state.read().expect("mock state");
        state
            .domains
            .get(uuid)
            .map(|d| d.name.clone())
            .ok_or_else(|| ProvisionError::Lifecycle {
                operation: "lookup",
                domain: uuid.to_string(),
                detail: "domain not found".to_string(),
            })
    }

    async fn list_running(&self) -> Result<Vec<String>> {
        let state = self.state.read().expect("mock state");
        let mut names: Vec<String> = state
            .domains
            .values()
            .filter(|d| d.running)
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
