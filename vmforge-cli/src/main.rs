//! # vmforge
//!
//! Provisions one KVM instance per invocation: prepares the VLAN/bridge/
//! dnsmasq plumbing on the hypervisor host, lays out the instance
//! directory, writes the libvirt domain document, relocates the staged
//! disk and launches the domain.
//!
//! ## Usage
//! ```bash
//! vmforge --config /etc/vmforge/config.yaml --request request.yaml
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use vmforge_common::{init_logging, LogFormat};
use vmforge_provisioner::hypervisor::MockHypervisor;
use vmforge_provisioner::{
    HypervisorConnector, ProvisionConfig, ProvisionRequest, Provisioner, RemoteExecutor,
    ScriptedExecutor, SshExecutor,
};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_logging(&args.log_level, format)?;

    let config = match &args.config {
        Some(path) => ProvisionConfig::load(path)?,
        None => ProvisionConfig::default(),
    };

    let request_text = std::fs::read_to_string(&args.request)
        .with_context(|| format!("Failed to read request file: {}", args.request))?;
    let request: ProvisionRequest =
        serde_yaml::from_str(&request_text).with_context(|| "Failed to parse request file")?;

    info!(
        uuid = %request.uuid,
        host = %request.host.address,
        "Provisioning instance"
    );

    let (executor, connector): (Arc<dyn RemoteExecutor>, Arc<dyn HypervisorConnector>) =
        if args.dev {
            (
                Arc::new(ScriptedExecutor::new()),
                Arc::new(MockHypervisor::new()),
            )
        } else {
            (
                Arc::new(SshExecutor::new(&config.ssh)),
                libvirt_connector(&config)?,
            )
        };

    let provisioner = Provisioner::new(config, executor, connector);
    let report = provisioner.build(&request).await?;

    println!("Instance built successfully:");
    println!("  1. disk directory: {}", report.instance_dir);
    println!("  2. instance name:  {}", report.instance_name);
    println!(
        "Running domains on hypervisor {}:",
        request.host.address
    );
    for name in &report.running_domains {
        println!("  - {}", name);
    }

    Ok(())
}

#[cfg(feature = "libvirt")]
fn libvirt_connector(config: &ProvisionConfig) -> Result<Arc<dyn HypervisorConnector>> {
    Ok(Arc::new(vmforge_provisioner::LibvirtConnector::new(
        config.ssh.user.clone(),
    )))
}

#[cfg(not(feature = "libvirt"))]
fn libvirt_connector(_config: &ProvisionConfig) -> Result<Arc<dyn HypervisorConnector>> {
    anyhow::bail!(
        "built without the `libvirt` feature; rebuild with --features libvirt or run with --dev"
    )
}
