//! Error types for the provisioning pipeline.

use thiserror::Error;

/// Errors that can occur while provisioning an instance.
///
/// Every variant carries enough context (failing command and host, or
/// lifecycle call and domain identity) to be actionable without re-running
/// at a higher verbosity. All of them abort the pipeline; nothing is
/// retried.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The remote host or hypervisor endpoint was unreachable.
    #[error("failed to connect to {host}: {detail}")]
    ConnectionFailed { host: String, detail: String },

    /// A remote command produced error-stream output.
    #[error("command failed on {host}: `{command}`: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        stderr: String,
    },

    /// A required domain descriptor field was missing or malformed.
    #[error("invalid domain descriptor: {0}")]
    InvalidDescriptor(String),

    /// The network descriptor was malformed (e.g. CIDR without mask bits).
    #[error("invalid network descriptor: {0}")]
    InvalidNetwork(String),

    /// The hypervisor rejected a domain lifecycle call.
    #[error("domain {operation} failed for {domain}: {detail}")]
    Lifecycle {
        operation: &'static str,
        domain: String,
        detail: String,
    },

    /// The staged source disk image is not where the pipeline expects it.
    ///
    /// Disk relocation is consume-once: this also surfaces when a request
    /// is re-run after a previous run already moved the disk.
    #[error("source disk not found on {host}: {path}")]
    MissingSourceDisk { host: String, path: String },

    /// XML generation/parsing error.
    #[error("XML error: {0}")]
    Xml(String),
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;
