//! Remote command execution over SSH.
//!
//! Everything the pipeline does on a hypervisor host goes through the
//! [`RemoteExecutor`] trait: one blocking request/response exchange per
//! command. A command is considered successful if and only if its captured
//! error stream is empty — even benign diagnostic text counts as failure.
//! That textual predicate is deliberate: the command sequences were tuned
//! against it (the dnsmasq probe exploits it outright), and it lives in one
//! place so an exit-status contract can replace it behind the trait without
//! touching callers.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::SshConfig;
use crate::error::{ProvisionError, Result};
use crate::types::HostTarget;

/// Outcome of a single remote command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// True iff the captured error stream was empty
    pub success: bool,
    /// Captured error-stream content
    pub stderr: String,
}

impl CommandResult {
    /// Build a result from captured error-stream content.
    pub fn from_stderr(stderr: String) -> Self {
        Self {
            success: stderr.is_empty(),
            stderr,
        }
    }

    /// A successful (empty error stream) result.
    pub fn ok() -> Self {
        Self::from_stderr(String::new())
    }
}

/// Remote command execution capability.
///
/// The derived primitives are all built on [`execute`](Self::execute) and
/// are fatal on failure, except [`device_exists`](Self::device_exists)
/// which is a plain query. The guarded shell forms (`if [ ! -d ... ]` and
/// friends) make them no-ops when the target already exists, which is what
/// lets a re-run skip work a previous partial run already did.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command on the host. Success iff the error stream is empty.
    async fn execute(&self, host: &HostTarget, command: &str) -> Result<CommandResult>;

    /// Run a command and turn a failure into a fatal error carrying the
    /// command text and target host.
    async fn run_checked(&self, host: &HostTarget, command: String) -> Result<()> {
        let result = self.execute(host, &command).await?;
        if result.success {
            Ok(())
        } else {
            Err(ProvisionError::CommandFailed {
                host: host.address.clone(),
                command,
                stderr: result.stderr,
            })
        }
    }

    /// Check whether an ethernet device exists on the host.
    async fn device_exists(&self, host: &HostTarget, device: &str) -> Result<bool> {
        let cmd = format!("ls /sys/class/net/{}", device);
        Ok(self.execute(host, &cmd).await?.success)
    }

    /// Create a directory unless it already exists.
    async fn mkdir(&self, host: &HostTarget, path: &str) -> Result<()> {
        let cmd = format!("if [ ! -d \"{path}\" ]; then mkdir -p {path}; fi", path = path);
        self.run_checked(host, cmd).await
    }

    /// Create an empty file unless it already exists.
    async fn touch(&self, host: &HostTarget, path: &str) -> Result<()> {
        let cmd = format!("if [ ! -f \"{path}\" ]; then touch {path}; fi", path = path);
        self.run_checked(host, cmd).await
    }

    /// Change the access permissions of a file.
    async fn chmod(&self, host: &HostTarget, path: &str, mode: &str) -> Result<()> {
        let cmd = format!("chmod {} {}", mode, path);
        self.run_checked(host, cmd).await
    }

    /// Change the owner and group of a path.
    async fn chown(&self, host: &HostTarget, path: &str, owner: &str, group: &str) -> Result<()> {
        let cmd = format!("chown {}:{} {}", owner, group, path);
        self.run_checked(host, cmd).await
    }

    /// Overwrite a file with one line of content.
    async fn write_short_text(&self, host: &HostTarget, content: &str, dest: &str) -> Result<()> {
        let cmd = format!("echo {} > {}", content, dest);
        self.run_checked(host, cmd).await
    }

    /// Append a line to a file, prefixing a newline only when the target is
    /// non-empty.
    async fn append_text(&self, host: &HostTarget, content: &str, dest: &str) -> Result<()> {
        let with_break = format!("echo -e \"\\n{}\\c\" >> {}", content, dest);
        let without_break = format!("echo -e \"{}\\c\" >> {}", content, dest);
        let cmd = format!(
            "if [ ! -s \"{}\" ]; then {}; else {}; fi",
            dest, without_break, with_break
        );
        self.run_checked(host, cmd).await
    }

    /// Write multi-line content to a file via a heredoc.
    async fn write_long_text(&self, host: &HostTarget, content: &str, dest: &str) -> Result<()> {
        let cmd = format!("cat > {} << EOF\n{}\nEOF", dest, content);
        self.run_checked(host, cmd).await
    }
}

/// [`RemoteExecutor`] backed by the system `ssh` client.
///
/// Each call is one blocking exchange; it returns when the remote command
/// finishes or the transport gives up.
pub struct SshExecutor {
    config: SshConfig,
}

impl SshExecutor {
    /// Create an executor with the given transport settings.
    pub fn new(config: &SshConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Argument vector for one remote invocation.
    ///
    /// `LogLevel=ERROR` keeps the ssh client's own diagnostics (the
    /// known-hosts "Permanently added" warning that accept-new prints on
    /// first contact) out of the captured error stream; only the remote
    /// command's stderr feeds the success predicate.
    fn ssh_args(&self, host: &HostTarget, command: &str) -> Vec<String> {
        vec![
            "-p".to_string(),
            host.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            format!("{}@{}", host.user, host.address),
            command.to_string(),
        ]
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    #[instrument(skip(self, command), fields(host = %host.address))]
    async fn execute(&self, host: &HostTarget, command: &str) -> Result<CommandResult> {
        debug!(command = %command, "Executing remote command");

        let output = Command::new("ssh")
            .args(self.ssh_args(host, command))
            .output()
            .await
            .map_err(|e| ProvisionError::ConnectionFailed {
                host: host.address.clone(),
                detail: e.to_string(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        Ok(CommandResult::from_stderr(stderr))
    }
}

/// Scripted in-memory executor for tests and dry runs.
///
/// Records every issued command; responds with the first matching rule,
/// succeeding by default. Rules match on a substring of the command text.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<(String, CommandResult)>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    /// Create an executor that succeeds on everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to commands containing `pattern` with the given result.
    /// Earlier rules win.
    pub fn respond(&self, pattern: &str, result: CommandResult) {
        self.rules
            .lock()
            .expect("rules lock")
            .push((pattern.to_string(), result));
    }

    /// Respond to commands containing `pattern` with error-stream output.
    pub fn fail_matching(&self, pattern: &str, stderr: &str) {
        self.respond(pattern, CommandResult::from_stderr(stderr.to_string()));
    }

    /// Every command issued so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }

    /// Commands issued so far that contain `pattern`.
    pub fn commands_matching(&self, pattern: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, _host: &HostTarget, command: &str) -> Result<CommandResult> {
        self.log
            .lock()
            .expect("log lock")
            .push(command.to_string());

        let rules = self.rules.lock().expect("rules lock");
        let result = rules
            .iter()
            .find(|(pattern, _)| command.contains(pattern))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(CommandResult::ok);
        Ok(result)
    }
}
