//! Sandbox abstraction layer for the liveness service.
//!
//! Defines the [`SandboxClient`] trait and [`CommandOutput`] type that all
//! sandbox providers implement. The service never creates or destroys a
//! sandbox: a client is always attached to one that is already running.
//!
//! - [`e2b::E2bSandboxClient`]: E2B cloud MicroVM (requires `E2B_API_KEY`)
//! - [`docker::DockerSandboxClient`]: local Docker container (no API key needed)

pub mod docker;
pub mod e2b;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Output from a command executed inside a sandbox.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A raw notification from a sandbox's native directory watch.
///
/// `kind` is whatever vocabulary the backend uses (`CREATE`, `MODIFY,ISDIR`,
/// `remove`, ...); the event filter normalizes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFsEvent {
    pub path: String,
    pub kind: String,
}

/// Provider-agnostic handle to a running sandbox.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    /// Sandbox/container identifier.
    fn id(&self) -> &str;

    /// Run a shell command inside the sandbox.
    async fn run_command(
        &self,
        command: &str,
        workdir: &str,
        timeout_ms: u64,
    ) -> anyhow::Result<CommandOutput>;

    /// Return the public preview URL for a given port.
    async fn get_preview_url(&self, port: u16) -> anyhow::Result<String>;

    /// Whether [`SandboxClient::watch_dir`] is usable. Never errors: a failed
    /// capability check reads as "not supported".
    async fn supports_native_watch(&self) -> bool {
        false
    }

    /// Open a recursive, push-based watch on `root`. The watch ends when the
    /// returned receiver is dropped.
    async fn watch_dir(&self, root: &str) -> anyhow::Result<mpsc::Receiver<RawFsEvent>> {
        anyhow::bail!("Sandbox {} has no native directory watch (root: {root})", self.id())
    }
}

/// Quote a value for interpolation into a single-quoted shell argument.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
