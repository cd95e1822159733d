//! Docker sandbox provider: attaches to a running local container.
//!
//! Uses [`bollard`] to talk to the Docker daemon. Commands run through
//! `docker exec`; preview URLs are `http://localhost:{host_port}` for whatever
//! host port the container maps to the requested container port. When the
//! image ships `inotifywait`, directory watches stream from a long-lived exec.

use super::{shell_quote, CommandOutput, RawFsEvent, SandboxClient};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures_util::StreamExt;
use tokio::sync::mpsc;

/// Buffer between the exec output reader and the watch consumer.
const WATCH_BUFFER: usize = 256;

/// Field separator in the `inotifywait --format` output.
const WATCH_FIELD_SEP: char = '|';

/// Docker-backed sandbox client bound to one container.
pub struct DockerSandboxClient {
    docker: Docker,
    container_id: String,
}

impl DockerSandboxClient {
    /// Attach to `container_id` using the default Docker socket path.
    pub fn attach(container_id: impl Into<String>) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_defaults()
            .map_err(|e| anyhow::anyhow!("Failed to connect to Docker: {e}"))?;
        Ok(Self {
            docker,
            container_id: container_id.into(),
        })
    }

    async fn host_port_for(&self, port: u16) -> anyhow::Result<u16> {
        let inspect = self
            .docker
            .inspect_container(&self.container_id, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to inspect container: {e}"))?;

        let key = format!("{port}/tcp");
        inspect
            .network_settings
            .as_ref()
            .and_then(|ns| ns.ports.as_ref())
            .and_then(|ports| ports.get(&key))
            .and_then(|bindings| bindings.as_ref())
            .and_then(|bindings| bindings.first())
            .and_then(|b| b.host_port.as_ref())
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Container {} does not publish port {port} to the host",
                    self.container_id
                )
            })
    }
}

#[async_trait]
impl SandboxClient for DockerSandboxClient {
    fn id(&self) -> &str {
        &self.container_id
    }

    async fn run_command(
        &self,
        command: &str,
        workdir: &str,
        timeout_ms: u64,
    ) -> anyhow::Result<CommandOutput> {
        let exec_id = self
            .docker
            .create_exec(
                &self.container_id,
                CreateExecOptions {
                    cmd: Some(vec!["sh", "-c", command]),
                    working_dir: Some(workdir),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create exec: {e}"))?
            .id;

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();

        let start_result = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            async {
                match self
                    .docker
                    .start_exec(&exec_id, None)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to start exec: {e}"))?
                {
                    StartExecResults::Attached { mut output, .. } => {
                        while let Some(chunk) = output.next().await {
                            match chunk.map_err(|e| anyhow::anyhow!("Exec output error: {e}"))? {
                                LogOutput::StdOut { message } => {
                                    stdout_buf.push_str(&String::from_utf8_lossy(&message));
                                }
                                LogOutput::StdErr { message } => {
                                    stderr_buf.push_str(&String::from_utf8_lossy(&message));
                                }
                                _ => {}
                            }
                        }
                    }
                    StartExecResults::Detached => {}
                }
                Ok::<(), anyhow::Error>(())
            },
        )
        .await;

        match start_result {
            Err(_elapsed) => {
                return Err(anyhow::anyhow!("Command timed out after {timeout_ms}ms"))
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(())) => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec_id)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to inspect exec: {e}"))?;

        Ok(CommandOutput {
            stdout: stdout_buf,
            stderr: stderr_buf,
            exit_code: inspect.exit_code.unwrap_or(0),
        })
    }

    async fn get_preview_url(&self, port: u16) -> anyhow::Result<String> {
        let host_port = self.host_port_for(port).await?;
        Ok(format!("http://localhost:{host_port}"))
    }

    async fn supports_native_watch(&self) -> bool {
        match self
            .run_command("command -v inotifywait >/dev/null 2>&1", "/", 5_000)
            .await
        {
            Ok(out) => out.success(),
            Err(e) => {
                tracing::debug!(
                    "inotifywait capability check failed in {}: {e}",
                    self.container_id
                );
                false
            }
        }
    }

    async fn watch_dir(&self, root: &str) -> anyhow::Result<mpsc::Receiver<RawFsEvent>> {
        let command = format!(
            "exec inotifywait -m -r -q --format '%w%f{WATCH_FIELD_SEP}%e' \
             -e create -e modify -e delete -e moved_to -e moved_from {}",
            shell_quote(root)
        );

        let exec_id = self
            .docker
            .create_exec(
                &self.container_id,
                CreateExecOptions {
                    cmd: Some(vec!["sh", "-c", command.as_str()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create watch exec: {e}"))?
            .id;

        let mut output = match self
            .docker
            .start_exec(&exec_id, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start watch exec: {e}"))?
        {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                anyhow::bail!("Watch exec for {} started detached", self.container_id)
            }
        };

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let container_id = self.container_id.clone();

        tokio::spawn(async move {
            let mut pending = String::new();
            loop {
                let chunk = tokio::select! {
                    _ = tx.closed() => break,
                    chunk = output.next() => chunk,
                };

                let message = match chunk {
                    Some(Ok(LogOutput::StdOut { message })) => message,
                    Some(Ok(LogOutput::StdErr { message })) => {
                        tracing::debug!(
                            "inotifywait stderr in {container_id}: {}",
                            String::from_utf8_lossy(&message).trim()
                        );
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!("Watch stream error in {container_id}: {e}");
                        break;
                    }
                    None => break,
                };

                pending.push_str(&String::from_utf8_lossy(&message));
                while let Some(newline) = pending.find('\n') {
                    let line: String = pending.drain(..=newline).collect();
                    if let Some(event) = parse_watch_line(&line) {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
            tracing::debug!("Native watch stream for {container_id} ended");
        });

        Ok(rx)
    }
}

/// Parse one `path|EVENTS` line emitted by `inotifywait`.
fn parse_watch_line(line: &str) -> Option<RawFsEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (path, kind) = line.rsplit_once(WATCH_FIELD_SEP)?;
    // Directory events are dropped; only files are reported, as in polling.
    if path.is_empty() || kind.is_empty() || kind.contains("ISDIR") {
        return None;
    }
    Some(RawFsEvent {
        path: path.to_string(),
        kind: kind.to_string(),
    })
}
