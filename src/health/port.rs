//! Direct, tunnel-independent check for a listening socket in a sandbox.

use crate::sandbox::SandboxClient;
use std::time::Duration;

const LISTENING: &str = "listening";

fn port_check_command(port: u16) -> String {
    format!(
        "if (ss -tln 2>/dev/null || netstat -tln 2>/dev/null) | grep -qE ':{port}[[:space:]]'; \
         then echo {LISTENING}; else echo closed; fi"
    )
}

/// Whether something inside `sandbox` listens on TCP `port`.
pub async fn is_port_listening(
    sandbox: &dyn SandboxClient,
    port: u16,
    budget: Duration,
) -> anyhow::Result<bool> {
    let timeout_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
    let out = tokio::time::timeout(
        budget,
        sandbox.run_command(&port_check_command(port), "/", timeout_ms),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Port check for {port} timed out after {budget:?}"))??;

    Ok(out.stdout.trim() == LISTENING)
}

/// Poll until `port` is listening or `deadline` passes. Check errors count
/// as "not yet".
pub async fn wait_until_listening(
    sandbox: &dyn SandboxClient,
    port: u16,
    check_budget: Duration,
    poll: Duration,
    deadline: Duration,
) -> bool {
    let give_up = tokio::time::Instant::now() + deadline;
    loop {
        match is_port_listening(sandbox, port, check_budget).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => tracing::debug!("Port {port} check in {} failed: {e}", sandbox.id()),
        }
        if tokio::time::Instant::now() + poll > give_up {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}
