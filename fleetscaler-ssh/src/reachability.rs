use crate::remote_shell::run_remote_command;
use fleetscaler_core::SshTarget;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);
const PROBE_COMMAND: &str = "exit 0";

/// Probes whether an agent's SSH endpoint is reachable and accepting
/// commands. Every failure mode (connection refused, auth failure, timeout,
/// nonzero exit) collapses to `false` — this is a liveness check, not a
/// diagnostic, and the caller has no remediation branch per-failure-kind.
pub async fn is_reachable(target: &SshTarget) -> bool {
    match run_remote_command(target, PROBE_COMMAND, PROBE_TIMEOUT).await {
        Ok(output) if output.succeeded() => true,
        Ok(output) => {
            tracing::debug!(
                status = output.status,
                stderr = %output.stderr.trim(),
                "reachability probe returned nonzero"
            );
            false
        }
        Err(err) => {
            tracing::debug!(error = %err, "reachability probe failed");
            false
        }
    }
}
