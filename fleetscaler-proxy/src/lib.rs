use fleetscaler_core::ActiveSet;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const UPSTREAM_PATH: &str = "/etc/nginx/conf.d/upstream.conf";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to write upstream file: {0}")]
    Write(String),
    #[error("failed to reload proxy: {0}")]
    Reload(String),
}

impl From<ProxyError> for fleetscaler_core::ControllerError {
    fn from(err: ProxyError) -> Self {
        fleetscaler_core::ControllerError::Upstream(err.to_string())
    }
}

/// Renders the nginx upstream block for the given active set. Pure function
/// of `active_set`: the same membership in the same order always renders
/// byte-identical output.
pub fn render_upstream_block(active_set: &ActiveSet) -> String {
    let mut block = String::from("upstream backend {\n");
    for agent in active_set.members() {
        block.push_str(&format!("    server {};\n", agent.upstream_host_port()));
    }
    block.push_str("}\n");
    block
}

/// Writes the rendered upstream pool and reloads the proxy. The writer is
/// stateless: the file is always fully overwritten, never patched.
pub struct UpstreamWriter;

impl UpstreamWriter {
    pub async fn publish(active_set: &ActiveSet) -> Result<(), ProxyError> {
        let block = render_upstream_block(active_set);
        tracing::info!(upstream = %block, "publishing upstream pool");
        write_via_command("sudo", &["tee", UPSTREAM_PATH], &block).await?;
        reload_proxy().await
    }
}

/// Pipes `content` to `program args[..]`'s stdin, discarding stdout. Both the
/// write and the reload are driven this way rather than by direct file I/O,
/// since the controller does not run as the user that owns the nginx config.
async fn write_via_command(program: &str, args: &[&str], content: &str) -> Result<(), ProxyError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|e| ProxyError::Write(e.to_string()))?;

    let mut stdin = child.stdin.take().expect("stdin piped at spawn");
    stdin
        .write_all(content.as_bytes())
        .await
        .map_err(|e| ProxyError::Write(e.to_string()))?;
    drop(stdin);

    let status = child.wait().await.map_err(|e| ProxyError::Write(e.to_string()))?;
    if !status.success() {
        return Err(ProxyError::Write(format!("{program} exited with {status}")));
    }
    Ok(())
}

async fn reload_proxy() -> Result<(), ProxyError> {
    let status = Command::new("sudo")
        .arg("systemctl")
        .arg("reload")
        .arg("nginx")
        .status()
        .await
        .map_err(|e| ProxyError::Reload(e.to_string()))?;
    if !status.success() {
        return Err(ProxyError::Reload(format!("systemctl reload exited with {status}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetscaler_core::{Agent, SshTarget};

    fn agent(name: &str, host_port: &str) -> Agent {
        Agent {
            server_name: name.to_string(),
            upstream_url: format!("http://{host_port}"),
            telemetry_url: format!("http://{host_port}/metrics"),
            ssh: SshTarget {
                port: "22".to_string(),
                user: "deploy".to_string(),
                ip: "10.0.0.5".to_string(),
            },
        }
    }

    #[test]
    fn render_is_empty_block_for_empty_active_set() {
        let set = ActiveSet::new();
        assert_eq!(render_upstream_block(&set), "upstream backend {\n}\n");
    }

    #[test]
    fn render_lists_members_in_order_with_scheme_stripped() {
        let mut set = ActiveSet::new();
        set.push(agent("a", "a.host:8080"));
        set.push(agent("b", "b.host:8080"));

        let rendered = render_upstream_block(&set);
        assert_eq!(
            rendered,
            "upstream backend {\n    server a.host:8080;\n    server b.host:8080;\n}\n"
        );
    }

    #[test]
    fn render_is_a_pure_function_of_the_active_set() {
        let mut set = ActiveSet::new();
        set.push(agent("a", "a.host:8080"));

        assert_eq!(render_upstream_block(&set), render_upstream_block(&set));
    }

    #[tokio::test]
    async fn write_via_command_round_trips_through_tee() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upstream.conf");
        let path_str = path.to_str().unwrap();

        write_via_command("tee", &[path_str], "upstream backend {\n    server x:1;\n}\n")
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "upstream backend {\n    server x:1;\n}\n");
    }

    #[tokio::test]
    async fn write_via_command_errors_when_program_is_missing() {
        let err = write_via_command("this-binary-does-not-exist", &["x"], "body")
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Write(_)));
    }
}
