use crate::error::{ControllerError, ControllerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Remote-shell coordinates for an agent, used by the reachability probe and
/// the remote deployer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshTarget {
    pub port: String,
    pub user: String,
    pub ip: String,
}

/// The unit of scale: an immutable, configured backend VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub server_name: String,
    pub upstream_url: String,
    pub telemetry_url: String,
    pub ssh: SshTarget,
}

impl Agent {
    /// `upstream_url` with any `http(s)://` scheme prefix stripped, for
    /// rendering into the proxy's `server host:port;` directive.
    pub fn upstream_host_port(&self) -> &str {
        self.upstream_url
            .strip_prefix("https://")
            .or_else(|| self.upstream_url.strip_prefix("http://"))
            .unwrap_or(&self.upstream_url)
    }
}

/// The three opaque secrets forwarded, base64-encoded, to every deploy.
#[derive(Clone)]
pub struct DeploySecrets {
    pub cors_origins: String,
    pub postgres_url: String,
    pub redis_url: String,
}

impl std::fmt::Debug for DeploySecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploySecrets").finish_non_exhaustive()
    }
}

/// Process-wide, immutable-after-load controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub power_api_base_url: String,
    pub agents: Vec<Agent>,
    pub deploy_secrets: DeploySecrets,
    pub debug: bool,
}

impl ControllerConfig {
    /// Loads configuration from the environment: `SERVER_MANAGER_API` and
    /// `AGENTS` are required, `CORS_ORIGINS`/`POSTGRES_URL`/`REDIS_URL` are
    /// forwarded opaque, and `DEBUG` toggles verbose diagnostic logging.
    pub fn from_env() -> ControllerResult<Self> {
        let power_api_base_url = non_empty_env("SERVER_MANAGER_API")
            .ok_or_else(|| ControllerError::Config("SERVER_MANAGER_API is required".into()))?;

        let agents_json = non_empty_env("AGENTS")
            .ok_or_else(|| ControllerError::Config("AGENTS is required".into()))?;
        let agents: Vec<Agent> = serde_json::from_str(&agents_json)
            .map_err(|e| ControllerError::Config(format!("invalid AGENTS JSON: {e}")))?;

        if agents.is_empty() {
            return Err(ControllerError::Config("AGENTS must not be empty".into()));
        }
        validate_unique_server_names(&agents)?;

        let deploy_secrets = DeploySecrets {
            cors_origins: std::env::var("CORS_ORIGINS").unwrap_or_default(),
            postgres_url: std::env::var("POSTGRES_URL").unwrap_or_default(),
            redis_url: std::env::var("REDIS_URL").unwrap_or_default(),
        };

        let debug = std::env::var("DEBUG").map(|v| v == "true").unwrap_or(false);

        Ok(Self {
            power_api_base_url,
            agents,
            deploy_secrets,
            debug,
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn validate_unique_server_names(agents: &[Agent]) -> ControllerResult<()> {
    let mut seen = HashSet::with_capacity(agents.len());
    for agent in agents {
        if !seen.insert(agent.server_name.as_str()) {
            return Err(ControllerError::Config(format!(
                "duplicate server_name in AGENTS: {}",
                agent.server_name
            )));
        }
    }
    Ok(())
}

/// The ordered subset of `ControllerConfig.agents` the engine currently
/// considers live and routable. Exclusively owned and mutated by the
/// engine's scale actions.
#[derive(Debug, Default, Clone)]
pub struct ActiveSet {
    members: Vec<Agent>,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self) -> &[Agent] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, server_name: &str) -> bool {
        self.members.iter().any(|a| a.server_name == server_name)
    }

    pub fn last(&self) -> Option<&Agent> {
        self.members.last()
    }

    /// Appends an agent to the tail (activation order). No-op if already a
    /// member, preserving the "no duplicates by server_name" invariant.
    pub fn push(&mut self, agent: Agent) {
        if !self.contains(&agent.server_name) {
            self.members.push(agent);
        }
    }

    /// Removes and returns the most-recently-activated member.
    pub fn pop_last(&mut self) -> Option<Agent> {
        self.members.pop()
    }

    /// Replaces the full membership, preserving the order given by the
    /// caller (used when rebuilding from reachability probes).
    pub fn replace(&mut self, members: Vec<Agent>) {
        self.members = members;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> Agent {
        Agent {
            server_name: name.to_string(),
            upstream_url: format!("http://{name}.local:8080"),
            telemetry_url: format!("http://{name}.local:9000/metrics"),
            ssh: SshTarget {
                port: "22".to_string(),
                user: "deploy".to_string(),
                ip: "10.0.0.5".to_string(),
            },
        }
    }

    #[test]
    fn upstream_host_port_strips_scheme() {
        let a = agent("a");
        assert_eq!(a.upstream_host_port(), "a.local:8080");
    }

    #[test]
    fn active_set_append_and_pop_tail() {
        let mut set = ActiveSet::new();
        set.push(agent("a"));
        set.push(agent("b"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.last().unwrap().server_name, "b");

        let popped = set.pop_last().unwrap();
        assert_eq!(popped.server_name, "b");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn active_set_rejects_duplicate_push() {
        let mut set = ActiveSet::new();
        set.push(agent("a"));
        set.push(agent("a"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn from_env_rejects_duplicate_server_names() {
        let agents = vec![agent("a"), agent("a")];
        let err = validate_unique_server_names(&agents).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
