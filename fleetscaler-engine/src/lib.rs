mod decision;

pub use decision::{decide, Transition};

use fleetscaler_core::{ActiveSet, Agent, ControllerConfig, ScalingFlag};
use fleetscaler_deploy::RemoteDeployer;
use fleetscaler_metrics::MetricsClient;
use fleetscaler_power::{PowerAction, PowerClient};
use fleetscaler_proxy::UpstreamWriter;
use fleetscaler_ssh::is_reachable;
use tokio::sync::Mutex;

/// Periodic evaluator. Owns the active set and the scaling flag; every
/// public entry point (`evaluate`) is safe to call from a fixed-interval
/// ticker without overlap protection of its own.
pub struct ScalerEngine {
    config: ControllerConfig,
    active_set: Mutex<ActiveSet>,
    scaling_flag: ScalingFlag,
    power: PowerClient,
    metrics: MetricsClient,
    deployer: RemoteDeployer,
}

impl ScalerEngine {
    pub fn new(config: ControllerConfig) -> Self {
        let power = PowerClient::new(config.power_api_base_url.clone());
        Self {
            config,
            active_set: Mutex::new(ActiveSet::new()),
            scaling_flag: ScalingFlag::new(),
            power,
            metrics: MetricsClient::new(),
            deployer: RemoteDeployer::from_env(),
        }
    }

    /// Snapshot of the current active set, for diagnostics and tests.
    pub async fn active_members(&self) -> Vec<Agent> {
        self.active_set.lock().await.members().to_vec()
    }

    /// Runs one tick of the scaling evaluator per the tick algorithm: a
    /// no-op if a scale action is already in flight, an unconditional
    /// scale-up if the active set is empty, otherwise a metrics-driven
    /// decision.
    pub async fn evaluate(&self) {
        if self.scaling_flag.is_in_progress() {
            return;
        }

        let active_len = self.active_set.lock().await.len();
        if active_len < 1 {
            self.check_and_scale_up().await;
            return;
        }

        let members = self.active_members().await;
        let mut samples = Vec::new();
        for agent in &members {
            match self.metrics.get_metrics(&agent.telemetry_url).await {
                Ok(sample) => samples.push(sample),
                Err(err) => {
                    tracing::debug!(server = %agent.server_name, error = %err, "metrics sample failed, skipping");
                }
            }
        }

        if samples.is_empty() {
            return;
        }

        let count = samples.len() as f64;
        let avg_cpu = samples.iter().map(|s| s.cpu_percent).sum::<f64>() / count;
        let avg_mem = samples.iter().map(|s| s.mem_percent).sum::<f64>() / count;
        tracing::info!(avg_cpu, avg_mem, sampled = samples.len(), "tick evaluated");

        match decide(avg_cpu, avg_mem) {
            Transition::ScaleUp => self.check_and_scale_up().await,
            Transition::ScaleDown => self.check_and_scale_down().await,
            Transition::None => {}
        }
    }

    /// Probes every configured agent (in config order) and returns those
    /// currently reachable, preserving that order. Scale-up rebuilds from
    /// the full configured fleet, since an agent that came up outside the
    /// controller's own bookkeeping is still a valid scale-up target to
    /// skip over.
    async fn rebuild_reachable_from_config(&self) -> Vec<Agent> {
        let mut reachable = Vec::new();
        for agent in &self.config.agents {
            if is_reachable(&agent.ssh).await {
                reachable.push(agent.clone());
            }
        }
        reachable
    }

    /// Probes the agents already in the active set, in their existing
    /// (activation) order, and returns the still-reachable subset. Used by
    /// scale-down, which must preserve prior ordering so "the last member"
    /// means "the most recently activated member", not an artifact of
    /// configuration order.
    async fn rebuild_reachable_from_prior(&self, prior: &[Agent]) -> Vec<Agent> {
        let mut reachable = Vec::new();
        for agent in prior {
            if is_reachable(&agent.ssh).await {
                reachable.push(agent.clone());
            }
        }
        reachable
    }

    async fn check_and_scale_up(&self) {
        let _guard = match self.scaling_flag.try_acquire() {
            Some(guard) => guard,
            None => return,
        };

        let rebuilt = self.rebuild_reachable_from_config().await;
        {
            let mut active = self.active_set.lock().await;
            active.replace(rebuilt.clone());
        }

        let candidate = self
            .config
            .agents
            .iter()
            .find(|a| !rebuilt.iter().any(|r| r.server_name == a.server_name))
            .cloned();

        let candidate = match candidate {
            Some(candidate) => candidate,
            None => return,
        };

        if let Err(err) = self.power.set_power(&candidate.server_name, PowerAction::On).await {
            tracing::warn!(server = %candidate.server_name, error = %err, "power-on request failed, continuing");
        }

        if !is_reachable(&candidate.ssh).await {
            tracing::info!(server = %candidate.server_name, "candidate unreachable after power-on, retrying next tick");
            return;
        }

        match self.deployer.deploy(&candidate, &self.config.deploy_secrets).await {
            Ok(()) => {
                let snapshot = {
                    let mut active = self.active_set.lock().await;
                    active.push(candidate.clone());
                    active.clone()
                };
                tracing::info!(server = %candidate.server_name, "scaled up");
                if let Err(err) = UpstreamWriter::publish(&snapshot).await {
                    tracing::error!(error = %err, "upstream publish failed after scale-up");
                }
            }
            Err(err) => {
                tracing::warn!(server = %candidate.server_name, error = %err, "deploy failed, active set unchanged");
            }
        }
    }

    async fn check_and_scale_down(&self) {
        let _guard = match self.scaling_flag.try_acquire() {
            Some(guard) => guard,
            None => return,
        };

        let prior = self.active_members().await;
        let rebuilt = self.rebuild_reachable_from_prior(&prior).await;
        {
            let mut active = self.active_set.lock().await;
            active.replace(rebuilt.clone());
        }

        if rebuilt.len() < 2 {
            return;
        }

        let victim = rebuilt.last().cloned().expect("checked len >= 2 above");

        if let Err(err) = self.power.set_power(&victim.server_name, PowerAction::Off).await {
            tracing::warn!(server = %victim.server_name, error = %err, "power-off request failed, continuing");
        }

        if is_reachable(&victim.ssh).await {
            tracing::info!(server = %victim.server_name, "victim still reachable after power-off, active set unchanged");
            return;
        }

        let snapshot = {
            let mut active = self.active_set.lock().await;
            if active.last().map(|a| a.server_name.as_str()) == Some(victim.server_name.as_str()) {
                active.pop_last();
            }
            active.clone()
        };
        tracing::info!(server = %victim.server_name, "scaled down");
        if let Err(err) = UpstreamWriter::publish(&snapshot).await {
            tracing::error!(error = %err, "upstream publish failed after scale-down");
        }
    }
}
