use anyhow::{Context, Result};
use clap::Parser;
use fleetscaler_core::ControllerConfig;
use fleetscaler_engine::ScalerEngine;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_TICK_SECONDS: u64 = 10;

#[derive(Parser)]
#[command(name = "fleetscaler")]
#[command(about = "Control loop for a fixed-pool fleet autoscaler")]
#[command(version)]
struct Cli {
    /// Override the scaling tick interval, in seconds.
    #[arg(long, default_value_t = DEFAULT_TICK_SECONDS)]
    tick_seconds: u64,

    /// Run a single evaluation pass and exit, instead of looping forever.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = ControllerConfig::from_env().context("failed to load configuration")?;
    init_tracing(config.debug);
    tracing::info!(
        agents = config.agents.len(),
        power_api = %config.power_api_base_url,
        debug = config.debug,
        "configuration loaded"
    );

    let engine = ScalerEngine::new(config);

    if cli.once {
        engine.evaluate().await;
        return Ok(());
    }

    run_tick_loop(&engine, Duration::from_secs(cli.tick_seconds)).await;
    Ok(())
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_tick_loop(engine: &ScalerEngine, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                engine.evaluate().await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received, stopping tick loop");
                break;
            }
        }
    }
}
