use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use vigil::simulation::SimulatedTransport;
use vigil::{Pipeline, PipelineConfig, TracingReporter};

/// Raw readings the simulated channels start from; with the reference
/// transform (+10000) they straddle the 10080 alarm threshold
const INITIAL_RAW: [f64; 4] = [81.0, 79.0, 80.5, 78.0];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vigil::init();

    info!("Vigil v{} starting", vigil::VERSION);

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => {
            info!("No configuration given, using the built-in reference plant");
            PipelineConfig::reference()
        }
    };

    let transport = Arc::new(SimulatedTransport::new().with_noise(1.5));
    for (channel, raw) in config.channels.iter().zip(INITIAL_RAW.iter().cycle()) {
        transport.set_value(channel.binding(), *raw);
    }

    let pipeline = match Pipeline::from_config(&config, transport).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Pipeline setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let handle = pipeline
        .scheduler(Arc::new(TracingReporter))
        .context("creating acquisition scheduler")?
        .spawn();

    signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Received shutdown signal");

    let stats = handle.stop().await;
    info!(
        "Final stats: {} ticks, {} available, {} not available, {} failed, {} rejected, uptime: {}s",
        stats.tick_count,
        stats.available,
        stats.not_available,
        stats.failed,
        stats.rejected,
        stats.uptime_secs
    );

    Ok(())
}
