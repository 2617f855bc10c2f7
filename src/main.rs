use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::net::TcpListener;

use cane_pol::config::Args;
use cane_pol::data::loader::load_dataset;
use cane_pol::server::{self, AppState};
use cane_pol::CalibrationModel;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Args::parse().settings()?;

    let model = CalibrationModel::load(&settings.calibration)
        .with_context(|| format!("loading calibration {}", settings.calibration.display()))?;
    let model = Arc::new(model);

    let replay = match &settings.replay {
        Some(path) => Some(Arc::new(load_dataset(path)?)),
        None => None,
    };
    let source = if replay.is_some() { "replay" } else { "simulated" };

    let state = AppState::new(model, replay, &settings).context("replay dataset does not fit the calibration")?;
    info!(
        "{source} source, tick {} ms, budget {} ms, defaults noise {}% threshold {}",
        settings.timing.tick_interval.as_millis(),
        settings.timing.tick_budget.as_millis(),
        settings.defaults.noise_level,
        settings.defaults.threshold
    );

    let listener = TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("binding {}", settings.bind))?;
    server::serve(listener, Arc::new(state), shutdown_signal())
        .await
        .context("server error")?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down"),
        Err(e) => {
            error!("Could not listen for Ctrl-C: {e}");
            std::future::pending::<()>().await
        }
    }
}
