use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::session::{SessionConfig, SessionTiming};

#[derive(Parser, Debug, Clone)]
#[command(name = "cane-pol")]
#[command(version, about = "Real-time sugarcane Pol prediction from NIR spectra")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "CANE_POL_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// Calibration artifact (JSON)
    #[arg(long, env = "CANE_POL_CALIBRATION", default_value = "calibration.json")]
    pub calibration: PathBuf,

    /// Replay labelled spectra from this dataset instead of simulating
    /// (.parquet, .json or wide .csv)
    #[arg(long, env = "CANE_POL_REPLAY")]
    pub replay: Option<PathBuf>,

    /// Milliseconds between ticks
    #[arg(long, env = "CANE_POL_TICK_MS", default_value_t = 1000,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub tick_ms: u64,

    /// Compute budget per tick in milliseconds; slower ticks are anomalies
    #[arg(long, env = "CANE_POL_TICK_BUDGET_MS", default_value_t = 250,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub tick_budget_ms: u64,

    /// Fixed RNG seed; session k draws from seed + k
    #[arg(long, env = "CANE_POL_SEED")]
    pub seed: Option<u64>,

    /// Default noise level (percent of the reference's range)
    #[arg(long, env = "CANE_POL_NOISE_LEVEL", default_value_t = 2.0, allow_negative_numbers = true)]
    pub noise_level: f64,

    /// Default low-Pol alert threshold
    #[arg(long, env = "CANE_POL_THRESHOLD", default_value_t = 13.0, allow_negative_numbers = true)]
    pub threshold: f64,
}

/// Validated startup settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind: SocketAddr,
    pub calibration: PathBuf,
    pub replay: Option<PathBuf>,
    pub timing: SessionTiming,
    pub defaults: SessionConfig,
    pub seed: Option<u64>,
}

impl Args {
    pub fn settings(&self) -> Result<Settings> {
        let defaults = SessionConfig::new(self.noise_level, self.threshold)
            .context("invalid default session configuration")?;
        Ok(Settings {
            bind: self.bind,
            calibration: self.calibration.clone(),
            replay: self.replay.clone(),
            timing: SessionTiming {
                tick_interval: Duration::from_millis(self.tick_ms),
                tick_budget: Duration::from_millis(self.tick_budget_ms),
            },
            defaults,
            seed: self.seed,
        })
    }
}
